//! Pong/activity tracking for heartbeat supervision.
//!
//! Timestamps use the tokio clock so paused-time tests see heartbeat
//! deadlines pass.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Liveness state of one connection, updated by the receive half.
#[derive(Debug)]
pub struct Liveness {
    last_pong: Mutex<Instant>,
}

impl Liveness {
    /// Fresh state; the connection counts as alive right now.
    pub fn new() -> Self {
        Self {
            last_pong: Mutex::new(Instant::now()),
        }
    }

    /// Record a pong or any other inbound activity.
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapsed_grows_until_marked() {
        let l = Liveness::new();
        assert_eq!(l.last_pong_elapsed(), Duration::ZERO);

        tokio::time::advance(Duration::from_secs(12)).await;
        assert_eq!(l.last_pong_elapsed(), Duration::from_secs(12));

        l.mark_alive();
        assert_eq!(l.last_pong_elapsed(), Duration::ZERO);
    }
}
