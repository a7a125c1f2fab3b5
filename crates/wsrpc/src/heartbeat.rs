//! Heartbeat ping/pong liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::ConnectionContext;
use crate::transport::{Liveness, TransportError};

/// Outcome of the heartbeat loop.
#[derive(Debug)]
pub enum HeartbeatResult {
    /// Nothing was heard from the peer within the allowed window.
    TimedOut(Duration),
    /// Sending a ping failed.
    PingFailed(TransportError),
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Silence tolerated before the peer is declared dead: one and a half
/// intervals.
pub fn grace(interval: Duration) -> Duration {
    interval + interval / 2
}

/// Ping the peer every `interval` until cancelled.
///
/// Any inbound traffic counts as a sign of life, pongs included. When the
/// last one is older than [`grace`] at a tick, the loop stops with
/// [`HeartbeatResult::TimedOut`].
pub async fn run_heartbeat(
    ctx: Arc<ConnectionContext>,
    liveness: Arc<Liveness>,
    interval: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let limit = grace(interval);
    let mut ticks = time::interval_at(time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                let silent = liveness.last_pong_elapsed();
                if silent > limit {
                    warn!(connection = %ctx.name(), ?silent, "peer stopped answering pings");
                    return HeartbeatResult::TimedOut(silent);
                }
                if let Err(e) = ctx.ping().await {
                    debug!(connection = %ctx.name(), error = %e, "heartbeat ping failed");
                    return HeartbeatResult::PingFailed(e);
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{config, connected_with_liveness, spawn_loop};
    use crate::transport::PeerEvent;
    use assert_matches::assert_matches;

    #[test]
    fn grace_is_one_and_a_half_intervals() {
        assert_eq!(grace(Duration::from_secs(30)), Duration::from_secs(45));
        assert_eq!(grace(Duration::from_millis(100)), Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (ctx, source, liveness, mut peer) = connected_with_liveness(config()).await;
        let _loop = spawn_loop(&ctx, source);

        let result = run_heartbeat(
            Arc::clone(&ctx),
            liveness,
            Duration::from_secs(10),
            CancellationToken::new(),
        )
        .await;
        assert_matches!(result, HeartbeatResult::TimedOut(silent) if silent > Duration::from_secs(15));
        assert_eq!(peer.recv().await, Some(PeerEvent::Ping));
    }

    #[tokio::test(start_paused = true)]
    async fn answering_peer_stays_alive() {
        let (ctx, source, liveness, mut peer) = connected_with_liveness(config()).await;
        let _loop = spawn_loop(&ctx, source);
        let responder = tokio::spawn(async move {
            let mut pings = 0;
            while let Some(event) = peer.recv().await {
                if event == PeerEvent::Ping {
                    pings += 1;
                    peer.pong();
                }
            }
            pings
        });

        let cancel = CancellationToken::new();
        let heartbeat = tokio::spawn(run_heartbeat(
            Arc::clone(&ctx),
            liveness,
            Duration::from_secs(10),
            cancel.clone(),
        ));

        time::sleep(Duration::from_secs(55)).await;
        assert!(!heartbeat.is_finished());
        cancel.cancel();
        assert_matches!(heartbeat.await.unwrap(), HeartbeatResult::Cancelled);

        let _ = ctx.close_transport(1001).await;
        assert_eq!(responder.await.unwrap(), 5);
    }

    #[tokio::test]
    async fn ping_failure_stops_the_heartbeat() {
        let (ctx, _source, liveness, peer) = connected_with_liveness(config()).await;
        peer.disconnect();
        let result = run_heartbeat(
            ctx,
            liveness,
            Duration::from_millis(5),
            CancellationToken::new(),
        )
        .await;
        assert_matches!(result, HeartbeatResult::PingFailed(TransportError::Closed));
    }

    #[tokio::test]
    async fn cancelled_before_first_tick() {
        let (ctx, _source, liveness, _peer) = connected_with_liveness(config()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_heartbeat(ctx, liveness, Duration::from_secs(60), cancel).await;
        assert_matches!(result, HeartbeatResult::Cancelled);
    }
}
