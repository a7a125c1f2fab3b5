//! Structured logging with `tracing`.
//!
//! The connection crates only emit events through `tracing` macros; the
//! embedding application decides where they go. [`init_subscriber`] is the
//! stock choice: compact human-readable output on stderr with an
//! [`EnvFilter`](tracing_subscriber::EnvFilter) that honours `RUST_LOG`.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

/// Default filter directive when neither `RUST_LOG` nor a level is given.
pub const DEFAULT_LEVEL: &str = "warn";

/// Initialize the global tracing subscriber with stderr output.
///
/// Call once at application startup. Subsequent calls are no-ops.
/// `RUST_LOG` takes precedence over `level` when it is set and valid.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let level = if level.is_empty() { DEFAULT_LEVEL } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // set_global_default fails if already set; that is fine
    let _ = subscriber.try_init();
}

/// Initialize the global tracing subscriber with newline-delimited JSON output.
///
/// Intended for processes whose stderr is collected by a log shipper.
pub fn init_json_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let level = if level.is_empty() { DEFAULT_LEVEL } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .json();

    let _ = subscriber.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_subscriber_is_idempotent() {
        init_subscriber("warn");
        init_subscriber("debug");
        init_json_subscriber("info");
    }

    #[test]
    fn empty_level_falls_back_to_default() {
        init_subscriber("");
        assert_eq!(DEFAULT_LEVEL, "warn");
    }
}
