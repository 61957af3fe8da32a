//! `tracing` subscriber setup

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when neither `RUST_LOG` nor the config provide one
pub const DEFAULT_FILTER: &str = "warn";

/// Pick the filter: `RUST_LOG`, then `configured`, then [`DEFAULT_FILTER`]
pub fn filter(configured: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured.unwrap_or(DEFAULT_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a stderr subscriber
///
/// Returns `false` if a global subscriber was already installed, which is
/// the normal case when several tests initialise logging.
pub fn init(configured: Option<&str>) -> bool {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter(configured))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init(Some("skein_runtime=debug"));
        assert!(!init(None));
    }

    #[test]
    fn test_invalid_filter_falls_back() {
        // Must not panic on a malformed directive
        let _ = filter(Some("=[not a filter"));
    }
}
