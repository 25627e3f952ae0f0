//! Tracing subscriber setup for hosts that do not install their own.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor a log level is given.
pub const DEFAULT_FILTER: &str = "connector_runtime=info";

/// Picks the filter: `RUST_LOG` first, then `log_level`, then
/// [`DEFAULT_FILTER`].
pub fn env_filter(log_level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| match log_level {
            Some(level) => EnvFilter::try_new(level),
            None => EnvFilter::try_new(DEFAULT_FILTER),
        })
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs a global fmt subscriber.
///
/// Returns `false` if a global subscriber was already set, in which case
/// that one stays in place.
pub fn init_tracing(log_level: Option<&str>) -> bool {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_level_falls_back_to_default() {
        // An unparseable directive must not panic.
        let filter = env_filter(Some("connector_runtime=[[nonsense"));
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    fn second_init_is_refused() {
        init_tracing(Some("warn"));
        assert!(!init_tracing(Some("warn")));
    }
}
