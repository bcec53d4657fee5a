//! Tracing subscriber setup

use std::sync::Once;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

/// Logging profile, chosen from `APP_ENV`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Human-readable output with debug logs for this crate
    Development,
    /// JSON lines at info level
    Production,
    /// Nothing is installed; tests bring their own subscriber if they want one
    Test,
}

static INIT_ONCE: Once = Once::new();

/// Install the global subscriber. Later calls are ignored.
///
/// `RUST_LOG` overrides the profile's default filter.
pub fn init(profile: Profile) {
    INIT_ONCE.call_once(|| match profile {
        Profile::Development => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new("info,webapp_api=debug")),
                )
                .with_target(true)
                .finish()
                .try_init();
        }
        Profile::Production => {
            let _ = tracing_subscriber::fmt()
                .json()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .with_current_span(false)
                .finish()
                .try_init();
        }
        Profile::Test => {}
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_idempotent() {
        init(Profile::Test);
        init(Profile::Development);
        init(Profile::Production);
    }
}
