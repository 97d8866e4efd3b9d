//! Structured logging setup.
//!
//! Installs the global `tracing` subscriber from [`LoggingConfig`].
//! `RUST_LOG` takes precedence over the configured level/filter so a
//! deployment can be re-leveled without editing its config file.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Install the global subscriber. Errors if one is already set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match &config.filter {
            Some(directives) => EnvFilter::new(directives),
            None => EnvFilter::new(config.level.to_string().to_lowercase()),
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| ProtocolError::ConfigError(format!("failed to install subscriber: {e}")))
}

/// Best-effort init for tests and tools; ignores an existing subscriber.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
