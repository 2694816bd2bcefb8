//! Logging setup built on `tracing-subscriber`.
//!
//! The library itself only emits `tracing` events; these helpers are for the
//! binary or test harness that owns the process.

use crate::config::{LogFormat, LoggingConfig};
use crate::error::ConfigError;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Installs a stderr subscriber filtered by `RUST_LOG`, defaulting to `info`.
///
/// Errors (e.g. a global subscriber is already set) are ignored, so this is
/// safe to call from every test.
pub fn init_minimal_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Installs a subscriber configured by [`LoggingConfig`].
///
/// `RUST_LOG` takes precedence over the configured level when set. Returns
/// `Ok(false)` if a global subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<bool, ConfigError> {
    let level = config.level()?;
    let format = config.format()?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let installed = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok(),
    };
    Ok(installed)
}
