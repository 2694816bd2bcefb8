//! Renderer configuration.
//!
//! [`RendererConfig`] is normally built in code by the embedding application;
//! it can also be parsed from TOML. Every field has a default, so an empty
//! document yields [`RendererConfig::default`]. Unknown fields are rejected.
//!
//! ```
//! use novade_frame_pipeline::config::RendererConfig;
//!
//! let config = RendererConfig::from_toml_str(r#"
//! application_name = "demo"
//!
//! [capture]
//! screenshot_queue_capacity = 4
//! "#).unwrap();
//! assert_eq!(config.capture.screenshot_queue_capacity, 4);
//! assert_eq!(config.capture.video_queue_capacity, 128);
//! ```

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use tracing::Level;

/// Preferred presentation mode; falls back to FIFO when unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresentModePreference {
    #[default]
    Mailbox,
    Fifo,
    Immediate,
}

/// Settings for the capture subsystem.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureConfig {
    /// Maximum outstanding screenshot tasks before the caller blocks.
    #[serde(default = "defaults::screenshot_queue_capacity")]
    pub screenshot_queue_capacity: usize,
    /// Maximum outstanding video-frame tasks before the caller blocks.
    #[serde(default = "defaults::video_queue_capacity")]
    pub video_queue_capacity: usize,
    /// Upper bound on the GPU wait for a staging copy.
    #[serde(default = "defaults::staging_timeout_ms")]
    pub staging_timeout_ms: u64,
    /// JPEG quality (1-100) of recorded video frames.
    #[serde(default = "defaults::video_quality")]
    pub video_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            screenshot_queue_capacity: defaults::screenshot_queue_capacity(),
            video_queue_capacity: defaults::video_queue_capacity(),
            staging_timeout_ms: defaults::staging_timeout_ms(),
            video_quality: defaults::video_quality(),
        }
    }
}

/// Settings consumed by [`crate::logging::init_logging`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// "trace", "debug", "info", "warn" or "error". `RUST_LOG` overrides it.
    #[serde(default = "defaults::log_level")]
    pub level: String,
    /// "text" or "json".
    #[serde(default = "defaults::log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            format: defaults::log_format(),
        }
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LoggingConfig {
    /// The configured level, case-insensitive.
    pub fn level(&self) -> Result<Level, ConfigError> {
        match self.level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            other => Err(ConfigError::ValidationError(format!(
                "invalid log level: {}",
                other
            ))),
        }
    }

    pub fn format(&self) -> Result<LogFormat, ConfigError> {
        match self.format.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::ValidationError(format!(
                "invalid log format: {}",
                other
            ))),
        }
    }
}

/// Root configuration of the renderer.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RendererConfig {
    #[serde(default = "defaults::application_name")]
    pub application_name: String,
    /// Enables `VK_LAYER_KHRONOS_validation` and the debug messenger.
    #[serde(default)]
    pub enable_validation: bool,
    #[serde(default)]
    pub present_mode: PresentModePreference,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: defaults::application_name(),
            enable_validation: false,
            present_mode: PresentModePreference::default(),
            capture: CaptureConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RendererConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RendererConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let capture = &self.capture;
        if capture.screenshot_queue_capacity == 0 || capture.video_queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "capture queue capacities must be at least 1".to_string(),
            ));
        }
        if capture.staging_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "staging_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if !(1..=100).contains(&capture.video_quality) {
            return Err(ConfigError::ValidationError(format!(
                "video_quality must be within 1..=100, got {}",
                capture.video_quality
            )));
        }
        self.logging.level()?;
        self.logging.format()?;
        Ok(())
    }
}

mod defaults {
    pub(super) fn application_name() -> String {
        "novade".to_string()
    }

    pub(super) fn screenshot_queue_capacity() -> usize {
        16
    }

    pub(super) fn video_queue_capacity() -> usize {
        128
    }

    /// Matches the 100 ms the GPU gets to finish a one-shot copy.
    pub(super) fn staging_timeout_ms() -> u64 {
        100
    }

    pub(super) fn video_quality() -> u8 {
        90
    }

    pub(super) fn log_level() -> String {
        "info".to_string()
    }

    pub(super) fn log_format() -> String {
        "text".to_string()
    }
}
