//! Error types for the frame pipeline.
//!
//! Every fallible operation in the crate returns [`RenderError`]. The frame
//! loop distinguishes two classes of failure: conditions the pipeline
//! recovers from internally (an out-of-date swapchain is rebuilt and never
//! reaches the caller) and fatal conditions after which no render or
//! teardown state is safe to continue from. [`RenderError::is_fatal`] tells
//! them apart; [`abort_on_fatal`] gives binaries the process-ending behavior.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// A specialized `Result` type for frame pipeline operations.
pub type Result<T> = std::result::Result<T, RenderError>;

/// The error type for frame pipeline operations.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A device call failed with a code the pipeline does not recover from.
    #[error("Vulkan call `{call}` failed: {result}")]
    Vulkan {
        call: &'static str,
        #[source]
        result: vk::Result,
    },

    /// The swapchain was still out of date after a recreate.
    #[error("Swapchain reported out of date twice in a row during acquire")]
    SwapchainOutOfDate,

    /// Rebuilding swapchain-dependent resources failed part way.
    #[error("Recreate failed while building {stage}: {result}")]
    RecreateFailed {
        stage: &'static str,
        #[source]
        result: vk::Result,
    },

    /// The GPU did not finish a capture copy within the configured timeout.
    #[error("Capture copy did not complete within {timeout_ms} ms")]
    CaptureTimeout { timeout_ms: u64 },

    /// The staging image is not tightly packed.
    #[error("Staging row pitch {row_pitch} does not match width * 4 = {expected}")]
    UnsupportedRowPitch { row_pitch: u64, expected: u64 },

    /// A second renderer context was created while one is alive.
    #[error("A renderer context already exists in this process")]
    ContextAlreadyExists,

    /// `end_frame` received a context that does not belong to the active slot.
    #[error("Frame context for slot {got} does not match active slot {expected}")]
    FrameMismatch { expected: usize, got: usize },

    /// A capture was requested before any frame was presented.
    #[error("No frame has been presented yet")]
    NothingPresented,

    /// The Vulkan loader could not be found or opened.
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// No physical device satisfies the pipeline's requirements.
    #[error("No suitable physical device: {0}")]
    NoSuitableDevice(String),

    /// Opening or finishing a capture output file failed.
    #[error("Capture output {path:?}: {source}")]
    CaptureIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be parsed or failed validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RenderError {
    /// Wraps a raw `vk::Result` with the name of the failing call.
    pub fn vulkan(call: &'static str) -> impl FnOnce(vk::Result) -> RenderError {
        move |result| RenderError::Vulkan { call, result }
    }

    /// Whether the error leaves the GPU state unusable.
    pub fn is_fatal(&self) -> bool {
        match self {
            RenderError::Vulkan { .. }
            | RenderError::SwapchainOutOfDate
            | RenderError::RecreateFailed { .. }
            | RenderError::CaptureTimeout { .. }
            | RenderError::UnsupportedRowPitch { .. }
            | RenderError::ContextAlreadyExists
            | RenderError::FrameMismatch { .. }
            | RenderError::Loading(_)
            | RenderError::NoSuitableDevice(_) => true,
            RenderError::NothingPresented
            | RenderError::CaptureIo { .. }
            | RenderError::Config(_) => false,
        }
    }
}

/// Error type for configuration parsing and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration file from {path:?}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML text is malformed or contains unknown fields.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A value parsed but is out of range.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Logs a fatal error and aborts the process; non-fatal errors are returned.
///
/// Intended for binaries driving the frame loop, where a fatal GPU state must
/// not be continued from.
pub fn abort_on_fatal<T>(result: Result<T>) -> Result<T> {
    match result {
        Err(err) if err.is_fatal() => {
            tracing::error!(error = %err, "Fatal render error, aborting");
            std::process::abort();
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_and_fatal_classification() {
        assert!(RenderError::SwapchainOutOfDate.is_fatal());
        assert!(RenderError::CaptureTimeout { timeout_ms: 100 }.is_fatal());
        assert!(RenderError::UnsupportedRowPitch { row_pitch: 3328, expected: 3200 }.is_fatal());
        assert!(!RenderError::NothingPresented.is_fatal());
        assert!(!RenderError::Config(ConfigError::ValidationError("x".into())).is_fatal());
    }

    #[test]
    fn vulkan_helper_keeps_call_name() {
        let err = RenderError::vulkan("vkQueueSubmit")(vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(
            err.to_string(),
            format!("Vulkan call `vkQueueSubmit` failed: {}", vk::Result::ERROR_DEVICE_LOST)
        );
    }

    #[test]
    fn abort_on_fatal_passes_through_recoverable() {
        let result: Result<()> = Err(RenderError::NothingPresented);
        assert!(matches!(abort_on_fatal(result), Err(RenderError::NothingPresented)));
        assert_eq!(abort_on_fatal(Ok(7)).unwrap(), 7);
    }
}
