// Audio capture error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Audio error code constants
///
/// Error code range: 1001-1008
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// No usable input device was found
    pub const DEVICE_UNAVAILABLE: i32 = 1001;

    /// Capture is already running
    pub const ALREADY_RUNNING: i32 = 1002;

    /// Capture is not running
    pub const NOT_RUNNING: i32 = 1003;

    /// Hardware error occurred
    pub const HARDWARE_ERROR: i32 = 1004;

    /// Microphone permission denied
    pub const PERMISSION_DENIED: i32 = 1005;

    /// Failed to open audio stream
    pub const STREAM_OPEN_FAILED: i32 = 1006;

    /// Capture stream stopped delivering audio mid-session
    pub const STREAM_FAILURE: i32 = 1007;

    /// Fixture audio could not be loaded
    pub const FIXTURE_LOAD: i32 = 1008;
}

/// Log an audio error with structured context
///
/// Logs the numeric code and message and records the error in telemetry.
/// The logging is non-blocking and will not panic on failure.
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=FeatureExtractor, message={}",
        context,
        err.code(),
        err.message()
    );
    crate::telemetry::hub().record_error(err.code(), context);
}

/// Audio-related errors
///
/// `DeviceUnavailable`, `PermissionDenied` and `StreamOpenFailed` mean the
/// device could not be acquired: the session does not start and the caller
/// may retry.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// No usable input device was found
    DeviceUnavailable { reason: String },

    /// Capture is already running
    AlreadyRunning,

    /// Capture is not running
    NotRunning,

    /// Hardware error occurred
    HardwareError { details: String },

    /// Microphone permission denied
    PermissionDenied,

    /// Failed to open audio stream
    StreamOpenFailed { reason: String },

    /// Capture stream stopped delivering audio mid-session
    StreamFailure { reason: String },

    /// Fixture audio could not be loaded
    FixtureLoad { path: String, reason: String },
}

impl AudioError {
    /// True when the device could not be acquired at all (retryable at start).
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            AudioError::DeviceUnavailable { .. }
                | AudioError::PermissionDenied
                | AudioError::StreamOpenFailed { .. }
                | AudioError::FixtureLoad { .. }
        )
    }
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::DeviceUnavailable { .. } => AudioErrorCodes::DEVICE_UNAVAILABLE,
            AudioError::AlreadyRunning => AudioErrorCodes::ALREADY_RUNNING,
            AudioError::NotRunning => AudioErrorCodes::NOT_RUNNING,
            AudioError::HardwareError { .. } => AudioErrorCodes::HARDWARE_ERROR,
            AudioError::PermissionDenied => AudioErrorCodes::PERMISSION_DENIED,
            AudioError::StreamOpenFailed { .. } => AudioErrorCodes::STREAM_OPEN_FAILED,
            AudioError::StreamFailure { .. } => AudioErrorCodes::STREAM_FAILURE,
            AudioError::FixtureLoad { .. } => AudioErrorCodes::FIXTURE_LOAD,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::DeviceUnavailable { reason } => {
                format!("Audio input unavailable: {}", reason)
            }
            AudioError::AlreadyRunning => {
                "Audio capture already running. Call stop() first.".to_string()
            }
            AudioError::NotRunning => "Audio capture not running. Call start() first.".to_string(),
            AudioError::HardwareError { details } => {
                format!("Hardware error: {}", details)
            }
            AudioError::PermissionDenied => {
                "Microphone permission denied. Please grant microphone access.".to_string()
            }
            AudioError::StreamOpenFailed { reason } => {
                format!("Failed to open audio stream: {}", reason)
            }
            AudioError::StreamFailure { reason } => {
                format!("Audio stream failed: {}", reason)
            }
            AudioError::FixtureLoad { path, reason } => {
                format!("Failed to load fixture audio {}: {}", path, reason)
            }
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::HardwareError {
            details: err.to_string(),
        }
    }
}
