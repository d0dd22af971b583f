// Session orchestration errors

use crate::error::{AudioError, ChannelError, ErrorCode, TimelineError};
use log::error;
use std::fmt;

/// Session error code constants
///
/// Error code range: 4001-4002. Wrapped errors keep the code of the inner error.
pub struct SessionErrorCodes {}

impl SessionErrorCodes {
    /// Operation not allowed in the current lifecycle state
    pub const INVALID_STATE: i32 = 4001;

    /// Options passed to `start()` are out of range
    pub const INVALID_OPTIONS: i32 = 4002;
}

/// Log a session error with structured context
pub fn log_session_error(err: &SessionError, context: &str) {
    error!(
        "Session error in {}: code={}, component=Session, message={}",
        context,
        err.code(),
        err.message()
    );
    crate::telemetry::hub().record_error(err.code(), context);
}

/// Errors surfaced by `Session` lifecycle calls
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The timeline was rejected; the session did not start
    Timeline(TimelineError),

    /// Audio capture could not start; the session did not start
    Audio(AudioError),

    /// The remote channel could not be set up
    Channel(ChannelError),

    /// Operation not allowed in the current lifecycle state
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// Options passed to `start()` are out of range
    InvalidOptions { reason: String },
}

impl ErrorCode for SessionError {
    fn code(&self) -> i32 {
        match self {
            SessionError::Timeline(err) => err.code(),
            SessionError::Audio(err) => err.code(),
            SessionError::Channel(err) => err.code(),
            SessionError::InvalidState { .. } => SessionErrorCodes::INVALID_STATE,
            SessionError::InvalidOptions { .. } => SessionErrorCodes::INVALID_OPTIONS,
        }
    }

    fn message(&self) -> String {
        match self {
            SessionError::Timeline(err) => err.message(),
            SessionError::Audio(err) => err.message(),
            SessionError::Channel(err) => err.message(),
            SessionError::InvalidState { operation, state } => {
                format!("Cannot {} while session is {}", operation, state)
            }
            SessionError::InvalidOptions { reason } => {
                format!("Invalid session options: {}", reason)
            }
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SessionError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Timeline(err) => Some(err),
            SessionError::Audio(err) => Some(err),
            SessionError::Channel(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TimelineError> for SessionError {
    fn from(err: TimelineError) -> Self {
        SessionError::Timeline(err)
    }
}

impl From<AudioError> for SessionError {
    fn from(err: AudioError) -> Self {
        SessionError::Audio(err)
    }
}

impl From<ChannelError> for SessionError {
    fn from(err: ChannelError) -> Self {
        SessionError::Channel(err)
    }
}
