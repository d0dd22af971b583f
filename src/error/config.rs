// Configuration file errors

use crate::error::ErrorCode;
use std::fmt;

/// Config error code constants
///
/// Error code range: 5001-5002
pub struct ConfigErrorCodes {}

impl ConfigErrorCodes {
    pub const READ_FAILED: i32 = 5001;
    pub const PARSE_FAILED: i32 = 5002;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ReadFailed { path: String, reason: String },
    ParseFailed { path: String, reason: String },
}

impl ErrorCode for ConfigError {
    fn code(&self) -> i32 {
        match self {
            ConfigError::ReadFailed { .. } => ConfigErrorCodes::READ_FAILED,
            ConfigError::ParseFailed { .. } => ConfigErrorCodes::PARSE_FAILED,
        }
    }

    fn message(&self) -> String {
        match self {
            ConfigError::ReadFailed { path, reason } => {
                format!("Failed to read config file {}: {}", path, reason)
            }
            ConfigError::ParseFailed { path, reason } => {
                format!("Failed to parse config file {}: {}", path, reason)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConfigError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ConfigError {}
