// Remote recognition channel errors

use crate::error::ErrorCode;
use log::warn;
use std::fmt;

/// Channel error code constants
///
/// Error code range: 3001-3005
pub struct ChannelErrorCodes {}

impl ChannelErrorCodes {
    /// Connection attempt failed
    pub const CONNECT_FAILED: i32 = 3001;

    /// Outbound frame could not be written
    pub const SEND_FAILED: i32 = 3002;

    /// Inbound stream reported an error
    pub const RECEIVE_FAILED: i32 = 3003;

    /// Inbound payload did not match the wire protocol
    pub const PROTOCOL: i32 = 3004;

    /// Channel is already connected
    pub const ALREADY_CONNECTED: i32 = 3005;
}

/// Log a channel error
///
/// Channel errors never stop a session, so they are logged at warn level.
pub fn log_channel_error(err: &ChannelError, context: &str) {
    warn!(
        "Channel error in {}: code={}, component=RemoteChannel, message={}",
        context,
        err.code(),
        err.message()
    );
    crate::telemetry::hub().record_error(err.code(), context);
}

/// Failures of the remote recognition transport
///
/// These never cross the tick boundary: the channel turns them into a
/// degraded status and keeps reconnecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    ConnectFailed { url: String, reason: String },
    SendFailed { reason: String },
    ReceiveFailed { reason: String },
    Protocol { reason: String },
    AlreadyConnected,
}

impl ErrorCode for ChannelError {
    fn code(&self) -> i32 {
        match self {
            ChannelError::ConnectFailed { .. } => ChannelErrorCodes::CONNECT_FAILED,
            ChannelError::SendFailed { .. } => ChannelErrorCodes::SEND_FAILED,
            ChannelError::ReceiveFailed { .. } => ChannelErrorCodes::RECEIVE_FAILED,
            ChannelError::Protocol { .. } => ChannelErrorCodes::PROTOCOL,
            ChannelError::AlreadyConnected => ChannelErrorCodes::ALREADY_CONNECTED,
        }
    }

    fn message(&self) -> String {
        match self {
            ChannelError::ConnectFailed { url, reason } => {
                format!("Failed to connect to {}: {}", url, reason)
            }
            ChannelError::SendFailed { reason } => format!("Failed to send frame: {}", reason),
            ChannelError::ReceiveFailed { reason } => {
                format!("Failed to receive frame: {}", reason)
            }
            ChannelError::Protocol { reason } => format!("Malformed payload: {}", reason),
            ChannelError::AlreadyConnected => {
                "Remote channel already connected. Call disconnect() first.".to_string()
            }
        }
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ChannelError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ChannelError {}
