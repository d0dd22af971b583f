// Error types for the guitar trainer engine
//
// Every error carries a stable numeric code so hosts can react to failures
// without parsing messages. Ranges: audio 1xxx, timeline 2xxx, channel 3xxx,
// session 4xxx, config 5xxx.

mod audio;
mod channel;
mod config;
mod session;
mod timeline;

pub use audio::{log_audio_error, AudioError, AudioErrorCodes};
pub use channel::{log_channel_error, ChannelError, ChannelErrorCodes};
pub use config::{ConfigError, ConfigErrorCodes};
pub use session::{log_session_error, SessionError, SessionErrorCodes};
pub use timeline::{TimelineError, TimelineErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling for
/// embedding hosts and telemetry.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
