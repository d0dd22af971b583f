// Guitar Trainer Core - real-time chord performance judgment
// Audio capture, chroma analysis, local/remote chord recognition, timing
// judgment and scoring behind a single tick-driven `Session`.

// Module declarations
pub mod analysis;
pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod judgment;
pub mod remote;
pub mod scoring;
pub mod session;
pub mod telemetry;
pub mod timeline;

// Re-exports for convenience
pub use analysis::{FeatureWindow, RecognitionResult, RecognitionSource};
pub use config::{AppConfig, RecognitionMode, SessionOptions};
pub use error::{AudioError, ChannelError, ErrorCode, SessionError, TimelineError};
pub use judgment::{Difficulty, HitWindow, Outcome, Verdict};
pub use scoring::SessionState;
pub use session::{Lifecycle, PublishedState, Session};
pub use timeline::ChordEvent;

use std::sync::Once;

static LOGGING: Once = Once::new();

/// Install the tracing subscriber (`RUST_LOG`, default `info`).
///
/// `log` records from the engine are bridged into tracing. Safe to call more
/// than once; only the first call installs anything.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        if tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
            .is_err()
        {
            log::debug!("Logging already initialized by the host");
        }
    });
}
