// Audio module - capture backends feeding the lock-free buffer pool

pub mod backend;
pub mod buffer_pool;
pub mod cpal_backend;
pub mod fixture;

pub use backend::{CaptureBackend, CaptureInfo, CaptureStartContext, FaultSlot};
pub use buffer_pool::{AnalysisChannels, AudioBuffer, BufferPool, CaptureChannels};
pub use cpal_backend::CpalCaptureBackend;
pub use fixture::{FixtureCaptureBackend, FIXTURE_SAMPLE_RATE};
