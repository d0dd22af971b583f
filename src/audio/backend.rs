//! Capture backend abstraction for the feature extractor.

use std::sync::{Arc, Mutex};

use crate::error::{log_audio_error, AudioError};

use super::buffer_pool::CaptureChannels;

/// What a backend reports once capture is running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureInfo {
    pub sample_rate: u32,
    pub device_name: String,
}

/// First mid-session capture failure, shared between the backend and the
/// feature extractor.
#[derive(Debug, Clone, Default)]
pub struct FaultSlot {
    inner: Arc<Mutex<Option<AudioError>>>,
}

impl FaultSlot {
    /// Record a failure. Only the first one is kept.
    pub fn report(&self, err: AudioError) {
        let mut slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            log_audio_error(&err, "capture stream");
            *slot = Some(err);
        }
    }

    pub fn get(&self) -> Option<AudioError> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_faulted(&self) -> bool {
        self.get().is_some()
    }
}

/// Everything a backend needs to feed the analysis worker.
pub struct CaptureStartContext {
    pub channels: CaptureChannels,
    pub fault: FaultSlot,
}

/// Trait implemented by audio input sources.
///
/// `start` either has audio flowing into `ctx.channels` when it returns `Ok`,
/// or returns the reason the device could not be acquired and leaves nothing
/// running. Failures after a successful start go to `ctx.fault`.
pub trait CaptureBackend: Send {
    fn name(&self) -> &str;
    fn start(&mut self, ctx: CaptureStartContext) -> Result<CaptureInfo, AudioError>;
    /// Stop capture and release the device. Safe to call when not running.
    fn stop(&mut self);
}
