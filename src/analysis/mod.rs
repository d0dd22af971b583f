// Analysis module - feature windows, chroma extraction and local recognition
//
// Architecture:
// - FeatureExtractor: owns the capture backend and a worker thread that
//   consumes buffers from the DATA_QUEUE, keeps the last `fft_size` samples
//   and emits a chroma FeatureWindow every `sample_rate / target_rate_hz`
//   new samples
// - Windows reach the session tick through a bounded SPSC queue; when the
//   tick falls behind the newest window is dropped and counted
// - LocalChordClassifier: template matching over the window's chroma

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rtrb::{Consumer, PopError, Producer};
use serde::{Deserialize, Serialize};

use crate::audio::{
    AnalysisChannels, BufferPool, CaptureBackend, CaptureInfo, CaptureStartContext, FaultSlot,
};
use crate::clock::SessionClock;
use crate::config::{AnalysisConfig, AudioConfig};
use crate::error::AudioError;
use crate::telemetry;

pub mod classifier;
pub mod features;

pub use classifier::{LocalChordClassifier, UNRECOGNIZED_LABEL};
use features::ChromaExtractor;

/// Number of pitch classes in a chroma feature vector (C..B)
pub const CHROMA_BINS: usize = 12;

/// One short-window feature vector produced by the extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureWindow {
    /// Session clock reading when the window was completed
    pub captured_at_ms: u64,
    /// Normalized chroma (12 bins)
    pub samples: Vec<f32>,
    /// Strictly increasing within one `start()`, starting at 0
    pub sequence_number: u64,
}

/// Which recognizer produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionSource {
    Local,
    Remote,
}

/// Chord recognized for one feature window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub sequence_number: u64,
    pub chord_label: String,
    /// In [0, 1]
    pub confidence: f32,
    pub source: RecognitionSource,
    pub recognized_at_ms: u64,
}

/// Continuous audio sampling into feature windows
pub struct FeatureExtractor {
    backend: Box<dyn CaptureBackend>,
    audio_config: AudioConfig,
    analysis_config: AnalysisConfig,
    clock: Arc<SessionClock>,
    windows: Option<Consumer<FeatureWindow>>,
    worker: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    fault: FaultSlot,
    dropped_windows: Arc<AtomicU64>,
    capture_info: Option<CaptureInfo>,
}

impl FeatureExtractor {
    pub fn new(
        backend: Box<dyn CaptureBackend>,
        audio_config: AudioConfig,
        analysis_config: AnalysisConfig,
        clock: Arc<SessionClock>,
    ) -> Self {
        Self {
            backend,
            audio_config,
            analysis_config,
            clock,
            windows: None,
            worker: None,
            running: Arc::new(AtomicBool::new(false)),
            fault: FaultSlot::default(),
            dropped_windows: Arc::new(AtomicU64::new(0)),
            capture_info: None,
        }
    }

    /// Stamp windows from a different clock. Takes effect on the next `start()`.
    pub fn set_clock(&mut self, clock: Arc<SessionClock>) {
        self.clock = clock;
    }

    /// Acquire the audio device and begin producing windows
    ///
    /// On failure the extractor stays stopped and `start` may be retried.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.worker.is_some() {
            return Err(AudioError::AlreadyRunning);
        }

        let (capture_channels, analysis_channels) = BufferPool::new(
            self.audio_config.buffer_count.max(1),
            self.audio_config.buffer_size.max(1),
        )
        .split();

        let fault = FaultSlot::default();
        let info = self.backend.start(CaptureStartContext {
            channels: capture_channels,
            fault: fault.clone(),
        })?;

        let (producer, consumer) =
            rtrb::RingBuffer::new(self.analysis_config.window_queue_capacity.max(1));
        self.running.store(true, Ordering::SeqCst);
        self.dropped_windows.store(0, Ordering::Relaxed);

        let worker = FeatureWorker::new(
            analysis_channels,
            producer,
            ChromaExtractor::new(info.sample_rate, &self.analysis_config),
            hop_size(info.sample_rate, self.analysis_config.target_rate_hz),
            Arc::clone(&self.clock),
            Arc::clone(&self.running),
            Arc::clone(&self.dropped_windows),
        );

        let handle = match thread::Builder::new()
            .name("feature-extractor".to_string())
            .spawn(move || worker.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.backend.stop();
                return Err(e.into());
            }
        };

        log::info!(
            "[FeatureExtractor] Started on '{}' ({} backend, {} Hz)",
            info.device_name,
            self.backend.name(),
            info.sample_rate
        );

        self.windows = Some(consumer);
        self.worker = Some(handle);
        self.fault = fault;
        self.capture_info = Some(info);
        Ok(())
    }

    /// Halt sampling and release the audio device. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.backend.stop();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("[FeatureExtractor] Worker thread panicked");
            }
            log::info!(
                "[FeatureExtractor] Stopped ({} windows dropped)",
                self.dropped_windows.load(Ordering::Relaxed)
            );
        }
        self.windows = None;
        self.capture_info = None;
    }

    /// Take every window produced since the last drain, oldest first
    pub fn drain_windows(&mut self) -> Vec<FeatureWindow> {
        let Some(consumer) = self.windows.as_mut() else {
            return Vec::new();
        };
        let mut drained = Vec::with_capacity(consumer.slots());
        while let Ok(window) = consumer.pop() {
            drained.push(window);
        }
        drained
    }

    /// Mid-session capture failure, if one occurred since `start()`
    pub fn fault(&self) -> Option<AudioError> {
        self.fault.get()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn dropped_windows(&self) -> u64 {
        self.dropped_windows.load(Ordering::Relaxed)
    }

    pub fn capture_info(&self) -> Option<&CaptureInfo> {
        self.capture_info.as_ref()
    }
}

impl Drop for FeatureExtractor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn hop_size(sample_rate: u32, target_rate_hz: u32) -> usize {
    (sample_rate / target_rate_hz.max(1)).max(1) as usize
}

struct FeatureWorker {
    channels: AnalysisChannels,
    windows: Producer<FeatureWindow>,
    chroma: ChromaExtractor,
    hop: usize,
    history: VecDeque<f32>,
    since_last: usize,
    next_sequence: u64,
    clock: Arc<SessionClock>,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl FeatureWorker {
    fn new(
        channels: AnalysisChannels,
        windows: Producer<FeatureWindow>,
        chroma: ChromaExtractor,
        hop: usize,
        clock: Arc<SessionClock>,
        running: Arc<AtomicBool>,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        let fft_size = chroma.fft_size();
        Self {
            channels,
            windows,
            chroma,
            hop,
            history: VecDeque::with_capacity(fft_size),
            since_last: 0,
            next_sequence: 0,
            clock,
            running,
            dropped,
        }
    }

    fn run(mut self) {
        tracing::debug!("[FeatureExtractor] Worker started (hop {} samples)", self.hop);

        while self.running.load(Ordering::SeqCst) {
            let buffer = match self.channels.data_consumer.pop() {
                Ok(buffer) => buffer,
                Err(PopError::Empty) => {
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }
            };

            for &sample in buffer.iter() {
                self.push_sample(sample);
            }

            if self.channels.pool_producer.push(buffer).is_err() {
                tracing::warn!("[FeatureExtractor] Pool queue full, dropping buffer");
            }
        }

        tracing::debug!("[FeatureExtractor] Worker exiting");
    }

    fn push_sample(&mut self, sample: f32) {
        let fft_size = self.chroma.fft_size();
        if self.history.len() == fft_size {
            self.history.pop_front();
        }
        self.history.push_back(sample);
        self.since_last += 1;

        if self.since_last >= self.hop && self.history.len() == fft_size {
            self.since_last = 0;
            self.emit_window();
        }
    }

    fn emit_window(&mut self) {
        let chroma = self.chroma.extract(self.history.make_contiguous());
        let window = FeatureWindow {
            captured_at_ms: self.clock.now_ms(),
            samples: chroma.to_vec(),
            sequence_number: self.next_sequence,
        };
        self.next_sequence += 1;

        if self.windows.push(window).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }

        let capacity = self.windows.buffer().capacity();
        let used = capacity - self.windows.slots();
        telemetry::hub()
            .record_queue_occupancy("feature_windows", used as f32 / capacity as f32 * 100.0);
    }
}
