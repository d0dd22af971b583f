//! Configuration management
//!
//! `AppConfig` is loaded from a JSON file (falling back to defaults) and
//! carries the knobs for capture, analysis and the remote channel.
//! `SessionOptions` is the per-session options object handed to
//! `Session::start`: confidence threshold, pre-roll, grace period and the
//! difficulty profile supplied by song selection.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{ConfigError, SessionError};
use crate::judgment::{Difficulty, HitWindow};

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionOptions,
    pub audio: AudioConfig,
    pub analysis: AnalysisConfig,
    pub remote: RemoteConfig,
}

/// Which recognition paths feed the judgment state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionMode {
    /// Only the local classifier; windows are never sent to the remote channel
    Local,
    /// Remote results only, local classifier used while the channel is degraded
    Remote,
    /// Both paths, whichever usable result arrives first wins
    #[default]
    Hybrid,
}

/// Options passed to `Session::start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Minimum confidence for a matching label to count as a hit
    pub confidence_threshold: f32,
    /// How early before its nominal start an event accepts input
    pub pre_roll_ms: u64,
    /// Time after the last event's end before the session completes
    pub trailing_grace_ms: u64,
    /// Difficulty preset selecting the hit window
    pub difficulty: Difficulty,
    /// Explicit hit window, overrides the difficulty preset when set
    pub hit_window: Option<HitWindow>,
    pub recognition_mode: RecognitionMode,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.65,
            pre_roll_ms: 500,
            trailing_grace_ms: 2000,
            difficulty: Difficulty::Medium,
            hit_window: None,
            recognition_mode: RecognitionMode::Hybrid,
        }
    }
}

impl SessionOptions {
    /// Hit window in effect: the explicit override, else the difficulty preset.
    pub fn effective_hit_window(&self) -> HitWindow {
        self.hit_window
            .unwrap_or_else(|| self.difficulty.hit_window())
    }

    /// Reject options the judgment state machine cannot work with.
    pub fn validate(&self) -> Result<(), SessionError> {
        if !self.confidence_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.confidence_threshold)
        {
            return Err(SessionError::InvalidOptions {
                reason: format!(
                    "confidence_threshold must be within [0, 1] (got {})",
                    self.confidence_threshold
                ),
            });
        }

        let window = self.effective_hit_window();
        if !window.is_ordered() {
            return Err(SessionError::InvalidOptions {
                reason: format!(
                    "hit window must satisfy perfect <= good <= miss (got {}/{}/{})",
                    window.perfect_ms, window.good_ms, window.miss_ms
                ),
            });
        }

        Ok(())
    }
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Number of buffers circulating between capture and analysis
    pub buffer_count: usize,
    /// Size of each audio buffer in samples
    pub buffer_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            buffer_count: 64,
            buffer_size: 1024,
        }
    }
}

/// Feature extraction and local classification parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// FFT frame length in samples
    pub fft_size: usize,
    /// Nominal feature window cadence
    pub target_rate_hz: u32,
    /// Lowest similarity the local classifier reports as a chord
    pub min_similarity: f32,
    /// Frames quieter than this RMS produce an all-zero chroma
    pub silence_rms: f32,
    /// Capacity of the window queue between the analysis worker and the tick
    pub window_queue_capacity: usize,
    /// Frequency band folded into the chroma
    pub min_hz: f32,
    pub max_hz: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: 4096,
            target_rate_hz: 60,
            min_similarity: 0.3,
            silence_rms: 1e-3,
            window_queue_capacity: 256,
            min_hz: 60.0,
            max_hz: 2000.0,
        }
    }
}

/// Remote recognition backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// WebSocket endpoint; remote recognition is off when unset
    pub url: Option<String>,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            initial_backoff_ms: 1000,
            max_backoff_ms: 16_000,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The loaded configuration, or defaults (with a warning) when the file is
    /// missing or its JSON is invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match Self::load_from_file_strict(&path) {
            Ok(config) => {
                log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                config
            }
            Err(err) => {
                log::warn!("[Config] {}. Using defaults.", err);
                Self::default()
            }
        }
    }

    /// Load configuration from JSON file, surfacing read and parse failures
    pub fn load_from_file_strict<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let display = path.as_ref().display().to_string();
        let contents = fs::read_to_string(&path).map_err(|err| ConfigError::ReadFailed {
            path: display.clone(),
            reason: err.to_string(),
        })?;
        serde_json::from_str(&contents).map_err(|err| ConfigError::ParseFailed {
            path: display,
            reason: err.to_string(),
        })
    }
}
