//! Deterministic capture sources for tests, replays and the CLI.
//!
//! A fixture backend feeds PCM into the same buffer pool the microphone
//! backend uses, from a feeder thread, so the whole analysis path runs
//! without audio hardware. Sources: silence, a synthetic chord (sine
//! partials voiced upward from the root in octave 4, optional seeded noise),
//! or samples decoded from a WAV file. Scripted faults cover both device
//! acquisition failure and a stream that dies mid-session.

use std::f32::consts::PI;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::analysis::classifier::{chord_tones, parse_chord_label};
use crate::error::AudioError;

use super::backend::{CaptureBackend, CaptureInfo, CaptureStartContext};
use super::buffer_pool::CaptureChannels;

/// Sample rate used for synthetic fixtures
pub const FIXTURE_SAMPLE_RATE: u32 = 44_100;

const DEFAULT_CHUNK_SIZE: usize = 512;
const C4_HZ: f32 = 261.625_58;

/// Frequencies of a chord voiced upward from its root in octave 4
pub fn chord_frequencies(label: &str) -> Option<Vec<f32>> {
    let (root, _) = parse_chord_label(label)?;
    let tones = chord_tones(label)?;
    let mut semitones: Vec<usize> = tones
        .into_iter()
        .map(|pc| root + (pc + 12 - root) % 12)
        .collect();
    semitones.sort_unstable();
    Some(
        semitones
            .into_iter()
            .map(|st| C4_HZ * 2f32.powf(st as f32 / 12.0))
            .collect(),
    )
}

/// Render `duration_ms` of a synthetic chord
pub fn synthesize_chord(
    label: &str,
    sample_rate: u32,
    duration_ms: u64,
    amplitude: f32,
) -> Result<Vec<f32>, AudioError> {
    let freqs = chord_frequencies(label).ok_or_else(|| unknown_chord(label))?;
    let len = (sample_rate as u64 * duration_ms / 1000) as usize;
    let mut cursor = SignalCursor::new(
        FixtureSignal::Tones {
            freqs,
            amplitude,
            noise: 0.0,
        },
        sample_rate,
        false,
        0,
    );
    Ok((0..len).map(|_| cursor.next_sample()).collect())
}

fn unknown_chord(label: &str) -> AudioError {
    AudioError::FixtureLoad {
        path: format!("synthetic:{}", label),
        reason: "unknown chord label".to_string(),
    }
}

#[derive(Debug, Clone)]
enum FixtureSignal {
    Silence,
    Tones {
        freqs: Vec<f32>,
        amplitude: f32,
        noise: f32,
    },
    Samples(Arc<Vec<f32>>),
}

struct SignalCursor {
    signal: FixtureSignal,
    sample_rate: u32,
    looping: bool,
    position: u64,
    rng: StdRng,
}

impl SignalCursor {
    fn new(signal: FixtureSignal, sample_rate: u32, looping: bool, seed: u64) -> Self {
        Self {
            signal,
            sample_rate,
            looping,
            position: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn next_sample(&mut self) -> f32 {
        let position = self.position;
        self.position += 1;

        match &self.signal {
            FixtureSignal::Silence => 0.0,
            FixtureSignal::Tones {
                freqs,
                amplitude,
                noise,
            } => {
                let t = position as f32 / self.sample_rate as f32;
                let voices = freqs.len().max(1) as f32;
                let tone: f32 = freqs.iter().map(|f| (2.0 * PI * f * t).sin()).sum();
                let hiss = if *noise > 0.0 {
                    self.rng.gen_range(-1.0_f32..1.0) * *noise
                } else {
                    0.0
                };
                tone * amplitude / voices + hiss
            }
            FixtureSignal::Samples(samples) => {
                if samples.is_empty() {
                    return 0.0;
                }
                let len = samples.len() as u64;
                if self.looping {
                    samples[(position % len) as usize]
                } else {
                    samples.get(position as usize).copied().unwrap_or(0.0)
                }
            }
        }
    }

    fn fill(&mut self, chunk: &mut [f32]) {
        for slot in chunk.iter_mut() {
            *slot = self.next_sample();
        }
    }
}

/// Capture backend that plays a scripted signal
pub struct FixtureCaptureBackend {
    name: String,
    signal: FixtureSignal,
    sample_rate: u32,
    chunk_size: usize,
    paced: bool,
    looping: bool,
    seed: u64,
    fail_after_buffers: Option<usize>,
    unavailable: Option<(usize, String)>,
    start_attempts: usize,
    running: Arc<AtomicBool>,
    feeder: Option<JoinHandle<()>>,
}

impl FixtureCaptureBackend {
    fn with_signal(name: impl Into<String>, signal: FixtureSignal, sample_rate: u32) -> Self {
        Self {
            name: name.into(),
            signal,
            sample_rate: sample_rate.max(1),
            chunk_size: DEFAULT_CHUNK_SIZE,
            paced: true,
            looping: false,
            seed: 0x5A5A_FFF0,
            fail_after_buffers: None,
            unavailable: None,
            start_attempts: 0,
            running: Arc::new(AtomicBool::new(false)),
            feeder: None,
        }
    }

    pub fn silence(sample_rate: u32) -> Self {
        Self::with_signal("silence", FixtureSignal::Silence, sample_rate)
    }

    /// Sustained synthetic chord at amplitude 0.5
    pub fn chord(label: &str, sample_rate: u32) -> Result<Self, AudioError> {
        let freqs = chord_frequencies(label).ok_or_else(|| unknown_chord(label))?;
        Ok(Self::with_signal(
            format!("chord:{}", label),
            FixtureSignal::Tones {
                freqs,
                amplitude: 0.5,
                noise: 0.0,
            },
            sample_rate,
        ))
    }

    /// Samples decoded from a WAV file, folded to mono
    pub fn from_wav<P: AsRef<Path>>(path: P) -> Result<Self, AudioError> {
        let path = path.as_ref();
        let (samples, sample_rate) = read_wav(path)?;
        log::info!(
            "[FixtureCapture] Loaded {} samples at {} Hz from {}",
            samples.len(),
            sample_rate,
            path.display()
        );
        Ok(Self::from_samples(
            format!("wav:{}", path.display()),
            samples,
            sample_rate,
        ))
    }

    pub fn from_samples(name: impl Into<String>, samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::with_signal(name, FixtureSignal::Samples(Arc::new(samples)), sample_rate)
    }

    /// A device that can never be acquired
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::silence(FIXTURE_SAMPLE_RATE).unavailable_for(usize::MAX, reason)
    }

    /// Refuse the first `attempts` calls to `start`, then behave normally
    pub fn unavailable_for(mut self, attempts: usize, reason: impl Into<String>) -> Self {
        self.unavailable = Some((attempts, reason.into()));
        self
    }

    /// Sleep one chunk's duration between buffers (real-time playback)
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Restart WAV/sample playback when it runs out instead of going silent
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Report a stream failure after publishing `buffers` buffers
    pub fn failing_after(mut self, buffers: usize) -> Self {
        self.fail_after_buffers = Some(buffers);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Add uniform noise of the given amplitude to a synthetic chord
    pub fn with_noise(mut self, amplitude: f32, seed: u64) -> Self {
        if let FixtureSignal::Tones { noise, .. } = &mut self.signal {
            *noise = amplitude.max(0.0);
        }
        self.seed = seed;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl CaptureBackend for FixtureCaptureBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, ctx: CaptureStartContext) -> Result<CaptureInfo, AudioError> {
        if self.feeder.is_some() {
            return Err(AudioError::AlreadyRunning);
        }

        self.start_attempts += 1;
        if let Some((attempts, reason)) = &self.unavailable {
            if self.start_attempts <= *attempts {
                return Err(AudioError::DeviceUnavailable {
                    reason: reason.clone(),
                });
            }
        }

        let CaptureStartContext { channels, fault } = ctx;
        let cursor = SignalCursor::new(
            self.signal.clone(),
            self.sample_rate,
            self.looping,
            self.seed,
        );
        let feeder = Feeder {
            channels,
            cursor,
            chunk: vec![0.0; self.chunk_size],
            pace: self
                .paced
                .then(|| chunk_duration(self.chunk_size, self.sample_rate)),
            fail_after_buffers: self.fail_after_buffers,
            running: Arc::clone(&self.running),
        };

        self.running.store(true, Ordering::SeqCst);
        let handle = thread::Builder::new()
            .name("fixture-capture".to_string())
            .spawn(move || {
                if let Some(err) = feeder.run() {
                    fault.report(err);
                }
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                AudioError::from(e)
            })?;
        self.feeder = Some(handle);

        Ok(CaptureInfo {
            sample_rate: self.sample_rate,
            device_name: format!("fixture:{}", self.name),
        })
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.feeder.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FixtureCaptureBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

fn chunk_duration(chunk_size: usize, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(chunk_size as f64 / sample_rate as f64)
}

struct Feeder {
    channels: CaptureChannels,
    cursor: SignalCursor,
    chunk: Vec<f32>,
    pace: Option<Duration>,
    fail_after_buffers: Option<usize>,
    running: Arc<AtomicBool>,
}

impl Feeder {
    /// Feed until stopped; returns the scripted failure, if any
    fn run(mut self) -> Option<AudioError> {
        let mut published = 0usize;

        while self.running.load(Ordering::SeqCst) {
            if self.fail_after_buffers.is_some_and(|limit| published >= limit) {
                return Some(AudioError::StreamFailure {
                    reason: format!("fixture stream failed after {} buffers", published),
                });
            }

            self.cursor.fill(&mut self.chunk);
            // Wait for the analysis side to recycle a buffer
            while !self.channels.publish(&self.chunk) {
                if !self.running.load(Ordering::SeqCst) {
                    return None;
                }
                thread::sleep(Duration::from_micros(200));
            }
            published += 1;

            if let Some(pace) = self.pace {
                thread::sleep(pace);
            }
        }
        None
    }
}

fn read_wav(path: &Path) -> Result<(Vec<f32>, u32), AudioError> {
    let load_error = |reason: String| AudioError::FixtureLoad {
        path: path.display().to_string(),
        reason,
    };

    let mut reader = hound::WavReader::open(path).map_err(|err| load_error(err.to_string()))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(load_error("zero channels".to_string()));
    }

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<f32>, _>>()
            .map_err(|err| load_error(err.to_string()))?,
        hound::SampleFormat::Int => match spec.bits_per_sample {
            bits @ (8 | 16 | 24 | 32) => {
                let scale = (1i64 << (bits - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<f32>, _>>()
                    .map_err(|err| load_error(err.to_string()))?
            }
            bits => return Err(load_error(format!("unsupported bits_per_sample={}", bits))),
        },
    };

    let channels = spec.channels as usize;
    if channels == 1 {
        return Ok((samples, spec.sample_rate));
    }

    let mono = samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer_pool::BufferPool;
    use crate::audio::backend::FaultSlot;
    use std::time::Instant;

    fn start_backend(
        backend: &mut FixtureCaptureBackend,
    ) -> (
        Result<CaptureInfo, AudioError>,
        crate::audio::buffer_pool::AnalysisChannels,
        FaultSlot,
    ) {
        let (capture, analysis) = BufferPool::new(8, 512).split();
        let fault = FaultSlot::default();
        let info = backend.start(CaptureStartContext {
            channels: capture,
            fault: fault.clone(),
        });
        (info, analysis, fault)
    }

    fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_chord_frequencies_voiced_from_root() {
        let c = chord_frequencies("C").unwrap();
        assert_eq!(c.len(), 3);
        assert!((c[0] - 261.63).abs() < 0.01);
        assert!((c[1] - 329.63).abs() < 0.01);
        assert!((c[2] - 392.00).abs() < 0.01);

        let am = chord_frequencies("Am").unwrap();
        assert!((am[0] - 440.0).abs() < 0.01);
        assert!(am.windows(2).all(|w| w[0] < w[1]));

        assert!(chord_frequencies("Xm").is_none());
    }

    #[test]
    fn test_synthesize_chord_length_and_level() {
        let samples = synthesize_chord("G", 8000, 250, 0.5).unwrap();
        assert_eq!(samples.len(), 2000);
        assert!(samples.iter().all(|s| s.abs() <= 0.5 + 1e-6));
        assert!(synthesize_chord("Q", 8000, 250, 0.5).is_err());
    }

    #[test]
    fn test_unknown_chord_is_fixture_error() {
        let err = FixtureCaptureBackend::chord("Zz", FIXTURE_SAMPLE_RATE)
            .err()
            .unwrap();
        assert!(matches!(err, AudioError::FixtureLoad { .. }));
    }

    #[test]
    fn test_feeds_samples_then_silence() {
        let mut backend =
            FixtureCaptureBackend::from_samples("ramp", vec![0.25; 600], 8000)
                .paced(false)
                .with_chunk_size(500);
        let (info, mut analysis, _fault) = start_backend(&mut backend);
        assert_eq!(info.unwrap().sample_rate, 8000);

        let mut received = Vec::new();
        assert!(wait_for(|| {
            while let Ok(buffer) = analysis.data_consumer.pop() {
                received.extend_from_slice(&buffer);
                let _ = analysis.pool_producer.push(buffer);
            }
            received.len() >= 1500
        }));
        backend.stop();

        assert!(received[..600].iter().all(|&s| s == 0.25));
        assert!(received[600..1500].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_unavailable_for_then_recovers() {
        let mut backend = FixtureCaptureBackend::silence(8000)
            .paced(false)
            .unavailable_for(1, "no microphone");

        let (first, _, _) = start_backend(&mut backend);
        assert!(matches!(first, Err(AudioError::DeviceUnavailable { .. })));

        let (second, _analysis, _) = start_backend(&mut backend);
        assert!(second.is_ok());
        backend.stop();
    }

    #[test]
    fn test_failing_after_reports_fault() {
        let mut backend = FixtureCaptureBackend::silence(8000)
            .paced(false)
            .failing_after(2);
        let (info, mut analysis, fault) = start_backend(&mut backend);
        assert!(info.is_ok());

        assert!(wait_for(|| {
            while let Ok(buffer) = analysis.data_consumer.pop() {
                let _ = analysis.pool_producer.push(buffer);
            }
            fault.is_faulted()
        }));
        assert!(matches!(fault.get(), Some(AudioError::StreamFailure { .. })));
        backend.stop();
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut backend = FixtureCaptureBackend::silence(8000);
        let (first, _a, _) = start_backend(&mut backend);
        assert!(first.is_ok());
        let (second, _b, _) = start_backend(&mut backend);
        assert_eq!(second, Err(AudioError::AlreadyRunning));
        backend.stop();
    }

    #[test]
    fn test_wav_round_trip_folds_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(16384i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let backend = FixtureCaptureBackend::from_wav(&path).unwrap();
        assert_eq!(backend.sample_rate(), 8000);
        let (samples, _) = read_wav(&path).unwrap();
        assert_eq!(samples.len(), 100);
        assert!(samples.iter().all(|&s| (s - 0.25).abs() < 1e-4));
    }

    #[test]
    fn test_missing_wav_is_fixture_error() {
        let err = FixtureCaptureBackend::from_wav("/nonexistent/take.wav")
            .err()
            .unwrap();
        assert!(matches!(err, AudioError::FixtureLoad { .. }));
    }
}
