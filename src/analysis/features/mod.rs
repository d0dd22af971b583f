// Chroma features - 12-bin pitch-class energy profile of an audio frame
//
// Module organization:
// - fft: Hann-windowed magnitude spectrum
// - mod.rs: ChromaExtractor, folding spectrum bins onto pitch classes
//
// Bins between `min_hz` and `max_hz` are mapped to the nearest equal-tempered
// pitch (A4 = 440 Hz) and their energy summed per pitch class. The result is
// scaled so the strongest class is 1.0. Frames quieter than the silence gate
// produce an all-zero profile, which the classifier never recognizes.

mod fft;

pub use fft::FftProcessor;

use crate::config::AnalysisConfig;

use super::CHROMA_BINS;

/// Pitch class (0 = C .. 11 = B) of the equal-tempered note nearest `freq_hz`
pub fn pitch_class(freq_hz: f32) -> usize {
    let semitones_from_a4 = (12.0 * (freq_hz / 440.0).log2()).round() as i64;
    (semitones_from_a4 + 9).rem_euclid(CHROMA_BINS as i64) as usize
}

/// Root-mean-square level of a frame
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt()
}

/// Computes chroma vectors for frames of a fixed size
pub struct ChromaExtractor {
    fft: FftProcessor,
    /// Pitch class per spectrum bin; `None` outside the analysis band
    bin_classes: Vec<Option<usize>>,
    silence_rms: f32,
}

impl ChromaExtractor {
    /// # Arguments
    /// * `sample_rate` - Capture rate in Hz
    /// * `config` - FFT size, analysis band and silence gate
    pub fn new(sample_rate: u32, config: &AnalysisConfig) -> Self {
        let fft = FftProcessor::new(config.fft_size);
        let fft_size = fft.fft_size();
        let bin_hz = sample_rate as f32 / fft_size as f32;

        let bin_classes = (0..=fft_size / 2)
            .map(|bin| {
                let freq = bin as f32 * bin_hz;
                (bin > 0 && freq >= config.min_hz && freq <= config.max_hz)
                    .then(|| pitch_class(freq))
            })
            .collect();

        Self {
            fft,
            bin_classes,
            silence_rms: config.silence_rms,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft.fft_size()
    }

    /// Chroma of one frame, normalized so the maximum bin is 1.0
    pub fn extract(&mut self, frame: &[f32]) -> [f32; CHROMA_BINS] {
        let mut chroma = [0.0_f32; CHROMA_BINS];
        if rms(frame) < self.silence_rms {
            return chroma;
        }

        let spectrum = self.fft.compute_magnitude_spectrum(frame);
        for (magnitude, class) in spectrum.iter().zip(self.bin_classes.iter()) {
            if let Some(pc) = class {
                chroma[*pc] += magnitude * magnitude;
            }
        }

        let peak = chroma.iter().copied().fold(0.0_f32, f32::max);
        if peak > 0.0 && peak.is_finite() {
            chroma.iter_mut().for_each(|c| *c /= peak);
        } else {
            chroma = [0.0; CHROMA_BINS];
        }
        chroma
    }
}
