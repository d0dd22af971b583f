//! Local Chord Classifier - template matching over 12-bin chroma
//!
//! Each supported chord is a binary pitch-class template. A feature window is
//! scored against every template by cosine similarity; the best score at or
//! above the floor names the chord, anything weaker is reported as
//! `UNRECOGNIZED_LABEL` with zero confidence.
//!
//! Deterministic, allocation-light and free of I/O so it can run on every
//! window inside the session tick.

use super::{FeatureWindow, RecognitionResult, RecognitionSource, CHROMA_BINS};

/// Label reported when no template clears the similarity floor
pub const UNRECOGNIZED_LABEL: &str = "Unrecognized";

pub const NOTE_NAMES_SHARP: [&str; CHROMA_BINS] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];
const NOTE_NAMES_FLAT: [&str; CHROMA_BINS] = [
    "C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B",
];

/// Chord qualities covered by the template catalogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ChordQuality {
    Major,
    Minor,
    Dominant7,
}

struct QualitySpec {
    quality: ChordQuality,
    suffix: &'static str,
    intervals: u16,
}

const fn quality(quality: ChordQuality, suffix: &'static str, intervals: &[u8]) -> QualitySpec {
    let mut mask = 0u16;
    let mut i = 0;
    while i < intervals.len() {
        mask |= 1 << intervals[i];
        i += 1;
    }
    QualitySpec {
        quality,
        suffix,
        intervals: mask,
    }
}

static QUALITIES: &[QualitySpec] = &[
    quality(ChordQuality::Major, "", &[0, 4, 7]),
    quality(ChordQuality::Minor, "m", &[0, 3, 7]),
    quality(ChordQuality::Dominant7, "7", &[0, 4, 7, 10]),
];

/// One chord template, unit-normalized for cosine scoring
#[derive(Debug, Clone, PartialEq)]
pub struct ChordTemplate {
    pub label: String,
    pub root: usize,
    pub quality: ChordQuality,
    vector: [f32; CHROMA_BINS],
}

impl ChordTemplate {
    pub fn new(root: usize, quality: ChordQuality) -> Self {
        let spec = QUALITIES
            .iter()
            .find(|spec| spec.quality == quality)
            .unwrap_or(&QUALITIES[0]);
        let root = root % CHROMA_BINS;

        let mut vector = [0.0_f32; CHROMA_BINS];
        for interval in (0..CHROMA_BINS).filter(|&i| spec.intervals & (1u16 << i) != 0) {
            vector[(root + interval) % CHROMA_BINS] = 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        vector.iter_mut().for_each(|v| *v /= norm);

        Self {
            label: format!("{}{}", NOTE_NAMES_SHARP[root], spec.suffix),
            root,
            quality,
            vector,
        }
    }

    /// Pitch classes in the chord, ascending from C
    pub fn pitch_classes(&self) -> Vec<usize> {
        (0..CHROMA_BINS).filter(|&pc| self.vector[pc] > 0.0).collect()
    }

    /// Cosine similarity with a chroma vector; zero for a silent vector
    pub fn similarity(&self, chroma: &[f32]) -> f32 {
        let norm = chroma.iter().map(|v| v * v).sum::<f32>().sqrt();
        if !norm.is_finite() || norm <= f32::EPSILON {
            return 0.0;
        }
        let dot: f32 = chroma.iter().zip(self.vector.iter()).map(|(c, t)| c * t).sum();
        (dot / norm).clamp(0.0, 1.0)
    }
}

/// Major, minor and dominant-7th templates for all twelve roots
pub fn standard_catalogue() -> Vec<ChordTemplate> {
    (0..CHROMA_BINS)
        .flat_map(|root| QUALITIES.iter().map(move |spec| ChordTemplate::new(root, spec.quality)))
        .collect()
}

/// Parse a chord label (`C`, `F#m`, `Bb7`) into root pitch class and quality.
pub fn parse_chord_label(label: &str) -> Option<(usize, ChordQuality)> {
    let trimmed = label.trim();
    let root_len = match trimmed.as_bytes().get(1) {
        Some(b'#') | Some(b'b') => 2,
        _ => 1,
    };
    if trimmed.len() < root_len || !trimmed.is_char_boundary(root_len) {
        return None;
    }
    let (root_name, suffix) = trimmed.split_at(root_len);

    let root = NOTE_NAMES_SHARP
        .iter()
        .position(|name| name.eq_ignore_ascii_case(root_name))
        .or_else(|| {
            NOTE_NAMES_FLAT
                .iter()
                .position(|name| *name == root_name || name.eq_ignore_ascii_case(root_name))
        })?;

    let quality = QUALITIES.iter().find(|spec| spec.suffix == suffix)?.quality;
    Some((root, quality))
}

/// Pitch classes sounded by a chord label, if it is in the catalogue
pub fn chord_tones(label: &str) -> Option<Vec<usize>> {
    parse_chord_label(label).map(|(root, quality)| ChordTemplate::new(root, quality).pitch_classes())
}

/// Template-matching chord classifier
pub struct LocalChordClassifier {
    templates: Vec<ChordTemplate>,
    catalogue_labels: Vec<String>,
    min_similarity: f32,
}

impl LocalChordClassifier {
    /// Classifier over the standard catalogue
    ///
    /// # Arguments
    /// * `min_similarity` - Lowest similarity reported as a chord (default 0.3)
    pub fn new(min_similarity: f32) -> Self {
        Self::with_templates(standard_catalogue(), min_similarity)
    }

    pub fn with_templates(templates: Vec<ChordTemplate>, min_similarity: f32) -> Self {
        let catalogue_labels = templates.iter().map(|t| t.label.clone()).collect();
        Self {
            templates,
            catalogue_labels,
            min_similarity,
        }
    }

    /// Report chords spelled the way `labels` spell them (`Bb` rather than
    /// `A#`), so results compare equal to the timeline's own labels.
    ///
    /// Labels that do not parse or name a chord outside the templates are
    /// ignored. Each call starts again from the catalogue spellings; when two
    /// labels name the same chord the later one wins.
    pub fn adopt_spellings<'a>(&mut self, labels: impl IntoIterator<Item = &'a str>) {
        for (template, label) in self.templates.iter_mut().zip(&self.catalogue_labels) {
            template.label.clone_from(label);
        }
        for label in labels {
            let Some((root, quality)) = parse_chord_label(label) else {
                continue;
            };
            if let Some(template) = self
                .templates
                .iter_mut()
                .find(|template| template.root == root && template.quality == quality)
            {
                template.label = label.trim().to_string();
            }
        }
    }

    pub fn templates(&self) -> &[ChordTemplate] {
        &self.templates
    }

    /// Highest-scoring template at or above the floor. Ties keep the earlier
    /// template in catalogue order.
    pub fn best_match(&self, chroma: &[f32]) -> Option<(&ChordTemplate, f32)> {
        let mut best: Option<(&ChordTemplate, f32)> = None;
        for template in &self.templates {
            let score = template.similarity(chroma);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((template, score));
            }
        }
        best.filter(|(_, score)| *score >= self.min_similarity && *score > 0.0)
    }

    /// Classify one feature window
    pub fn classify(&self, window: &FeatureWindow) -> RecognitionResult {
        let (chord_label, confidence) = match self.best_match(&window.samples) {
            Some((template, score)) => (template.label.clone(), score),
            None => (UNRECOGNIZED_LABEL.to_string(), 0.0),
        };

        RecognitionResult {
            sequence_number: window.sequence_number,
            chord_label,
            confidence,
            source: RecognitionSource::Local,
            recognized_at_ms: window.captured_at_ms,
        }
    }
}

impl Default for LocalChordClassifier {
    fn default() -> Self {
        Self::new(0.3)
    }
}

#[cfg(test)]
#[path = "classifier_tests.rs"]
mod tests;
