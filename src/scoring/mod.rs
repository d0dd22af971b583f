//! Score Accumulator
//!
//! Folds verdicts into combo, counts, score and running accuracy. Pure and
//! deterministic; only the session tick calls it.

use serde::{Deserialize, Serialize};

use crate::judgment::{Outcome, Verdict};

const MAX_COMBO_MULTIPLIER: f64 = 2.0;

/// Score summary published to the UI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub combo: u32,
    pub max_combo: u32,
    pub perfect_count: u32,
    pub good_count: u32,
    pub miss_count: u32,
    pub score: u64,
    pub accuracy_pct: u32,
    pub active_chord_event_id: Option<u64>,
}

impl SessionState {
    pub fn judged_count(&self) -> u32 {
        self.perfect_count + self.good_count + self.miss_count
    }
}

/// Multiplier for a hit arriving with `combo` consecutive hits behind it
pub fn combo_multiplier(combo: u32) -> f64 {
    (1.0 + combo as f64 / 10.0).min(MAX_COMBO_MULTIPLIER)
}

fn base_score(outcome: Outcome, confidence: f32) -> u64 {
    let confidence = confidence as f64;
    match outcome {
        Outcome::Perfect => 100 + (confidence * 100.0).round() as u64,
        Outcome::Good => 50 + (confidence * 50.0).round() as u64,
        Outcome::Miss => 0,
    }
}

#[derive(Debug, Default)]
pub struct ScoreAccumulator {
    state: SessionState,
}

impl ScoreAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = SessionState::default();
    }

    pub fn set_active_event(&mut self, event_id: Option<u64>) {
        self.state.active_chord_event_id = event_id;
    }

    /// Apply one verdict and return the updated state
    ///
    /// # Panics
    /// In debug builds, when the verdict's confidence is NaN or outside
    /// [0, 1]. Release builds log the verdict and skip it.
    pub fn apply(&mut self, verdict: &Verdict) -> SessionState {
        if !(0.0..=1.0).contains(&verdict.confidence) {
            if cfg!(debug_assertions) {
                panic!(
                    "verdict for event {} has invalid confidence {}",
                    verdict.chord_event_id, verdict.confidence
                );
            }
            log::error!(
                "[ScoreAccumulator] Skipping verdict for event {} with invalid confidence {}",
                verdict.chord_event_id,
                verdict.confidence
            );
            return self.state.clone();
        }

        let state = &mut self.state;
        let judged = state.judged_count() as f64;
        let multiplier = combo_multiplier(state.combo);
        let delta = (base_score(verdict.outcome, verdict.confidence) as f64 * multiplier).round();
        state.score += delta as u64;

        match verdict.outcome {
            Outcome::Perfect => state.perfect_count += 1,
            Outcome::Good => state.good_count += 1,
            Outcome::Miss => state.miss_count += 1,
        }
        if verdict.outcome.breaks_combo() {
            state.combo = 0;
        } else {
            state.combo += 1;
            state.max_combo = state.max_combo.max(state.combo);
        }

        let weighted = state.accuracy_pct as f64 * judged + verdict.outcome.accuracy_pct() as f64;
        state.accuracy_pct = (weighted / (judged + 1.0)).round() as u32;

        log::debug!(
            "[ScoreAccumulator] {:?} +{} (x{:.1}) -> score {}, combo {}",
            verdict.outcome,
            delta,
            multiplier,
            state.score,
            state.combo
        );
        state.clone()
    }
}
