//! Hit windows and difficulty presets

use serde::{Deserialize, Serialize};

use super::Outcome;

/// Timing tolerances around an event's center
///
/// `|delta| <= perfect_ms` is Perfect, `<= good_ms` Good, `<= miss_ms` Miss.
/// Anything further out is not applied to the event at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitWindow {
    pub perfect_ms: u64,
    pub good_ms: u64,
    pub miss_ms: u64,
}

impl HitWindow {
    pub const fn new(perfect_ms: u64, good_ms: u64, miss_ms: u64) -> Self {
        Self {
            perfect_ms,
            good_ms,
            miss_ms,
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.perfect_ms <= self.good_ms && self.good_ms <= self.miss_ms
    }

    /// Classify a signed timing delta; `None` means outside the miss window.
    pub fn classify(&self, timing_delta_ms: i64) -> Option<Outcome> {
        let distance = timing_delta_ms.unsigned_abs();
        if distance <= self.perfect_ms {
            Some(Outcome::Perfect)
        } else if distance <= self.good_ms {
            Some(Outcome::Good)
        } else if distance <= self.miss_ms {
            Some(Outcome::Miss)
        } else {
            None
        }
    }
}

/// Difficulty profile supplied with a song/exercise
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn hit_window(&self) -> HitWindow {
        match self {
            Difficulty::Easy => HitWindow::new(120, 240, 360),
            Difficulty::Medium => HitWindow::new(80, 160, 240),
            Difficulty::Hard => HitWindow::new(50, 100, 150),
        }
    }
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty '{}'", other)),
        }
    }
}
