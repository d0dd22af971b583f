//! Snapshot published to UI collaborators on every tick.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::judgment::Verdict;
use crate::remote::{ChannelStatus, CoachingFeedback};
use crate::scoring::SessionState;
use crate::timeline::ChordEvent;

/// `NotStarted → Running ⇄ Paused → Stopped`; `start` again from `Stopped`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    NotStarted,
    Running,
    Paused,
    Stopped,
}

/// The chord the player should be fretting right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTarget {
    pub event_id: u64,
    pub chord_label: String,
    pub required_strings: BTreeSet<u8>,
    pub fret_positions: BTreeMap<u8, u8>,
    /// Until the event's window closes
    pub time_remaining_ms: u64,
}

impl ActiveTarget {
    pub fn from_event(event: &ChordEvent, clock_ms: u64) -> Self {
        Self {
            event_id: event.id,
            chord_label: event.chord_label.clone(),
            required_strings: event.required_strings.clone(),
            fret_positions: event.fret_positions.clone(),
            time_remaining_ms: event.end_ms().saturating_sub(clock_ms),
        }
    }
}

/// Read-only view of the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedState {
    pub lifecycle: Lifecycle,
    pub session: SessionState,
    pub clock_ms: u64,
    pub active_target: Option<ActiveTarget>,
    pub last_verdict: Option<Verdict>,
    pub channel_status: ChannelStatus,
    /// False after a mid-session audio failure; remaining events resolve as Miss
    pub judgment_available: bool,
    pub progress_pct: f32,
    pub last_feedback: Option<CoachingFeedback>,
    /// The timeline ran out and the session stopped itself
    pub completed: bool,
}

impl Default for PublishedState {
    fn default() -> Self {
        Self {
            lifecycle: Lifecycle::NotStarted,
            session: SessionState::default(),
            clock_ms: 0,
            active_target: None,
            last_verdict: None,
            channel_status: ChannelStatus::Disconnected,
            judgment_available: true,
            progress_pct: 0.0,
            last_feedback: None,
            completed: false,
        }
    }
}
