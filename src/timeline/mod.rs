//! Timeline Store - the expected chord events of the active exercise
//!
//! Holds the ordered `ChordEvent` sequence and answers "what is the active
//! target at time t". Events are immutable once loaded; the only mutation
//! during a session is `consume`, which retires an event after its verdict.
//!
//! An event accepts input over `[start - pre_roll, start + duration)`. When
//! pre-roll makes two windows overlap, the earliest unconsumed event is the
//! active one, so there is only ever a single target.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::TimelineError;

pub mod shapes;

pub use shapes::{chord_shape, known_shapes, FrettedString};

/// One expected chord in the practice timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordEvent {
    pub id: u64,
    pub chord_label: String,
    pub start_offset_ms: u64,
    pub duration_ms: u64,
    /// Strings (1 = high E .. 6 = low E) the player has to fret
    #[serde(default)]
    pub required_strings: BTreeSet<u8>,
    /// Fret per required string
    #[serde(default)]
    pub fret_positions: BTreeMap<u8, u8>,
}

impl ChordEvent {
    /// Create an event without fingering information
    pub fn new(id: u64, chord_label: impl Into<String>, start_offset_ms: u64, duration_ms: u64) -> Self {
        Self {
            id,
            chord_label: chord_label.into(),
            start_offset_ms,
            duration_ms,
            required_strings: BTreeSet::new(),
            fret_positions: BTreeMap::new(),
        }
    }

    /// Create an event and fill its fingering from the shape catalogue
    pub fn with_shape(
        id: u64,
        chord_label: impl Into<String>,
        start_offset_ms: u64,
        duration_ms: u64,
    ) -> Self {
        let mut event = Self::new(id, chord_label, start_offset_ms, duration_ms);
        event.fill_shape();
        event
    }

    /// Fill empty fingering fields from the shape catalogue.
    ///
    /// Returns true when a catalogue shape was applied.
    pub fn fill_shape(&mut self) -> bool {
        if !self.required_strings.is_empty() || !self.fret_positions.is_empty() {
            return false;
        }
        match chord_shape(&self.chord_label) {
            Some(shape) => {
                let (strings, frets) = shapes::shape_positions(shape);
                self.required_strings = strings;
                self.fret_positions = frets;
                true
            }
            None => false,
        }
    }

    /// Nominal end of the event (exclusive)
    pub fn end_ms(&self) -> u64 {
        self.start_offset_ms.saturating_add(self.duration_ms)
    }

    /// Temporal center used as the timing reference for hits
    pub fn center_ms(&self) -> u64 {
        self.start_offset_ms.saturating_add(self.duration_ms / 2)
    }
}

/// Ordered, validated chord events plus consumption state
#[derive(Debug, Clone)]
pub struct TimelineStore {
    events: Vec<ChordEvent>,
    consumed: HashSet<u64>,
    pre_roll_ms: u64,
    trailing_grace_ms: u64,
    playhead_ms: u64,
}

impl TimelineStore {
    /// Create an empty store
    ///
    /// # Arguments
    /// * `pre_roll_ms` - How early before its start an event becomes active
    /// * `trailing_grace_ms` - Time after the last event's end before exhaustion
    pub fn new(pre_roll_ms: u64, trailing_grace_ms: u64) -> Self {
        Self {
            events: Vec::new(),
            consumed: HashSet::new(),
            pre_roll_ms,
            trailing_grace_ms,
            playhead_ms: 0,
        }
    }

    /// Replace the active timeline and reset the playhead to 0
    ///
    /// # Errors
    /// Returns `TimelineError` (and leaves the previous timeline untouched) when
    /// events are not sorted by start offset, ids repeat, an event has no
    /// duration, or an event's end plus the trailing grace overflows the clock.
    pub fn load(&mut self, events: Vec<ChordEvent>) -> Result<(), TimelineError> {
        let mut seen = HashSet::with_capacity(events.len());
        for (index, event) in events.iter().enumerate() {
            if index > 0 {
                let previous = &events[index - 1];
                if event.start_offset_ms < previous.start_offset_ms {
                    return Err(TimelineError::Unsorted {
                        index,
                        start_offset_ms: event.start_offset_ms,
                        previous_start_ms: previous.start_offset_ms,
                    });
                }
            }
            if !seen.insert(event.id) {
                return Err(TimelineError::DuplicateId { id: event.id });
            }
            if event.duration_ms == 0 {
                return Err(TimelineError::ZeroDuration { id: event.id });
            }
            let closes = event
                .start_offset_ms
                .checked_add(event.duration_ms)
                .and_then(|end| end.checked_add(self.trailing_grace_ms));
            if closes.is_none() {
                return Err(TimelineError::OffsetOverflow { id: event.id });
            }
        }

        log::info!("[Timeline] Loaded {} chord events", events.len());
        self.events = events;
        self.consumed.clear();
        self.playhead_ms = 0;
        Ok(())
    }

    /// First instant at which `event` accepts input
    pub fn window_open_ms(&self, event: &ChordEvent) -> u64 {
        event.start_offset_ms.saturating_sub(self.pre_roll_ms)
    }

    /// The earliest unconsumed event whose window contains `clock_ms`
    pub fn active_event_at(&self, clock_ms: u64) -> Option<&ChordEvent> {
        self.events
            .iter()
            .take_while(|event| self.window_open_ms(event) <= clock_ms)
            .find(|event| clock_ms < event.end_ms() && !self.consumed.contains(&event.id))
    }

    /// Remove an event from future consideration
    ///
    /// Idempotent. Returns true only when this call consumed the event.
    pub fn consume(&mut self, event_id: u64) -> bool {
        if !self.events.iter().any(|event| event.id == event_id) {
            log::debug!("[Timeline] Ignoring consume of unknown event {}", event_id);
            return false;
        }
        self.consumed.insert(event_id)
    }

    pub fn is_consumed(&self, event_id: u64) -> bool {
        self.consumed.contains(&event_id)
    }

    /// Ids of unconsumed events whose window closed at or before `clock_ms`, in
    /// timeline order
    pub fn expired_events(&self, clock_ms: u64) -> Vec<u64> {
        self.events
            .iter()
            .filter(|event| event.end_ms() <= clock_ms && !self.consumed.contains(&event.id))
            .map(|event| event.id)
            .collect()
    }

    /// True once `clock_ms` exceeds the last event's end plus the grace period.
    /// An empty timeline is exhausted immediately.
    pub fn is_exhausted(&self, clock_ms: u64) -> bool {
        match self.last_end_ms() {
            Some(end) => clock_ms > end.saturating_add(self.trailing_grace_ms),
            None => true,
        }
    }

    pub fn event(&self, event_id: u64) -> Option<&ChordEvent> {
        self.events.iter().find(|event| event.id == event_id)
    }

    pub fn events(&self) -> &[ChordEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events still waiting for a verdict
    pub fn remaining(&self) -> usize {
        self.events.len() - self.consumed.len()
    }

    /// Record the latest clock reading for progress reporting
    pub fn advance_to(&mut self, clock_ms: u64) {
        self.playhead_ms = clock_ms;
    }

    pub fn playhead_ms(&self) -> u64 {
        self.playhead_ms
    }

    /// Song progress in percent, measured against the last event's end
    pub fn progress_pct(&self) -> f32 {
        match self.last_end_ms() {
            Some(end) if end > 0 => ((self.playhead_ms as f32 / end as f32) * 100.0).min(100.0),
            _ => 100.0,
        }
    }

    fn last_end_ms(&self) -> Option<u64> {
        self.events.iter().map(ChordEvent::end_ms).max()
    }
}
