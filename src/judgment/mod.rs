//! Judgment State Machine
//!
//! Reconciles recognition results against the active timeline target and
//! emits at most one `Verdict` per chord event.
//!
//! ```text
//! Idle ──arm(event)──▶ AwaitingInput ──match / window closed──▶ Resolved
//!   ▲                        │                                     │
//!   └──── no active event ◀──┴──────────── arm(next event) ────────┘
//! ```
//!
//! A result only resolves the armed event when its label matches
//! (case-insensitive), its confidence clears the threshold and its timing
//! delta from the event center falls inside the miss window. Remote results
//! must also not be older than the event's sequence floor: they can arrive
//! long after their window, for an event that has since been superseded.
//! Anything else is dropped and the machine keeps waiting.

use serde::{Deserialize, Serialize};

use crate::analysis::{RecognitionResult, RecognitionSource};
use crate::timeline::{ChordEvent, TimelineStore};

pub mod hit_window;

pub use hit_window::{Difficulty, HitWindow};

/// Classification of a judged chord event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Perfect,
    Good,
    Miss,
}

impl Outcome {
    /// Accuracy credited to this outcome, in percent
    pub fn accuracy_pct(&self) -> u32 {
        match self {
            Outcome::Perfect => 100,
            Outcome::Good => 75,
            Outcome::Miss => 0,
        }
    }

    pub fn breaks_combo(&self) -> bool {
        matches!(self, Outcome::Miss)
    }
}

/// The judgment of one chord event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub chord_event_id: u64,
    pub outcome: Outcome,
    /// Recognition time minus event center; positive means late
    pub timing_delta_ms: i64,
    pub confidence: f32,
}

/// Current state of the judgment state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JudgmentState {
    Idle,
    /// `floor_seq` is the lowest window sequence number accepted for the event
    AwaitingInput { event_id: u64, floor_seq: u64 },
    Resolved { event_id: u64 },
}

pub struct JudgmentStateMachine {
    state: JudgmentState,
    hit_window: HitWindow,
    confidence_threshold: f32,
}

impl JudgmentStateMachine {
    pub fn new(hit_window: HitWindow, confidence_threshold: f32) -> Self {
        Self {
            state: JudgmentState::Idle,
            hit_window,
            confidence_threshold,
        }
    }

    pub fn state(&self) -> JudgmentState {
        self.state
    }

    pub fn hit_window(&self) -> HitWindow {
        self.hit_window
    }

    pub fn reset(&mut self) {
        self.state = JudgmentState::Idle;
    }

    /// Track the timeline's active event
    ///
    /// A new active event enters `AwaitingInput` with `floor_seq`; the event
    /// already tracked keeps its state (and its first floor); no active
    /// event returns to `Idle`.
    pub fn arm(&mut self, active: Option<&ChordEvent>, floor_seq: u64) {
        let Some(event) = active else {
            self.state = JudgmentState::Idle;
            return;
        };

        match self.state {
            JudgmentState::AwaitingInput { event_id, .. } | JudgmentState::Resolved { event_id }
                if event_id == event.id => {}
            _ => {
                log::debug!(
                    "[Judgment] Awaiting '{}' (event {}, floor seq {})",
                    event.chord_label,
                    event.id,
                    floor_seq
                );
                self.state = JudgmentState::AwaitingInput {
                    event_id: event.id,
                    floor_seq,
                };
            }
        }
    }

    /// Apply one recognition result to the armed event
    ///
    /// # Returns
    /// The verdict when the result resolves the event; `None` when it is
    /// stale, mismatched, under-confident, or outside the miss window.
    pub fn judge(
        &mut self,
        result: &RecognitionResult,
        timeline: &mut TimelineStore,
    ) -> Option<Verdict> {
        let JudgmentState::AwaitingInput {
            event_id,
            floor_seq,
        } = self.state
        else {
            return None;
        };

        if result.source == RecognitionSource::Remote && result.sequence_number < floor_seq {
            log::debug!(
                "[Judgment] Dropping stale {:?} result seq {} (floor {})",
                result.source,
                result.sequence_number,
                floor_seq
            );
            return None;
        }

        if timeline.is_consumed(event_id) {
            return None;
        }
        let event = timeline.event(event_id)?;

        if !result.chord_label.eq_ignore_ascii_case(&event.chord_label) {
            return None;
        }
        if !(0.0..=1.0).contains(&result.confidence) {
            log::warn!(
                "[Judgment] Ignoring {:?} result seq {} with invalid confidence {}",
                result.source,
                result.sequence_number,
                result.confidence
            );
            return None;
        }
        if result.confidence < self.confidence_threshold {
            return None;
        }

        let timing_delta_ms = signed_delta(result.recognized_at_ms, event.center_ms());
        let outcome = self.hit_window.classify(timing_delta_ms)?;

        Some(self.resolve(
            event_id,
            outcome,
            timing_delta_ms,
            result.confidence,
            timeline,
        ))
    }

    /// Auto-miss every unconsumed event whose window closed by `clock_ms`
    ///
    /// No-shows carry `timing_delta_ms = miss_ms` and zero confidence. Events
    /// that were never armed (skipped over entirely) are included.
    pub fn close_expired(&mut self, clock_ms: u64, timeline: &mut TimelineStore) -> Vec<Verdict> {
        let miss_ms = self.hit_window.miss_ms as i64;
        timeline
            .expired_events(clock_ms)
            .into_iter()
            .map(|event_id| self.resolve(event_id, Outcome::Miss, miss_ms, 0.0, timeline))
            .collect()
    }

    fn resolve(
        &mut self,
        event_id: u64,
        outcome: Outcome,
        timing_delta_ms: i64,
        confidence: f32,
        timeline: &mut TimelineStore,
    ) -> Verdict {
        timeline.consume(event_id);

        let armed = match self.state {
            JudgmentState::AwaitingInput { event_id: id, .. } => Some(id),
            _ => None,
        };
        if armed == Some(event_id) {
            self.state = JudgmentState::Resolved { event_id };
        }

        log::info!(
            "[Judgment] Event {} -> {:?} (delta {}ms, confidence {:.2})",
            event_id,
            outcome,
            timing_delta_ms,
            confidence
        );

        Verdict {
            chord_event_id: event_id,
            outcome,
            timing_delta_ms,
            confidence,
        }
    }
}

fn signed_delta(at_ms: u64, center_ms: u64) -> i64 {
    let delta = at_ms as i128 - center_ms as i128;
    delta.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_machine() -> JudgmentStateMachine {
        JudgmentStateMachine::new(Difficulty::Medium.hit_window(), 0.65)
    }

    fn create_test_timeline() -> TimelineStore {
        let mut timeline = TimelineStore::new(500, 2000);
        timeline
            .load(vec![
                ChordEvent::new(1, "C", 0, 2000),
                ChordEvent::new(2, "Am", 3000, 2000),
            ])
            .unwrap();
        timeline
    }

    fn result(seq: u64, label: &str, confidence: f32, at_ms: u64) -> RecognitionResult {
        RecognitionResult {
            sequence_number: seq,
            chord_label: label.to_string(),
            confidence,
            source: RecognitionSource::Local,
            recognized_at_ms: at_ms,
        }
    }

    fn armed(machine: &mut JudgmentStateMachine, timeline: &TimelineStore, clock_ms: u64, floor: u64) {
        machine.arm(timeline.active_event_at(clock_ms), floor);
    }

    #[test]
    fn test_perfect_hit_resolves_and_consumes() {
        let mut machine = create_test_machine();
        let mut timeline = create_test_timeline();
        armed(&mut machine, &timeline, 1000, 0);

        let verdict = machine
            .judge(&result(3, "C", 0.9, 1020), &mut timeline)
            .unwrap();

        assert_eq!(verdict.outcome, Outcome::Perfect);
        assert_eq!(verdict.timing_delta_ms, 20);
        assert_eq!(verdict.chord_event_id, 1);
        assert!(timeline.is_consumed(1));
        assert_eq!(machine.state(), JudgmentState::Resolved { event_id: 1 });
    }

    #[test]
    fn test_timing_boundaries_against_center() {
        // center = 1000
        let cases = [
            (1080, Some(Outcome::Perfect)),
            (1081, Some(Outcome::Good)),
            (1160, Some(Outcome::Good)),
            (1161, Some(Outcome::Miss)),
            (1241, None),
        ];

        for (at_ms, expected) in cases {
            let mut machine = create_test_machine();
            let mut timeline = create_test_timeline();
            armed(&mut machine, &timeline, 1000, 0);

            let outcome = machine
                .judge(&result(1, "C", 0.9, at_ms), &mut timeline)
                .map(|v| v.outcome);
            assert_eq!(outcome, expected, "recognized at {}ms", at_ms);
        }
    }

    #[test]
    fn test_result_beyond_miss_window_keeps_waiting() {
        let mut machine = create_test_machine();
        let mut timeline = create_test_timeline();
        armed(&mut machine, &timeline, 500, 0);

        assert!(machine
            .judge(&result(1, "C", 0.9, 500), &mut timeline)
            .is_none());
        assert!(matches!(
            machine.state(),
            JudgmentState::AwaitingInput { event_id: 1, .. }
        ));
        assert!(!timeline.is_consumed(1));
    }

    #[test]
    fn test_label_match_is_case_insensitive_but_exact() {
        let mut machine = create_test_machine();
        let mut timeline = create_test_timeline();
        armed(&mut machine, &timeline, 4000, 0);

        assert!(machine
            .judge(&result(1, "A", 0.9, 4000), &mut timeline)
            .is_none());
        assert!(machine
            .judge(&result(2, "Am7", 0.9, 4000), &mut timeline)
            .is_none());
        let verdict = machine.judge(&result(3, "AM", 0.9, 4000), &mut timeline);
        assert_eq!(verdict.map(|v| v.chord_event_id), Some(2));
    }

    #[test]
    fn test_low_confidence_is_dropped() {
        let mut machine = create_test_machine();
        let mut timeline = create_test_timeline();
        armed(&mut machine, &timeline, 1000, 0);

        assert!(machine
            .judge(&result(1, "C", 0.64, 1000), &mut timeline)
            .is_none());
        assert!(machine
            .judge(&result(2, "C", f32::NAN, 1000), &mut timeline)
            .is_none());
        assert!(machine
            .judge(&result(3, "C", 0.65, 1000), &mut timeline)
            .is_some());
    }

    #[test]
    fn test_confidence_outside_unit_range_is_dropped() {
        let mut machine = create_test_machine();
        let mut timeline = create_test_timeline();
        armed(&mut machine, &timeline, 1000, 0);

        for confidence in [1.5, -0.2, f32::INFINITY] {
            assert!(machine
                .judge(&result(1, "C", confidence, 1000), &mut timeline)
                .is_none());
        }
        assert!(!timeline.is_consumed(1));
        assert!(machine
            .judge(&result(2, "C", 1.0, 1000), &mut timeline)
            .is_some());
    }

    #[test]
    fn test_delta_far_from_center_does_not_wrap() {
        let start = 1u64 << 63;
        let mut machine = create_test_machine();
        let mut timeline = TimelineStore::new(500, 2000);
        timeline
            .load(vec![ChordEvent::new(9, "C", start, 1000)])
            .unwrap();
        armed(&mut machine, &timeline, start, 0);

        assert!(machine
            .judge(&result(1, "C", 0.9, 0), &mut timeline)
            .is_none());
        let verdict = machine.judge(&result(2, "C", 0.9, start + 520), &mut timeline);
        assert_eq!(verdict.map(|v| v.timing_delta_ms), Some(20));
    }

    #[test]
    fn test_stale_remote_sequence_numbers_never_produce_verdicts() {
        let mut machine = create_test_machine();
        let mut timeline = create_test_timeline();
        armed(&mut machine, &timeline, 1000, 40);

        let remote = |seq| RecognitionResult {
            source: RecognitionSource::Remote,
            ..result(seq, "C", 0.99, 1000)
        };
        assert!(machine.judge(&remote(39), &mut timeline).is_none());
        assert!(machine.judge(&remote(40), &mut timeline).is_some());
    }

    #[test]
    fn test_floor_does_not_apply_to_local_results() {
        let mut machine = create_test_machine();
        let mut timeline = create_test_timeline();
        armed(&mut machine, &timeline, 1000, 40);

        assert!(machine
            .judge(&result(3, "C", 0.99, 1000), &mut timeline)
            .is_some());
    }

    #[test]
    fn test_rearming_same_event_keeps_floor() {
        let mut machine = create_test_machine();
        let timeline = create_test_timeline();
        armed(&mut machine, &timeline, 600, 10);
        armed(&mut machine, &timeline, 900, 25);

        assert_eq!(
            machine.state(),
            JudgmentState::AwaitingInput {
                event_id: 1,
                floor_seq: 10
            }
        );
    }

    #[test]
    fn test_only_one_verdict_per_event() {
        let mut machine = create_test_machine();
        let mut timeline = create_test_timeline();
        armed(&mut machine, &timeline, 1000, 0);

        assert!(machine
            .judge(&result(1, "C", 0.9, 1000), &mut timeline)
            .is_some());
        assert!(machine
            .judge(&result(2, "C", 0.9, 1010), &mut timeline)
            .is_none());
        // Window close after resolution must not add a no-show
        assert!(machine.close_expired(2500, &mut timeline).is_empty());
    }

    #[test]
    fn test_no_show_emits_miss_with_miss_window_delta() {
        let mut machine = create_test_machine();
        let mut timeline = create_test_timeline();
        armed(&mut machine, &timeline, 1000, 0);

        assert!(machine.close_expired(1999, &mut timeline).is_empty());
        let verdicts = machine.close_expired(2000, &mut timeline);

        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].outcome, Outcome::Miss);
        assert_eq!(verdicts[0].timing_delta_ms, 240);
        assert_eq!(verdicts[0].confidence, 0.0);
        assert_eq!(machine.state(), JudgmentState::Resolved { event_id: 1 });
    }

    #[test]
    fn test_skipped_events_are_missed_even_if_never_armed() {
        let mut machine = create_test_machine();
        let mut timeline = create_test_timeline();

        let verdicts = machine.close_expired(6000, &mut timeline);
        let ids: Vec<u64> = verdicts.iter().map(|v| v.chord_event_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(machine.state(), JudgmentState::Idle);
    }

    #[test]
    fn test_arm_without_active_event_goes_idle() {
        let mut machine = create_test_machine();
        let timeline = create_test_timeline();
        armed(&mut machine, &timeline, 1000, 0);
        machine.arm(None, 0);
        assert_eq!(machine.state(), JudgmentState::Idle);
    }

    #[test]
    fn test_wrong_chord_never_resolves_before_window_close() {
        let mut machine = create_test_machine();
        let mut timeline = create_test_timeline();
        armed(&mut machine, &timeline, 1000, 0);

        for seq in 0..20 {
            assert!(machine
                .judge(&result(seq, "G", 0.95, 900 + seq * 10), &mut timeline)
                .is_none());
        }
        let verdicts = machine.close_expired(2000, &mut timeline);
        assert_eq!(verdicts[0].outcome, Outcome::Miss);
    }
}
