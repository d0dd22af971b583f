// SessionBroadcasts: tokio broadcast channels for published session data
//
// State snapshots, verdicts and coaching feedback each get their own channel
// so slow subscribers of one stream never hold back another. The most recent
// snapshot is also kept for readers that poll instead of subscribing.

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use crate::judgment::Verdict;
use crate::remote::CoachingFeedback;

use super::state::PublishedState;

/// Buffer sizes: state is published once per tick (~60 Hz), verdicts and
/// feedback are sparse.
const STATE_BUFFER: usize = 128;
const VERDICT_BUFFER: usize = 256;
const FEEDBACK_BUFFER: usize = 32;

/// Cloneable fan-out handle; every clone publishes to the same subscribers
#[derive(Clone)]
pub struct SessionBroadcasts {
    state: broadcast::Sender<PublishedState>,
    verdicts: broadcast::Sender<Verdict>,
    feedback: broadcast::Sender<CoachingFeedback>,
    latest: Arc<RwLock<PublishedState>>,
}

impl SessionBroadcasts {
    pub fn new() -> Self {
        let (state, _) = broadcast::channel(STATE_BUFFER);
        let (verdicts, _) = broadcast::channel(VERDICT_BUFFER);
        let (feedback, _) = broadcast::channel(FEEDBACK_BUFFER);
        Self {
            state,
            verdicts,
            feedback,
            latest: Arc::new(RwLock::new(PublishedState::default())),
        }
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<PublishedState> {
        self.state.subscribe()
    }

    pub fn subscribe_verdicts(&self) -> broadcast::Receiver<Verdict> {
        self.verdicts.subscribe()
    }

    pub fn subscribe_feedback(&self) -> broadcast::Receiver<CoachingFeedback> {
        self.feedback.subscribe()
    }

    /// Most recently published snapshot
    pub fn latest(&self) -> PublishedState {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn publish_state(&self, state: &PublishedState) {
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = state.clone();
        // No subscribers is not an error
        let _ = self.state.send(state.clone());
    }

    pub(crate) fn publish_verdict(&self, verdict: &Verdict) {
        let _ = self.verdicts.send(verdict.clone());
    }

    pub(crate) fn publish_feedback(&self, feedback: &CoachingFeedback) {
        let _ = self.feedback.send(feedback.clone());
    }
}

impl Default for SessionBroadcasts {
    fn default() -> Self {
        Self::new()
    }
}
