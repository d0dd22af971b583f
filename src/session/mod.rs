// Session Orchestrator
//
// Owns the lifecycle and drives everything else from a cooperative tick:
//
//   NotStarted ──start──▶ Running ⇄ Paused ──stop──▶ Stopped ──start──▶ Running
//
// Single-writer discipline: the judgment state machine, score accumulator and
// timeline consumption are only touched inside `tick()`. The analysis worker,
// remote channel and host-side recognizers hand their output over through
// the feature window queue and the epoch-guarded inbox, and the tick drains
// both. Nothing in `tick()` blocks.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::analysis::{
    FeatureExtractor, LocalChordClassifier, RecognitionResult, RecognitionSource,
    UNRECOGNIZED_LABEL,
};
use crate::audio::CaptureBackend;
use crate::clock::{SessionClock, TimeSource};
use crate::config::{AppConfig, RecognitionMode, SessionOptions};
use crate::error::{log_audio_error, log_session_error, SessionError};
use crate::judgment::{JudgmentStateMachine, Verdict};
use crate::remote::{
    BackoffPolicy, ChannelEvent, ChannelStatus, CoachingFeedback, RemoteRecognitionChannel,
    Transport, WebSocketTransport,
};
use crate::scoring::{ScoreAccumulator, SessionState};
use crate::telemetry::{self, LifecyclePhase};
use crate::timeline::{ChordEvent, TimelineStore};

mod broadcasts;
mod inbox;
mod state;
mod windows;

pub use broadcasts::SessionBroadcasts;
pub use inbox::ResultSender;
pub use state::{ActiveTarget, Lifecycle, PublishedState};

use inbox::{InboxPayload, ResultInbox};
use windows::{RecentWindows, RECENT_WINDOW_CAPACITY};

/// One practice run over a chord timeline
pub struct Session {
    config: AppConfig,
    options: SessionOptions,
    clock: Arc<SessionClock>,
    extractor: FeatureExtractor,
    classifier: LocalChordClassifier,
    transport: Option<Arc<dyn Transport>>,
    remote: Option<RemoteRecognitionChannel>,
    timeline: TimelineStore,
    judgment: JudgmentStateMachine,
    scores: ScoreAccumulator,
    inbox: ResultInbox,
    recent: RecentWindows,
    verdicts: Vec<Verdict>,
    lifecycle: Lifecycle,
    clock_ms: u64,
    channel_status: ChannelStatus,
    judgment_available: bool,
    last_verdict: Option<Verdict>,
    last_feedback: Option<CoachingFeedback>,
    completed: bool,
    broadcasts: SessionBroadcasts,
}

impl Session {
    /// Create a session capturing from `backend`
    ///
    /// Remote recognition uses `config.remote.url` unless a transport is
    /// supplied with `with_transport`.
    pub fn new(backend: Box<dyn CaptureBackend>, config: AppConfig) -> Self {
        let clock = Arc::new(SessionClock::system());
        let extractor = FeatureExtractor::new(
            backend,
            config.audio.clone(),
            config.analysis.clone(),
            Arc::clone(&clock),
        );
        let options = config.session.clone();

        Self {
            classifier: LocalChordClassifier::new(config.analysis.min_similarity),
            timeline: TimelineStore::new(options.pre_roll_ms, options.trailing_grace_ms),
            judgment: JudgmentStateMachine::new(
                options.effective_hit_window(),
                options.confidence_threshold,
            ),
            config,
            options,
            clock,
            extractor,
            transport: None,
            remote: None,
            scores: ScoreAccumulator::new(),
            inbox: ResultInbox::new(),
            recent: RecentWindows::new(RECENT_WINDOW_CAPACITY),
            verdicts: Vec::new(),
            lifecycle: Lifecycle::NotStarted,
            clock_ms: 0,
            channel_status: ChannelStatus::Disconnected,
            judgment_available: true,
            last_verdict: None,
            last_feedback: None,
            completed: false,
            broadcasts: SessionBroadcasts::new(),
        }
    }

    /// Drive the session clock from `source` instead of the system clock
    pub fn with_time_source(mut self, source: Arc<dyn TimeSource>) -> Self {
        self.clock = Arc::new(SessionClock::new(source));
        self.extractor.set_clock(Arc::clone(&self.clock));
        self
    }

    /// Use `transport` for remote recognition
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Load `events` and begin judging
    ///
    /// # Errors
    /// - `InvalidState` while running or paused
    /// - `InvalidOptions` for an out-of-range threshold or hit window
    /// - `Timeline` when the events are rejected
    /// - `Audio` when the capture device cannot be acquired; the session
    ///   stays where it was and `start` may be retried
    pub fn start(
        &mut self,
        events: Vec<ChordEvent>,
        options: SessionOptions,
    ) -> Result<(), SessionError> {
        if matches!(self.lifecycle, Lifecycle::Running | Lifecycle::Paused) {
            return Err(self.invalid_state("start"));
        }
        options.validate()?;

        let mut timeline = TimelineStore::new(options.pre_roll_ms, options.trailing_grace_ms);
        timeline.load(events)?;

        let epoch = self.inbox.bump_epoch();
        self.clock.reset();

        if let Err(err) = self.extractor.start() {
            log_audio_error(&err, "Session::start");
            return Err(SessionError::Audio(err));
        }

        self.judgment =
            JudgmentStateMachine::new(options.effective_hit_window(), options.confidence_threshold);
        self.timeline = timeline;
        self.classifier.adopt_spellings(
            self.timeline
                .events()
                .iter()
                .map(|event| event.chord_label.as_str()),
        );
        self.options = options;
        self.scores.reset();
        self.recent.clear();
        self.verdicts.clear();
        self.clock_ms = 0;
        self.last_verdict = None;
        self.last_feedback = None;
        self.judgment_available = true;
        self.completed = false;
        self.channel_status = ChannelStatus::Disconnected;

        if self.options.recognition_mode != RecognitionMode::Local {
            self.connect_remote(epoch);
        }

        self.lifecycle = Lifecycle::Running;
        telemetry::hub().record_lifecycle(LifecyclePhase::Started);
        log::info!(
            "[Session] Started: {} events, {:?} difficulty, {:?} recognition",
            self.timeline.len(),
            self.options.difficulty,
            self.options.recognition_mode
        );

        let published = self.snapshot();
        self.broadcasts.publish_state(&published);
        Ok(())
    }

    /// Advance one frame
    ///
    /// Reads the clock, routes pending feature windows and recognition
    /// results into the judgment state machine, auto-misses expired events,
    /// folds verdicts into the score and publishes the result. Completes the
    /// session once the timeline is exhausted.
    pub fn tick(&mut self) -> PublishedState {
        match self.lifecycle {
            Lifecycle::Running => {}
            Lifecycle::Paused => {
                // Audio keeps flowing while paused; nothing captured now is judged
                self.extractor.drain_windows();
                self.drain_inbox();
                let published = self.snapshot();
                self.broadcasts.publish_state(&published);
                return published;
            }
            Lifecycle::NotStarted | Lifecycle::Stopped => return self.snapshot(),
        }

        let clock_ms = self.clock.now_ms();
        self.clock_ms = clock_ms;
        self.timeline.advance_to(clock_ms);

        self.check_extractor();

        let mut results = self.process_windows();
        results.extend(self.drain_inbox());
        if !self.judgment_available {
            results.clear();
        }

        let mut verdicts = self.judge_results(results);
        verdicts.extend(self.judgment.close_expired(clock_ms, &mut self.timeline));

        let active = self.timeline.active_event_at(clock_ms);
        let floor = active.map_or(0, |event| {
            self.recent.floor_for(self.timeline.window_open_ms(event))
        });
        self.scores.set_active_event(active.map(|event| event.id));
        self.judgment.arm(active, floor);

        for verdict in verdicts {
            self.record_verdict(verdict);
        }

        if self.timeline.is_exhausted(clock_ms) {
            log::info!(
                "[Session] Timeline exhausted at {}ms (score {})",
                clock_ms,
                self.scores.state().score
            );
            self.completed = true;
            telemetry::hub().record_lifecycle(LifecyclePhase::Completed);
            self.teardown();
        }

        let published = self.snapshot();
        self.broadcasts.publish_state(&published);
        published
    }

    /// Freeze the session clock. Audio and the remote link stay up.
    pub fn pause(&mut self) -> Result<(), SessionError> {
        if self.lifecycle != Lifecycle::Running {
            return Err(self.invalid_state("pause"));
        }
        self.clock.pause();
        self.lifecycle = Lifecycle::Paused;
        telemetry::hub().record_lifecycle(LifecyclePhase::Paused);
        log::info!("[Session] Paused at {}ms", self.clock.now_ms());

        let published = self.snapshot();
        self.broadcasts.publish_state(&published);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), SessionError> {
        if self.lifecycle != Lifecycle::Paused {
            return Err(self.invalid_state("resume"));
        }
        self.clock.resume();
        self.lifecycle = Lifecycle::Running;
        telemetry::hub().record_lifecycle(LifecyclePhase::Resumed);
        log::info!("[Session] Resumed at {}ms", self.clock.now_ms());

        let published = self.snapshot();
        self.broadcasts.publish_state(&published);
        Ok(())
    }

    /// Tear down audio and the remote channel and return the final score
    ///
    /// Idempotent. No recognition callback reaches the session after this
    /// returns.
    pub fn stop(&mut self) -> SessionState {
        if matches!(self.lifecycle, Lifecycle::Running | Lifecycle::Paused) {
            self.clock_ms = self.clock.now_ms();
            self.teardown();
            telemetry::hub().record_lifecycle(LifecyclePhase::Stopped);

            let published = self.snapshot();
            self.broadcasts.publish_state(&published);
        }
        self.scores.state().clone()
    }

    /// Stop the current run and start over with a new timeline
    pub fn reset(
        &mut self,
        events: Vec<ChordEvent>,
        options: SessionOptions,
    ) -> Result<(), SessionError> {
        self.stop();
        self.start(events, options)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Every verdict of the current run, in emission order
    pub fn verdicts(&self) -> &[Verdict] {
        &self.verdicts
    }

    pub fn state(&self) -> &SessionState {
        self.scores.state()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn timeline(&self) -> &TimelineStore {
        &self.timeline
    }

    /// Handle for feeding results from a host-side recognizer into the
    /// current run
    pub fn recognition_sender(&self) -> ResultSender {
        ResultSender::new(self.inbox.sender())
    }

    pub fn broadcasts(&self) -> SessionBroadcasts {
        self.broadcasts.clone()
    }

    /// Current view without advancing the session
    pub fn published(&self) -> PublishedState {
        self.snapshot()
    }

    fn connect_remote(&mut self, epoch: u64) {
        let transport = self.transport.clone().or_else(|| {
            self.config
                .remote
                .url
                .as_ref()
                .map(|url| Arc::new(WebSocketTransport::new(url.clone())) as Arc<dyn Transport>)
        });
        let Some(transport) = transport else {
            log::info!("[Session] No remote recognizer configured, judging locally");
            return;
        };

        let mut channel =
            RemoteRecognitionChannel::new(transport, BackoffPolicy::from_config(&self.config.remote));
        let sender = self.inbox.sender();
        channel.on_result(move |event| {
            let payload = match event {
                ChannelEvent::Connected => InboxPayload::ChannelConnected,
                ChannelEvent::Degraded { reason } => InboxPayload::ChannelDegraded(reason),
                ChannelEvent::Result(result) => InboxPayload::Remote(result),
                ChannelEvent::Feedback(feedback) => InboxPayload::Feedback(feedback),
            };
            sender.push(payload);
        });

        let session_id = format!("gt-{:x}-{}", unix_millis(), epoch);
        match channel.connect(&session_id) {
            Ok(()) => self.channel_status = ChannelStatus::Connecting,
            Err(err) => {
                log_session_error(&SessionError::Channel(err), "Session::start remote");
                self.channel_status = ChannelStatus::Degraded;
            }
        }
        self.remote = Some(channel);
    }

    fn check_extractor(&mut self) {
        if !self.judgment_available {
            return;
        }
        let Some(err) = self.extractor.fault() else {
            return;
        };
        log_audio_error(&err, "Session::tick");
        log::warn!("[Session] Judgment unavailable, remaining events will resolve as Miss");
        self.judgment_available = false;
        self.extractor.stop();
    }

    /// Record windows for sequence lookups, classify them locally and forward
    /// them to the remote recognizer, as the recognition mode asks
    fn process_windows(&mut self) -> Vec<RecognitionResult> {
        let windows = self.extractor.drain_windows();
        let mode = self.options.recognition_mode;
        let classify_locally = match mode {
            RecognitionMode::Local | RecognitionMode::Hybrid => true,
            RecognitionMode::Remote => self.channel_status != ChannelStatus::Connected,
        };

        let mut results = Vec::new();
        for window in &windows {
            self.recent.record(window.sequence_number, window.captured_at_ms);

            if mode != RecognitionMode::Local {
                if let Some(remote) = &self.remote {
                    remote.send(window);
                }
            }

            if classify_locally {
                let result = self.classifier.classify(window);
                if result.chord_label != UNRECOGNIZED_LABEL {
                    telemetry::hub().record_recognition(&result);
                    results.push(result);
                }
            }
        }
        results
    }

    /// Apply channel status and feedback; return the recognition results
    fn drain_inbox(&mut self) -> Vec<RecognitionResult> {
        let mut results = Vec::new();
        for payload in self.inbox.drain() {
            match payload {
                InboxPayload::Recognition(result) => results.push(result),
                InboxPayload::Remote(remote) => {
                    let Some(captured_at_ms) = self.recent.captured_at(remote.sequence_number)
                    else {
                        log::debug!(
                            "[Session] Dropping remote result for unknown window {}",
                            remote.sequence_number
                        );
                        continue;
                    };
                    let result = RecognitionResult {
                        sequence_number: remote.sequence_number,
                        chord_label: remote.chord_label,
                        confidence: remote.confidence,
                        source: RecognitionSource::Remote,
                        recognized_at_ms: captured_at_ms,
                    };
                    telemetry::hub().record_recognition(&result);
                    results.push(result);
                }
                InboxPayload::ChannelConnected => {
                    log::info!("[Session] Remote recognizer connected");
                    self.channel_status = ChannelStatus::Connected;
                }
                InboxPayload::ChannelDegraded(reason) => {
                    log::warn!("[Session] Remote channel degraded ({}), judging locally", reason);
                    self.channel_status = ChannelStatus::Degraded;
                }
                InboxPayload::Feedback(feedback) => {
                    log::info!("[Session] Coaching: {}", feedback.message);
                    self.broadcasts.publish_feedback(&feedback);
                    self.last_feedback = Some(feedback);
                }
            }
        }
        results
    }

    /// Judge results in capture order, each against the event that was
    /// active when its audio was captured
    fn judge_results(&mut self, mut results: Vec<RecognitionResult>) -> Vec<Verdict> {
        results.sort_by_key(|result| result.recognized_at_ms);

        let mut verdicts = Vec::new();
        for result in &results {
            let active = self.timeline.active_event_at(result.recognized_at_ms);
            let floor = active.map_or(0, |event| {
                self.recent.floor_for(self.timeline.window_open_ms(event))
            });
            self.judgment.arm(active, floor);

            if let Some(verdict) = self.judgment.judge(result, &mut self.timeline) {
                verdicts.push(verdict);
            }
        }
        verdicts
    }

    fn record_verdict(&mut self, verdict: Verdict) {
        let state = self.scores.apply(&verdict);
        log::debug!(
            "[Session] Score {} (combo {}, accuracy {}%)",
            state.score,
            state.combo,
            state.accuracy_pct
        );
        telemetry::hub().record_verdict(&verdict);
        self.broadcasts.publish_verdict(&verdict);
        self.last_verdict = Some(verdict.clone());
        self.verdicts.push(verdict);
    }

    fn teardown(&mut self) {
        // Bump first so callbacks racing with the teardown enqueue nothing
        self.inbox.bump_epoch();
        if let Some(mut remote) = self.remote.take() {
            remote.disconnect();
        }
        self.extractor.stop();
        self.judgment.reset();
        self.scores.set_active_event(None);
        self.channel_status = ChannelStatus::Disconnected;
        self.lifecycle = Lifecycle::Stopped;
        log::info!(
            "[Session] Stopped: {} verdicts, score {}",
            self.verdicts.len(),
            self.scores.state().score
        );
    }

    fn snapshot(&self) -> PublishedState {
        let live = matches!(self.lifecycle, Lifecycle::Running | Lifecycle::Paused);
        let clock_ms = if live { self.clock.now_ms() } else { self.clock_ms };
        let active_target = if live {
            self.timeline
                .active_event_at(clock_ms)
                .map(|event| ActiveTarget::from_event(event, clock_ms))
        } else {
            None
        };

        PublishedState {
            lifecycle: self.lifecycle,
            session: self.scores.state().clone(),
            clock_ms,
            active_target,
            last_verdict: self.last_verdict.clone(),
            channel_status: self.channel_status,
            judgment_available: self.judgment_available,
            progress_pct: self.timeline.progress_pct(),
            last_feedback: self.last_feedback.clone(),
            completed: self.completed,
        }
    }

    fn invalid_state(&self, operation: &'static str) -> SessionError {
        let err = SessionError::InvalidState {
            operation,
            state: format!("{:?}", self.lifecycle),
        };
        log::warn!("[Session] {}", err);
        err
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}
