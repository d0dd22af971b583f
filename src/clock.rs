//! Session clock
//!
//! The session clock counts milliseconds since `start()`, minus any time
//! spent paused. It reads a `TimeSource` so tests and replays can drive time
//! by hand instead of waiting on the wall clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Monotonic time source
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

/// Default time source backed by `Instant::now`.
#[derive(Default)]
pub struct SystemTimeSource {
    _unit: (),
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Hand-driven time source for deterministic tests and replays.
pub struct ManualTimeSource {
    base: Instant,
    offset_ms: AtomicU64,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    /// Jump to an absolute offset from creation
    pub fn set_ms(&self, ms: u64) {
        self.offset_ms.store(ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.offset_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.offset_ms.load(Ordering::SeqCst)
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

#[derive(Debug)]
struct ClockState {
    origin: Instant,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

/// Pausable millisecond clock shared by the tick and the capture worker
pub struct SessionClock {
    source: Arc<dyn TimeSource>,
    state: Mutex<ClockState>,
}

impl SessionClock {
    pub fn new(source: Arc<dyn TimeSource>) -> Self {
        let origin = source.now();
        Self {
            source,
            state: Mutex::new(ClockState {
                origin,
                paused_at: None,
                paused_total: Duration::ZERO,
            }),
        }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemTimeSource::default()))
    }

    /// Restart from zero, unpaused
    pub fn reset(&self) {
        let now = self.source.now();
        let mut state = self.lock();
        state.origin = now;
        state.paused_at = None;
        state.paused_total = Duration::ZERO;
    }

    /// Milliseconds of unpaused time since the last reset
    pub fn now_ms(&self) -> u64 {
        let now = self.source.now();
        let state = self.lock();
        let reference = state.paused_at.unwrap_or(now);
        let elapsed = reference
            .saturating_duration_since(state.origin)
            .saturating_sub(state.paused_total);
        elapsed.as_millis() as u64
    }

    /// Freeze the clock; a second pause is a no-op
    pub fn pause(&self) {
        let now = self.source.now();
        let mut state = self.lock();
        if state.paused_at.is_none() {
            state.paused_at = Some(now);
        }
    }

    pub fn resume(&self) {
        let now = self.source.now();
        let mut state = self.lock();
        if let Some(paused_at) = state.paused_at.take() {
            state.paused_total += now.saturating_duration_since(paused_at);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused_at.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
