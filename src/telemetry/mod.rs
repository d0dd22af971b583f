//! Diagnostics telemetry collector and helpers.
//!
//! The collector multiplexes recognition, verdict, timing drift, queue
//! occupancy, channel and lifecycle events into a bounded history plus an
//! async broadcast stream.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use tokio::sync::broadcast;

use crate::analysis::RecognitionResult;
use crate::judgment::Verdict;
use crate::remote::ChannelStatus;

pub mod events;

pub use events::{LifecyclePhase, MetricEvent};

/// Global telemetry hub shared across the crate.
static HUB: Lazy<TelemetryHub> = Lazy::new(TelemetryHub::default);

/// Access the global telemetry hub.
pub fn hub() -> &'static TelemetryHub {
    &HUB
}

/// Snapshot of collector state for HTTP/CLI reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<MetricEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Broadcast-based collector retaining a bounded history of metrics.
pub struct TelemetryCollector {
    tx: broadcast::Sender<MetricEvent>,
    history: Mutex<VecDeque<MetricEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl TelemetryCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity: history_capacity.max(1),
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: MetricEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = lock(&self.history);
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let history = lock(&self.history);
        TelemetrySnapshot {
            recent: history.iter().cloned().collect(),
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_history.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// Rolling window of absolute timing deltas
struct DriftTracker {
    samples: VecDeque<f32>,
    max_samples: usize,
}

impl DriftTracker {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    fn observe(&mut self, value: f32) -> (f32, f32, usize) {
        if self.samples.len() == self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value.abs());

        let count = self.samples.len();
        let sum: f32 = self.samples.iter().copied().sum();
        let max = self
            .samples
            .iter()
            .copied()
            .fold(0.0_f32, |acc, next| acc.max(next));
        let avg = if count == 0 { 0.0 } else { sum / count as f32 };
        (avg, max, count)
    }
}

/// Top-level hub wrapping collector state plus derived gauges.
pub struct TelemetryHub {
    collector: TelemetryCollector,
    drift: Mutex<DriftTracker>,
    queue_gauges: Mutex<HashMap<&'static str, f32>>,
}

impl TelemetryHub {
    pub fn new(channel_capacity: usize, history_capacity: usize, drift_window: usize) -> Self {
        Self {
            collector: TelemetryCollector::new(channel_capacity, history_capacity),
            drift: Mutex::new(DriftTracker::new(drift_window)),
            queue_gauges: Mutex::new(HashMap::new()),
        }
    }

    pub fn collector(&self) -> &TelemetryCollector {
        &self.collector
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.collector.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.collector.subscribe()
    }

    pub fn record_recognition(&self, result: &RecognitionResult) {
        self.collector.publish(MetricEvent::Recognition {
            source: result.source,
            chord_label: result.chord_label.clone(),
            confidence: result.confidence,
        });
    }

    /// Record a verdict; played verdicts (non-zero confidence) also update
    /// the timing drift gauge, no-shows do not.
    pub fn record_verdict(&self, verdict: &Verdict) {
        self.collector.publish(MetricEvent::Verdict {
            event_id: verdict.chord_event_id,
            outcome: verdict.outcome,
            timing_delta_ms: verdict.timing_delta_ms,
        });

        if verdict.confidence <= 0.0 {
            return;
        }

        let (avg, max, count) = lock(&self.drift).observe(verdict.timing_delta_ms as f32);
        self.collector.publish(MetricEvent::TimingDrift {
            avg_ms: avg,
            max_ms: max,
            sample_count: count,
        });
    }

    pub fn record_queue_occupancy(&self, queue: &'static str, percent: f32) {
        let normalized = percent.clamp(0.0, 100.0);
        let mut gauges = lock(&self.queue_gauges);

        let should_emit = gauges
            .get(queue)
            .map(|last| (last - normalized).abs() >= 2.5)
            .unwrap_or(true);

        if should_emit {
            gauges.insert(queue, normalized);
            self.collector.publish(MetricEvent::QueueOccupancy {
                queue: queue.to_string(),
                percent: normalized,
            });
        }
    }

    pub fn record_channel_status(&self, status: ChannelStatus) {
        self.collector.publish(MetricEvent::ChannelStatus { status });
    }

    pub fn record_lifecycle(&self, phase: LifecyclePhase) {
        self.collector.publish(MetricEvent::Lifecycle {
            phase,
            timestamp_ms: now_timestamp_ms(),
        });
    }

    pub fn record_error(&self, code: i32, context: impl Into<String>) {
        self.collector.publish(MetricEvent::Error {
            code,
            context: context.into(),
        });
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(256, 64, 32)
    }
}

fn now_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judgment::Outcome;

    fn sample_verdict(outcome: Outcome, delta: i64, confidence: f32) -> Verdict {
        Verdict {
            chord_event_id: 7,
            outcome,
            timing_delta_ms: delta,
            confidence,
        }
    }

    #[test]
    fn collector_preserves_order_within_history() {
        let collector = TelemetryCollector::new(8, 3);
        collector.publish(MetricEvent::ChannelStatus {
            status: ChannelStatus::Connecting,
        });
        collector.publish(MetricEvent::ChannelStatus {
            status: ChannelStatus::Connected,
        });
        collector.publish(MetricEvent::QueueOccupancy {
            queue: "test".to_string(),
            percent: 50.0,
        });

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 3);
        assert_eq!(
            snapshot.recent[0],
            MetricEvent::ChannelStatus {
                status: ChannelStatus::Connecting
            }
        );
        assert!(matches!(
            snapshot.recent[2],
            MetricEvent::QueueOccupancy { .. }
        ));
    }

    #[test]
    fn collector_drops_history_when_full() {
        let collector = TelemetryCollector::new(8, 2);
        for code in [1, 2, 3] {
            collector.publish(MetricEvent::Error {
                code,
                context: "test".to_string(),
            });
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.dropped_events, 1);
        assert!(matches!(snapshot.recent[0], MetricEvent::Error { code: 2, .. }));
    }

    #[test]
    fn hub_tracks_drift_for_played_verdicts_only() {
        let hub = TelemetryHub::new(8, 16, 4);
        hub.record_verdict(&sample_verdict(Outcome::Perfect, -20, 0.9));
        hub.record_verdict(&sample_verdict(Outcome::Good, 100, 0.8));
        hub.record_verdict(&sample_verdict(Outcome::Miss, 240, 0.0));

        let snapshot = hub.snapshot();
        let verdicts = snapshot
            .recent
            .iter()
            .filter(|event| matches!(event, MetricEvent::Verdict { .. }))
            .count();
        assert_eq!(verdicts, 3);

        let last_drift = snapshot.recent.iter().rev().find_map(|event| match event {
            MetricEvent::TimingDrift {
                avg_ms,
                max_ms,
                sample_count,
            } => Some((*avg_ms, *max_ms, *sample_count)),
            _ => None,
        });
        assert_eq!(last_drift, Some((60.0, 100.0, 2)));
    }

    #[test]
    fn queue_gauge_debounces_small_changes() {
        let hub = TelemetryHub::new(8, 8, 4);
        hub.record_queue_occupancy("queue", 10.0);
        hub.record_queue_occupancy("queue", 10.5);
        hub.record_queue_occupancy("queue", 25.0);

        let snapshot = hub.snapshot();
        assert_eq!(
            snapshot
                .recent
                .iter()
                .filter(|event| matches!(event, MetricEvent::QueueOccupancy { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn metric_event_serializes_tagged() {
        let event = MetricEvent::Error {
            code: 3001,
            context: "connect".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["payload"]["code"], 3001);
    }
}
