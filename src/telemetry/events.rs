//! Core telemetry event types exposed to the CLI and debug HTTP surfaces.

use serde::{Deserialize, Serialize};

use crate::analysis::RecognitionSource;
use crate::judgment::Outcome;
use crate::remote::ChannelStatus;

/// Session lifecycle stages reported by the orchestrator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Started,
    Paused,
    Resumed,
    Completed,
    Stopped,
}

/// Metric events covering recognition, judgment, timing drift and health.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    Recognition {
        source: RecognitionSource,
        chord_label: String,
        confidence: f32,
    },
    Verdict {
        event_id: u64,
        outcome: Outcome,
        timing_delta_ms: i64,
    },
    /// Rolling mean/max of |timing delta| over recent played verdicts
    TimingDrift {
        avg_ms: f32,
        max_ms: f32,
        sample_count: usize,
    },
    QueueOccupancy {
        queue: String,
        percent: f32,
    },
    ChannelStatus {
        status: ChannelStatus,
    },
    Lifecycle {
        phase: LifecyclePhase,
        timestamp_ms: u64,
    },
    Error {
        code: i32,
        context: String,
    },
}
