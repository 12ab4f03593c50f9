//! Engine lifecycle events published to telemetry subscribers.

use serde::{Deserialize, Serialize};

use crate::bands::Band;

/// Event emitted by the engine core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineEvent {
    /// Milliseconds since the engine was constructed
    pub timestamp_ms: u64,
    pub kind: EngineEventKind,
    pub detail: Option<String>,
}

/// Types of events emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEventKind {
    GraphBuilt { band: Band },
    Started { band: Band, fade_in_ms: u64 },
    ActivationFailed { code: i32 },
    Transition { from: Band, to: Band, transition_ms: u64 },
    FadeOutScheduled { fade_out_ms: u64 },
    Stopped,
    StopSuperseded,
    VolumeChanged { volume: f32, gain: f32 },
    Disposed,
    /// A call arrived in a state where it is defined as a no-op
    Ignored { operation: String },
}
