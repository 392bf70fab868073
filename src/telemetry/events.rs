//! Telemetry event types emitted by the engine controller.

use serde::{Deserialize, Serialize};

use crate::audio::EngineState;

/// Telemetry event emitted by the engine core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub timestamp_ms: u64,
    pub kind: TelemetryEventKind,
    pub detail: Option<String>,
}

/// Types of telemetry events supported by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum TelemetryEventKind {
    EngineStarted {
        sample_rate_hz: u32,
        buffer_size_frames: u32,
    },
    EngineStopped,
    EngineFailed {
        /// State reported by the last lifecycle transition
        last_state: EngineState,
    },
    EngineReset,
    ToneStarted {
        frequency_hz: f32,
        volume: f32,
    },
    ToneStopped,
    EffectToggled {
        enabled: bool,
    },
    ParameterClamped {
        name: String,
        requested: f32,
        applied: f32,
    },
    Warning,
}
