// Audio module - real-time render path, parameter bridge and engine lifecycle

pub mod engine;
pub mod input_ring;
pub mod monitor;
pub mod params;
pub mod render;
pub mod state;

// Re-export commonly used types for convenience
pub use engine::{AudioEngine, EngineShared};
pub use input_ring::{InputConsumer, InputProducer, InputRing};
pub use monitor::RenderMonitor;
pub use params::{
    Clamped, EffectState, ParamDefaults, ParamSnapshot, ParameterStore, ToneParameters,
    MAX_FREQUENCY_HZ, MAX_VOLUME, MIN_FREQUENCY_HZ, MIN_VOLUME,
};
pub use render::{RenderCallback, RenderContext};
pub use state::{EngineState, IllegalTransition, LifecycleEvent, SharedEngineState};
