// Public API for the calling layer (UI / platform bridge)
// Every function resolves exactly once with a value or a typed EngineError.

use once_cell::sync::OnceCell;

use crate::audio::ToneParameters;
use crate::engine::{DeviceInfo, EngineController, EngineStatus, ParamPatch};
use crate::error::EngineError;

// Re-export error code constants for the calling layer
pub use crate::error::EngineErrorCodes;

/// Process-wide controller. Unless one was installed first, it is created on
/// first use with platform config and the platform backend; the device is
/// not touched until `open()`.
static CONTROLLER: OnceCell<EngineController> = OnceCell::new();

/// Access the process-wide controller.
pub fn controller() -> &'static EngineController {
    CONTROLLER.get_or_init(EngineController::new)
}

/// Install the process-wide controller (custom config or backend).
///
/// Must happen before any other call in this module. Hands the controller
/// back if one is already in place.
pub fn install_controller(controller: EngineController) -> Result<(), EngineController> {
    CONTROLLER.set(controller)
}

/// Open the audio device and start rendering.
///
/// Idempotent while running: returns the current `DeviceInfo`.
pub async fn open() -> Result<DeviceInfo, EngineError> {
    controller().start().await
}

/// Stop the tone, close the device and wait for the render thread to drain.
pub async fn close() -> Result<(), EngineError> {
    controller().stop().await
}

/// Recover from a failed engine.
pub async fn reset() -> Result<(), EngineError> {
    controller().reset().await
}

pub async fn set_effect_enabled(enabled: bool) -> Result<(), EngineError> {
    controller().set_effect_enabled(enabled);
    Ok(())
}

pub async fn get_device_info() -> Result<DeviceInfo, EngineError> {
    controller().device_info()
}

pub async fn get_version() -> Result<String, EngineError> {
    Ok(env!("CARGO_PKG_VERSION").to_string())
}

pub async fn start_tone() -> Result<(), EngineError> {
    controller().start_tone()
}

pub async fn stop_tone() -> Result<(), EngineError> {
    controller().stop_tone()
}

/// Returns the applied frequency (clamped to [20, 20000] Hz).
///
/// Parameters are `f32` end to end, so the returned value and the one
/// reported by `get_tone_status` are bit-identical to the stored value.
pub async fn set_tone_frequency(hz: f32) -> Result<f32, EngineError> {
    controller().set_tone_frequency(hz)
}

/// Returns the applied volume (clamped to [0, 1]).
pub async fn set_tone_volume(volume: f32) -> Result<f32, EngineError> {
    controller().set_tone_volume(volume)
}

pub async fn get_tone_status() -> Result<ToneParameters, EngineError> {
    Ok(controller().tone_status())
}

pub async fn apply_patch(patch: ParamPatch) -> Result<ToneParameters, EngineError> {
    controller().apply_patch(patch)
}

pub async fn query_status() -> Result<EngineStatus, EngineError> {
    Ok(controller().query_status())
}
