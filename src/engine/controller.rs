//! EngineController: async, thread-safe facade over the audio engine.
//!
//! Lifecycle operations (`start`/`stop`/`reset`) are serialized by one async
//! mutex and run their device work on the blocking pool. Parameter setters
//! and status queries never take that mutex; they go straight to the
//! lock-free [`EngineShared`] state, so they stay responsive even while a
//! slow device open is in progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::audio::{
    AudioEngine, Clamped, EffectState, EngineShared, EngineState, ToneParameters,
};
use crate::config::AppConfig;
use crate::engine::backend::{
    platform_backend, AudioBackend, DeviceInfo, SystemTimeSource, TimeSource,
};
use crate::error::{log_engine_error, EngineError};
use crate::telemetry::{TelemetryEventKind, TelemetryPublisher};

#[path = "controller_subscriptions.rs"]
mod controller_subscriptions;

/// Patch describing parameter updates to apply to the running engine.
///
/// Every field is optional; each present field is published independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamPatch {
    #[serde(default)]
    pub frequency_hz: Option<f32>,
    #[serde(default)]
    pub volume: Option<f32>,
    #[serde(default)]
    pub effect_enabled: Option<bool>,
    #[serde(default)]
    pub playing: Option<bool>,
}

impl ParamPatch {
    fn touches_tone(&self) -> bool {
        self.frequency_hz.is_some() || self.volume.is_some() || self.playing.is_some()
    }
}

/// Point-in-time view returned by [`EngineController::query_status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub device_info: Option<DeviceInfo>,
    /// Present while a stream is live
    pub tone: Option<ToneParameters>,
    pub effect: EffectState,
    pub callbacks_rendered: u64,
    pub degraded_buffers: u64,
}

/// EngineController orchestrates lifecycle and parameter updates.
pub struct EngineController {
    config: AppConfig,
    engine: Arc<Mutex<AudioEngine>>,
    shared: Arc<EngineShared>,
    telemetry: TelemetryPublisher,
    first_callback_wait: Duration,
    backend_name: &'static str,
    failure_reported: AtomicBool,
}

impl EngineController {
    /// Create a controller with platform config and the hardware backend.
    pub fn new() -> Self {
        Self::with_backend(
            AppConfig::load_platform(),
            platform_backend(),
            Arc::new(SystemTimeSource::default()),
        )
    }

    pub fn with_backend(
        config: AppConfig,
        backend: Arc<dyn AudioBackend>,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        let engine = AudioEngine::new(&config, backend);
        let shared = engine.shared();
        let backend_name = engine.backend_name();
        let first_callback_wait = Duration::from_millis(config.audio.first_callback_wait_ms);

        Self {
            config,
            engine: Arc::new(Mutex::new(engine)),
            shared,
            telemetry: TelemetryPublisher::new(time_source),
            first_callback_wait,
            backend_name,
            failure_reported: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Open the device stream and wait (bounded) for the first callback.
    ///
    /// Concurrent calls are serialized; a call made while the engine is
    /// already live returns the current `DeviceInfo` without reopening.
    pub async fn start(&self) -> Result<DeviceInfo, EngineError> {
        let guard = Arc::clone(&self.engine).lock_owned().await;
        let was_live = self.shared.refresh().is_live();
        let wait = self.first_callback_wait;

        let opened = tokio::task::spawn_blocking(move || {
            let mut engine = guard;
            let opened = engine.open()?;
            let state = engine.wait_until_running(wait);
            // The first buffer may have completed what the backend reported
            let info = engine.shared().device_info()?.unwrap_or(opened);
            Ok::<_, EngineError>((info, state))
        })
        .await?;

        let (info, state) = match opened {
            Ok(opened) => opened,
            Err(err) => {
                self.observe_state();
                return Err(err);
            }
        };

        match state {
            EngineState::Failed => {
                self.observe_state();
                let err = EngineError::DeviceUnavailable {
                    reason: "Device failed before delivering audio".to_string(),
                };
                log_engine_error(&err, "EngineController::start");
                return Err(err);
            }
            EngineState::Starting => {
                warn!(
                    "No render callback within {:?}, engine still starting",
                    self.first_callback_wait
                );
            }
            _ => {}
        }

        if !was_live {
            self.failure_reported.store(false, Ordering::SeqCst);
            info!(
                "Engine started on {} ({} Hz, {} frames)",
                info.device_name, info.sample_rate_hz, info.buffer_size_frames
            );
            self.telemetry.publish(
                TelemetryEventKind::EngineStarted {
                    sample_rate_hz: info.sample_rate_hz,
                    buffer_size_frames: info.buffer_size_frames,
                },
                Some(info.device_name.clone()),
            );
        }
        Ok(info)
    }

    /// Stop the tone (if any), close the stream and wait for the render
    /// context to drain. No-op when nothing is open.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let guard = Arc::clone(&self.engine).lock_owned().await;
        let before = self.shared.refresh();
        if matches!(before, EngineState::Uninitialized | EngineState::Stopped) {
            return Ok(());
        }

        if self.shared.params().playing() {
            self.shared.params().set_playing(false);
            self.telemetry
                .publish(TelemetryEventKind::ToneStopped, Some("stop".to_string()));
        }

        let closed = tokio::task::spawn_blocking(move || {
            let mut engine = guard;
            engine.close()
        })
        .await?;

        match closed {
            Ok(()) => {
                info!("Engine stopped");
                self.telemetry.publish(TelemetryEventKind::EngineStopped, None);
                Ok(())
            }
            Err(err) => {
                self.observe_state();
                Err(err)
            }
        }
    }

    /// Recover from `Failed` (or any state) back to `Uninitialized`.
    pub async fn reset(&self) -> Result<(), EngineError> {
        let guard = Arc::clone(&self.engine).lock_owned().await;
        tokio::task::spawn_blocking(move || {
            let mut engine = guard;
            engine.reset()
        })
        .await??;

        self.failure_reported.store(false, Ordering::SeqCst);
        self.telemetry.publish(TelemetryEventKind::EngineReset, None);
        Ok(())
    }

    // ========================================================================
    // PARAMETERS
    // ========================================================================

    /// Toggle the ping-pong effect. Before start the value is recorded and
    /// applied when the next stream opens.
    pub fn set_effect_enabled(&self, enabled: bool) {
        self.observe_state();
        self.shared.set_effect_enabled(enabled);
        self.telemetry
            .publish(TelemetryEventKind::EffectToggled { enabled }, None);
    }

    /// Returns the frequency actually applied after clamping.
    pub fn set_tone_frequency(&self, hz: f32) -> Result<f32, EngineError> {
        self.require_running()?;
        let clamped = self
            .shared
            .params()
            .set_frequency(hz)
            .ok_or_else(|| nan_parameter("frequency_hz"))?;
        self.report_clamp("frequency_hz", clamped);
        Ok(clamped.applied)
    }

    /// Returns the volume actually applied after clamping.
    pub fn set_tone_volume(&self, volume: f32) -> Result<f32, EngineError> {
        self.require_running()?;
        let clamped = self
            .shared
            .params()
            .set_volume(volume)
            .ok_or_else(|| nan_parameter("volume"))?;
        self.report_clamp("volume", clamped);
        Ok(clamped.applied)
    }

    pub fn start_tone(&self) -> Result<(), EngineError> {
        self.require_running()?;
        let params = self.shared.params();
        params.set_playing(true);
        self.telemetry.publish(
            TelemetryEventKind::ToneStarted {
                frequency_hz: params.frequency(),
                volume: params.volume(),
            },
            None,
        );
        Ok(())
    }

    pub fn stop_tone(&self) -> Result<(), EngineError> {
        self.require_running()?;
        self.shared.params().set_playing(false);
        self.telemetry.publish(TelemetryEventKind::ToneStopped, None);
        Ok(())
    }

    /// Apply several parameter updates at once.
    ///
    /// Tone fields require `Running`; all values are validated before any
    /// is published. An effect-only patch is accepted in any state.
    pub fn apply_patch(&self, patch: ParamPatch) -> Result<ToneParameters, EngineError> {
        if patch.touches_tone() {
            self.require_running()?;
        }
        if patch.frequency_hz.is_some_and(f32::is_nan) {
            return Err(nan_parameter("frequency_hz"));
        }
        if patch.volume.is_some_and(f32::is_nan) {
            return Err(nan_parameter("volume"));
        }

        if let Some(hz) = patch.frequency_hz {
            self.set_tone_frequency(hz)?;
        }
        if let Some(volume) = patch.volume {
            self.set_tone_volume(volume)?;
        }
        if let Some(enabled) = patch.effect_enabled {
            self.set_effect_enabled(enabled);
        }
        match patch.playing {
            Some(true) => self.start_tone()?,
            Some(false) => self.stop_tone()?,
            None => {}
        }
        Ok(self.tone_status())
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Pure read; never waits on the lifecycle lock or the device.
    pub fn query_status(&self) -> EngineStatus {
        let state = self.observe_state();
        let device_info = self.shared.device_info().unwrap_or_else(|err| {
            warn!("Device info unavailable: {}", err);
            None
        });
        let params = self.shared.params();
        let monitor = self.shared.monitor();

        EngineStatus {
            state,
            device_info,
            tone: state.is_live().then(|| params.tone()),
            effect: params.effect(),
            callbacks_rendered: monitor.callbacks(),
            degraded_buffers: monitor.degraded_buffers(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.observe_state()
    }

    /// Negotiated parameters of the open stream.
    pub fn device_info(&self) -> Result<DeviceInfo, EngineError> {
        let state = self.observe_state();
        self.shared
            .device_info()?
            .ok_or(EngineError::EngineNotReady { state })
    }

    pub fn tone_status(&self) -> ToneParameters {
        self.shared.params().tone()
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn require_running(&self) -> Result<(), EngineError> {
        let state = self.observe_state();
        if state.accepts_tone_control() {
            Ok(())
        } else {
            Err(EngineError::EngineNotReady { state })
        }
    }

    /// Refresh the state and publish a failure event the first time
    /// `Failed` is seen.
    fn observe_state(&self) -> EngineState {
        let before = self.shared.state();
        let state = self.shared.refresh();
        if state == EngineState::Failed && !self.failure_reported.swap(true, Ordering::SeqCst) {
            self.telemetry.publish(
                TelemetryEventKind::EngineFailed { last_state: before },
                Some("device fault or open failure".to_string()),
            );
        }
        state
    }

    fn report_clamp(&self, name: &str, clamped: Clamped) {
        if clamped.was_clamped() {
            self.telemetry.publish(
                TelemetryEventKind::ParameterClamped {
                    name: name.to_string(),
                    requested: clamped.requested,
                    applied: clamped.applied,
                },
                None,
            );
        }
    }
}

fn nan_parameter(name: &str) -> EngineError {
    EngineError::InvalidParameter {
        name: name.to_string(),
        reason: "value is NaN".to_string(),
    }
}

impl Default for EngineController {
    fn default() -> Self {
        Self::new()
    }
}
