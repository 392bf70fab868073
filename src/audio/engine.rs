//! AudioEngine - sole owner of the device stream and the lifecycle state
//!
//! The engine is driven from the control context only, and always under the
//! controller's lifecycle lock. Everything the render callback or a status
//! query needs lives in [`EngineShared`], which is read without that lock.
//!
//! # Open / close ordering
//! ```text
//! open():  reset params -> arm gate -> Open -> backend.open() -> (Starting)
//!          first callback observed by refresh()                -> Running
//! close(): playing=false -> Close -> disarm + drain gate -> stream.close()
//!          -> DeviceStopped                                    -> Stopped
//! ```
//! Once `close()` returns the gate is disarmed and drained and the backend
//! stream has been joined, so no render callback runs again until the next
//! successful `open()`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::monitor::RenderMonitor;
use super::params::{ParamDefaults, ParameterStore};
use super::render::RenderContext;
use super::state::{EngineState, LifecycleEvent, SharedEngineState};
use crate::config::AppConfig;
use crate::engine::backend::{AudioBackend, DeviceInfo, DeviceStream, StreamRequest};
use crate::error::{log_engine_error, EngineError, ErrorCode};

/// State shared between the engine, the controller's lock-free queries and
/// the render callback.
pub struct EngineShared {
    params: Arc<ParameterStore>,
    monitor: Arc<RenderMonitor>,
    state: SharedEngineState,
    device_info: RwLock<Option<DeviceInfo>>,
    /// Effect toggle recorded while no stream was open (0 = none)
    pending_effect: AtomicU8,
}

impl EngineShared {
    fn new(defaults: ParamDefaults) -> Self {
        Self {
            params: Arc::new(ParameterStore::new(defaults)),
            monitor: Arc::new(RenderMonitor::new()),
            state: SharedEngineState::new(),
            device_info: RwLock::new(None),
            pending_effect: AtomicU8::new(0),
        }
    }

    /// Published state, without folding in render-context reports.
    pub fn state(&self) -> EngineState {
        self.state.get()
    }

    /// Remember an effect toggle for the next `open()`, which otherwise
    /// resets the flag to its default.
    pub fn record_effect_override(&self, enabled: bool) {
        self.pending_effect
            .store(effect_code(enabled), Ordering::Release);
    }

    pub fn effect_override(&self) -> Option<bool> {
        decode_effect(self.pending_effect.load(Ordering::Acquire))
    }

    /// Publish the effect flag. While the engine is not live the value is
    /// also recorded for the next open.
    ///
    /// `open` consumes the override only after entering `Starting`, so a
    /// value recorded before that point is applied, and one recorded after
    /// it is seen as live here and discarded.
    pub fn set_effect_enabled(&self, enabled: bool) {
        let code = effect_code(enabled);
        if !self.refresh().is_live() {
            self.pending_effect.store(code, Ordering::Release);
        }
        self.params.set_effect_enabled(enabled);
        if self.state.get().is_live() {
            let _ = self.pending_effect.compare_exchange(
                code,
                0,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    fn take_effect_override(&self) -> Option<bool> {
        decode_effect(self.pending_effect.swap(0, Ordering::AcqRel))
    }

    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    pub fn monitor(&self) -> &RenderMonitor {
        &self.monitor
    }

    /// Current state after folding in what the render context reported.
    ///
    /// A raised device fault moves a live engine to `Failed`; the first
    /// rendered buffer moves `Starting` to `Running`. Both promotions are
    /// conditional, so a concurrent close always wins.
    pub fn refresh(&self) -> EngineState {
        let state = self.state.get();
        if state.is_live() && self.monitor.has_fault() {
            if self.state.promote(state, LifecycleEvent::FatalError) {
                warn!("Device fault reported by render context, engine failed");
            }
        } else if state == EngineState::Starting
            && self.monitor.callbacks() > 0
            && self.state.promote(state, LifecycleEvent::DeviceReady)
        {
            debug!("First render callback observed, engine running");
            self.fill_buffer_size();
        }
        self.state.get()
    }

    /// Backends that cannot query the callback size report 0; take the
    /// size the device actually delivered instead.
    fn fill_buffer_size(&self) {
        let delivered = self.monitor.last_buffer_frames();
        if delivered == 0 {
            return;
        }
        match self.device_info.write() {
            Ok(mut guard) => {
                if let Some(info) = guard.as_mut().filter(|info| info.buffer_size_frames == 0) {
                    info.buffer_size_frames = delivered;
                    debug!("Callback size reported by first buffer: {} frames", delivered);
                }
            }
            Err(_) => warn!("Device info lock poisoned, buffer size left unreported"),
        }
    }

    /// Negotiated device parameters of the current stream, if any.
    pub fn device_info(&self) -> Result<Option<DeviceInfo>, EngineError> {
        self.device_info
            .read()
            .map(|info| info.clone())
            .map_err(|_| EngineError::LockPoisoned {
                component: "device_info".to_string(),
            })
    }

    fn store_device_info(&self, info: Option<DeviceInfo>) -> Result<(), EngineError> {
        let mut guard = self
            .device_info
            .write()
            .map_err(|_| EngineError::LockPoisoned {
                component: "device_info".to_string(),
            })?;
        *guard = info;
        Ok(())
    }

    fn transition(&self, event: LifecycleEvent) -> Result<EngineState, EngineError> {
        self.state.apply(event).map_err(|illegal| {
            warn!(
                "Rejected lifecycle event {:?} in state {}",
                illegal.event, illegal.from
            );
            EngineError::EngineNotReady {
                state: illegal.from,
            }
        })
    }
}

/// Lifecycle owner for one device stream at a time.
pub struct AudioEngine {
    backend: Arc<dyn AudioBackend>,
    request: StreamRequest,
    lfo_rate_hz: f32,
    max_callback_frames: usize,
    drain_timeout: Duration,
    shared: Arc<EngineShared>,
    stream: Option<Box<dyn DeviceStream>>,
}

impl AudioEngine {
    pub fn new(config: &AppConfig, backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            request: StreamRequest::from(&config.audio),
            lfo_rate_hz: config.effect.lfo_rate_hz,
            max_callback_frames: config.audio.max_callback_frames,
            drain_timeout: Duration::from_millis(config.audio.drain_timeout_ms),
            shared: Arc::new(EngineShared::new(ParamDefaults::from(config))),
            stream: None,
        }
    }

    pub fn shared(&self) -> Arc<EngineShared> {
        Arc::clone(&self.shared)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Open the device stream.
    ///
    /// No-op returning the current `DeviceInfo` while `Starting`/`Running`.
    /// Parameters are reset to defaults first, then any effect toggle
    /// recorded before start is applied.
    pub fn open(&mut self) -> Result<DeviceInfo, EngineError> {
        match self.shared.refresh() {
            EngineState::Starting | EngineState::Running => {
                if let Some(info) = self.shared.device_info()? {
                    debug!("open() while live, returning current device info");
                    return Ok(info);
                }
            }
            EngineState::Failed => return Err(EngineError::AlreadyFailed),
            EngineState::Stopping => {
                return Err(EngineError::EngineNotReady {
                    state: EngineState::Stopping,
                })
            }
            EngineState::Uninitialized | EngineState::Stopped => {}
        }

        self.shared.params.reset();
        self.shared.monitor.arm();
        self.shared.transition(LifecycleEvent::Open)?;
        if let Some(enabled) = self.shared.take_effect_override() {
            self.shared.params.set_effect_enabled(enabled);
        }

        let render = RenderContext {
            params: Arc::clone(&self.shared.params),
            monitor: Arc::clone(&self.shared.monitor),
            lfo_rate_hz: self.lfo_rate_hz,
            max_callback_frames: self.max_callback_frames,
        };

        info!(
            "Opening {} stream: {} Hz, {} frames, {} channels, capture={}",
            self.backend.name(),
            self.request.sample_rate,
            self.request.buffer_frames,
            self.request.output_channels,
            self.request.capture_input
        );

        match self.backend.open(&self.request, render) {
            Ok(stream) => {
                let info = stream.info().clone();
                self.stream = Some(stream);
                self.shared.store_device_info(Some(info.clone()))?;
                info!(
                    "Stream open on '{}': {} Hz, {} frames, {} out / {} in",
                    info.device_name,
                    info.sample_rate_hz,
                    info.buffer_size_frames,
                    info.output_channels,
                    info.input_channels
                );
                Ok(info)
            }
            Err(err) => {
                self.shared.monitor.disarm_and_drain(self.drain_timeout);
                let _ = self.shared.transition(LifecycleEvent::OpenFailed);
                let err = match err {
                    EngineError::DeviceUnavailable { .. } => err,
                    other => EngineError::DeviceUnavailable {
                        reason: other.message(),
                    },
                };
                log_engine_error(&err, "AudioEngine::open");
                Err(err)
            }
        }
    }

    /// Poll until the first callback has fired, the engine failed, or
    /// `timeout` elapsed. Returns the state observed last.
    pub fn wait_until_running(&self, timeout: Duration) -> EngineState {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.shared.refresh();
            if state != EngineState::Starting || Instant::now() >= deadline {
                return state;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Stop the stream and wait for the render context to drain.
    ///
    /// Idempotent: a no-op while `Uninitialized`/`Stopped`. Tears down a
    /// `Failed` engine into `Stopped`.
    pub fn close(&mut self) -> Result<(), EngineError> {
        let state = self.shared.refresh();
        if matches!(state, EngineState::Uninitialized | EngineState::Stopped) {
            return Ok(());
        }

        self.shared.params.set_playing(false);
        if state != EngineState::Stopping {
            self.shared.transition(LifecycleEvent::Close)?;
        }

        let mut drained = self.shared.monitor.disarm_and_drain(self.drain_timeout);
        let closed = match self.stream.take() {
            Some(stream) => stream.close(),
            None => Ok(()),
        };
        // Joining the device thread also waits out a slow callback
        drained = drained || self.shared.monitor.in_flight() == 0;
        self.shared.store_device_info(None)?;

        if !drained {
            let _ = self.shared.transition(LifecycleEvent::FatalError);
            let err = EngineError::StreamFailure {
                reason: format!(
                    "Render callback still in flight after {:?}",
                    self.drain_timeout
                ),
            };
            log_engine_error(&err, "AudioEngine::close");
            return Err(err);
        }

        self.shared.transition(LifecycleEvent::DeviceStopped)?;
        info!(
            "Stream closed after {} callbacks ({} frames, {} degraded)",
            self.shared.monitor.callbacks(),
            self.shared.monitor.frames(),
            self.shared.monitor.degraded_buffers()
        );

        closed.map_err(|err| {
            log_engine_error(&err, "AudioEngine::close");
            err
        })
    }

    /// Tear down whatever is left and return to `Uninitialized`.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        if let Err(err) = self.close() {
            warn!("Close during reset reported: {}", err);
        }
        if self.shared.state.get() == EngineState::Stopping {
            // Drain never completed; force the stuck engine into Failed first
            let _ = self.shared.transition(LifecycleEvent::FatalError);
        }
        self.shared.transition(LifecycleEvent::Reset)?;
        self.shared.params.reset();
        info!("Engine reset");
        Ok(())
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if self.stream.is_some() {
            let _ = self.close();
        }
    }
}

fn effect_code(enabled: bool) -> u8 {
    if enabled {
        2
    } else {
        1
    }
}

fn decode_effect(code: u8) -> Option<bool> {
    match code {
        1 => Some(false),
        2 => Some(true),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::{SimulatedBackend, SimulatedDevice};

    fn engine_with(backend: Arc<SimulatedBackend>) -> AudioEngine {
        AudioEngine::new(&AppConfig::default(), backend)
    }

    #[test]
    fn test_open_close_cycle() {
        let backend = Arc::new(SimulatedBackend::new());
        let mut engine = engine_with(Arc::clone(&backend));
        let shared = engine.shared();

        let info = engine.open().unwrap();
        assert_eq!(info.sample_rate_hz, 48_000);
        assert_eq!(info.backend, "simulated");
        assert_eq!(
            engine.wait_until_running(Duration::from_secs(2)),
            EngineState::Running
        );

        engine.close().unwrap();
        assert_eq!(shared.refresh(), EngineState::Stopped);
        assert!(shared.device_info().unwrap().is_none());
        assert!(!backend.is_running());
    }

    #[test]
    fn test_open_while_live_does_not_reopen() {
        let backend = Arc::new(SimulatedBackend::new());
        let mut engine = engine_with(Arc::clone(&backend));

        let first = engine.open().unwrap();
        let second = engine.open().unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.opens(), 1);
        engine.close().unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut engine = engine_with(Arc::new(SimulatedBackend::new()));
        engine.close().unwrap();
        engine.open().unwrap();
        engine.close().unwrap();
        engine.close().unwrap();
        assert_eq!(engine.shared().refresh(), EngineState::Stopped);
    }

    #[test]
    fn test_open_failure_moves_to_failed() {
        let backend = Arc::new(SimulatedBackend::new());
        backend.fail_next_open();
        let mut engine = engine_with(Arc::clone(&backend));

        let err = engine.open().unwrap_err();
        assert!(matches!(err, EngineError::DeviceUnavailable { .. }));
        assert_eq!(engine.shared().refresh(), EngineState::Failed);
        assert_eq!(engine.open().unwrap_err(), EngineError::AlreadyFailed);

        engine.reset().unwrap();
        assert_eq!(engine.shared().refresh(), EngineState::Uninitialized);
        engine.open().unwrap();
        engine.close().unwrap();
    }

    #[test]
    fn test_open_resets_parameters_and_applies_override() {
        let mut engine = engine_with(Arc::new(SimulatedBackend::new()));
        let shared = engine.shared();
        shared.params().set_frequency(1234.0);
        shared.params().set_playing(true);
        shared.record_effect_override(false);

        engine.open().unwrap();
        assert_eq!(shared.params().frequency(), 440.0);
        assert!(!shared.params().playing());
        assert!(!shared.params().effect_enabled());
        assert_eq!(shared.effect_override(), None);
        engine.close().unwrap();
    }

    #[test]
    fn test_reports_negotiated_rate() {
        let backend = Arc::new(SimulatedBackend::with_device(SimulatedDevice {
            sample_rate: Some(44_100),
            buffer_frames: Some(192),
            ..SimulatedDevice::default()
        }));
        let mut engine = engine_with(backend);

        let info = engine.open().unwrap();
        assert_eq!(info.sample_rate_hz, 44_100);
        assert_eq!(info.buffer_size_frames, 192);
        engine.close().unwrap();
    }

    #[test]
    fn test_effect_set_while_live_leaves_no_override() {
        let mut engine = engine_with(Arc::new(SimulatedBackend::new()));
        let shared = engine.shared();
        engine.open().unwrap();

        shared.set_effect_enabled(false);
        assert!(!shared.params().effect_enabled());
        assert_eq!(shared.effect_override(), None);

        engine.close().unwrap();
        engine.open().unwrap();
        assert!(shared.params().effect_enabled());
        engine.close().unwrap();
    }

    #[test]
    fn test_effect_set_while_stopped_survives_open() {
        let mut engine = engine_with(Arc::new(SimulatedBackend::new()));
        let shared = engine.shared();

        shared.set_effect_enabled(false);
        assert_eq!(shared.effect_override(), Some(false));

        engine.open().unwrap();
        assert!(!shared.params().effect_enabled());
        assert_eq!(shared.effect_override(), None);
        engine.close().unwrap();
    }

    #[test]
    fn test_unreported_buffer_size_taken_from_first_callback() {
        let backend = Arc::new(SimulatedBackend::with_device(SimulatedDevice {
            buffer_frames: Some(512),
            report_buffer_size: false,
            ..SimulatedDevice::default()
        }));
        let mut engine = engine_with(backend);
        let shared = engine.shared();

        let opened = engine.open().unwrap();
        assert_eq!(opened.buffer_size_frames, 0);
        assert_eq!(
            engine.wait_until_running(Duration::from_secs(2)),
            EngineState::Running
        );

        let info = shared.device_info().unwrap().unwrap();
        assert_eq!(info.buffer_size_frames, 512);
        engine.close().unwrap();
    }

    #[test]
    fn test_fault_fails_engine_and_close_recovers() {
        let backend = Arc::new(SimulatedBackend::new());
        let mut engine = engine_with(Arc::clone(&backend));
        let shared = engine.shared();
        engine.open().unwrap();
        engine.wait_until_running(Duration::from_secs(2));

        backend.inject_fault();
        let deadline = Instant::now() + Duration::from_secs(2);
        while shared.refresh() != EngineState::Failed && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(shared.refresh(), EngineState::Failed);

        engine.close().unwrap();
        assert_eq!(shared.refresh(), EngineState::Stopped);
        assert!(!backend.is_running());
    }
}
