//! Backend abstractions for the engine core.
//!
//! A backend turns a [`StreamRequest`] plus a [`RenderContext`] into a live
//! device stream. The lifecycle above it (state machine, render gate,
//! parameter store) is backend-independent.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::audio::RenderContext;
use crate::config::AudioConfig;
use crate::error::EngineError;

/// What the engine asks the device for. Backends may negotiate different
/// values and report them through [`DeviceInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub sample_rate: u32,
    pub buffer_frames: u32,
    pub output_channels: u16,
    pub capture_input: bool,
    pub input_ring_frames: usize,
}

impl From<&AudioConfig> for StreamRequest {
    fn from(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.preferred_sample_rate,
            buffer_frames: config.preferred_buffer_frames,
            output_channels: config.output_channels,
            capture_input: config.capture_input,
            input_ring_frames: config.input_ring_frames,
        }
    }
}

/// Negotiated device parameters, valid while the engine is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub sample_rate_hz: u32,
    /// Frames per callback as negotiated. 0 when the host did not expose it.
    pub buffer_size_frames: u32,
    pub output_channels: u16,
    /// 0 when no capture stream is attached
    pub input_channels: u16,
    pub device_name: String,
    pub backend: String,
}

/// Trait implemented by platform-specific audio backends.
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open and start a device stream driving `render`.
    ///
    /// Returns once the stream is started. The first callback may arrive
    /// later; the engine observes it through the render monitor.
    fn open(
        &self,
        request: &StreamRequest,
        render: RenderContext,
    ) -> Result<Box<dyn DeviceStream>, EngineError>;
}

/// A started device stream.
pub trait DeviceStream: Send {
    fn info(&self) -> &DeviceInfo;

    /// Stop the device and release it. Blocks until the backend has
    /// returned from its last callback.
    fn close(self: Box<Self>) -> Result<(), EngineError>;
}

/// Trait representing a monotonic time source used for telemetry timestamps.
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

mod stream_thread;

#[cfg(target_os = "android")]
mod oboe;
#[cfg(target_os = "android")]
pub use oboe::OboeBackend;

#[cfg(not(target_os = "android"))]
mod cpal;
#[cfg(not(target_os = "android"))]
pub use cpal::CpalBackend;

mod simulated;
pub use simulated::{SimulatedBackend, SimulatedDevice, StubTimeSource};

/// Hardware backend for the current platform.
pub fn platform_backend() -> std::sync::Arc<dyn AudioBackend> {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "android")] {
            std::sync::Arc::new(OboeBackend::new())
        } else {
            std::sync::Arc::new(CpalBackend::new())
        }
    }
}
