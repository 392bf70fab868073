use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::RenderContext;
use crate::error::EngineError;

use super::{AudioBackend, DeviceInfo, DeviceStream, StreamRequest, TimeSource};

/// Device characteristics the simulated backend negotiates.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    /// Rate the device "negotiates". `None` accepts the requested rate.
    pub sample_rate: Option<u32>,
    /// Frames per callback. `None` accepts the requested size.
    pub buffer_frames: Option<u32>,
    /// When false the stream reports a callback size of 0, like a host
    /// that does not expose it.
    pub report_buffer_size: bool,
    /// Capture channels. 0 disables the synthetic microphone.
    pub input_channels: u16,
    /// Wall-clock delay between callbacks
    pub period: Duration,
    /// Silence before the first callback, as on a device that is slow to
    /// start pulling
    pub first_callback_delay: Duration,
    /// Seed for the synthetic microphone noise
    pub seed: u64,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self {
            sample_rate: None,
            buffer_frames: None,
            report_buffer_size: true,
            input_channels: 1,
            period: Duration::from_millis(1),
            first_callback_delay: Duration::ZERO,
            seed: 0x5eed,
        }
    }
}

/// Backend without real audio I/O, used for deterministic testing and CLI
/// tooling.
///
/// A dedicated thread plays the role of the device callback thread: it
/// invokes the render path at a fixed period and feeds it seeded noise as
/// microphone input. Failure injection hooks let tests drive the engine
/// into `Failed`.
pub struct SimulatedBackend {
    device: SimulatedDevice,
    fail_next_open: AtomicBool,
    opens: AtomicU64,
    shared: Arc<SimulatedShared>,
}

#[derive(Default)]
struct SimulatedShared {
    /// Every callback the device thread made, whether or not it rendered
    invocations: AtomicU64,
    fault_requested: AtomicBool,
    last_peak: AtomicU32,
    running: AtomicBool,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::with_device(SimulatedDevice::default())
    }

    pub fn with_device(device: SimulatedDevice) -> Self {
        Self {
            device,
            fail_next_open: AtomicBool::new(false),
            opens: AtomicU64::new(0),
            shared: Arc::new(SimulatedShared::default()),
        }
    }

    /// Make the next `open` fail with `DeviceUnavailable`.
    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }

    /// Report an unrecoverable device error on the running stream.
    pub fn inject_fault(&self) {
        self.shared.fault_requested.store(true, Ordering::SeqCst);
    }

    /// Successful opens so far.
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Device callbacks so far, including those rejected by the render gate.
    pub fn invocations(&self) -> u64 {
        self.shared.invocations.load(Ordering::SeqCst)
    }

    /// Peak absolute sample of the most recent buffer.
    pub fn last_peak(&self) -> f32 {
        f32::from_bits(self.shared.last_peak.load(Ordering::Relaxed))
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn open(
        &self,
        request: &StreamRequest,
        render: RenderContext,
    ) -> Result<Box<dyn DeviceStream>, EngineError> {
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(EngineError::DeviceUnavailable {
                reason: "Simulated device refused to open".to_string(),
            });
        }

        let sample_rate = self.device.sample_rate.unwrap_or(request.sample_rate);
        let frames = self
            .device
            .buffer_frames
            .unwrap_or(request.buffer_frames)
            .max(1) as usize;
        let channels = request.output_channels.max(1);
        let input_channels = if request.capture_input {
            self.device.input_channels
        } else {
            0
        };

        let info = DeviceInfo {
            sample_rate_hz: sample_rate,
            buffer_size_frames: if self.device.report_buffer_size {
                frames as u32
            } else {
                0
            },
            output_channels: channels,
            input_channels,
            device_name: "Simulated device".to_string(),
            backend: self.name().to_string(),
        };

        self.shared.fault_requested.store(false, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let shared = Arc::clone(&self.shared);
        let period = self.device.period;
        let first_callback_delay = self.device.first_callback_delay;
        let seed = self.device.seed;
        let monitor = Arc::clone(&render.monitor);
        let mut callback = render.into_callback(sample_rate);

        let handle = thread::Builder::new()
            .name("tone-engine-simulated".to_string())
            .spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut output = vec![0.0f32; frames * channels as usize];
                let mut input = vec![0.0f32; frames];

                let started = Instant::now();
                while started.elapsed() < first_callback_delay {
                    if thread_stop.load(Ordering::SeqCst) {
                        return;
                    }
                    thread::sleep(Duration::from_millis(1));
                }

                while !thread_stop.load(Ordering::SeqCst) {
                    if shared.fault_requested.swap(false, Ordering::SeqCst) {
                        monitor.raise_fault();
                    }
                    shared.invocations.fetch_add(1, Ordering::SeqCst);
                    if input_channels > 0 {
                        for sample in input.iter_mut() {
                            *sample = rng.gen_range(-0.25f32..0.25);
                        }
                        callback.render_with_input(&mut output, channels as usize, &input);
                    } else {
                        callback.render(&mut output, channels as usize);
                    }
                    let peak = output.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
                    shared.last_peak.store(peak.to_bits(), Ordering::Relaxed);
                    thread::sleep(period);
                }
            })
            .map_err(|e| EngineError::DeviceUnavailable {
                reason: format!("Failed to spawn simulated device thread: {}", e),
            })?;

        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedStream {
            info,
            stop,
            handle: Some(handle),
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct SimulatedStream {
    info: DeviceInfo,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    shared: Arc<SimulatedShared>,
}

impl SimulatedStream {
    fn halt(&mut self) -> Result<(), EngineError> {
        self.stop.store(true, Ordering::SeqCst);
        let joined = match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| EngineError::StreamFailure {
                reason: "Simulated device thread panicked".to_string(),
            }),
            None => Ok(()),
        };
        self.shared.running.store(false, Ordering::SeqCst);
        joined
    }
}

impl DeviceStream for SimulatedStream {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn close(mut self: Box<Self>) -> Result<(), EngineError> {
        self.halt()
    }
}

impl Drop for SimulatedStream {
    fn drop(&mut self) {
        let _ = self.halt();
    }
}

/// Deterministic time source for desktop runs.
///
/// Each call to `now()` advances by a fixed 10ms to guarantee monotonic
/// timestamps even when no real audio stream is active.
pub struct StubTimeSource {
    start: Instant,
    offset_ms: AtomicU64,
}

impl StubTimeSource {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }
}

impl Default for StubTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for StubTimeSource {
    fn now(&self) -> Instant {
        let ms = self.offset_ms.fetch_add(10, Ordering::SeqCst);
        self.start + Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ParameterStore, RenderMonitor};

    fn context(monitor: &Arc<RenderMonitor>) -> RenderContext {
        RenderContext {
            params: Arc::new(ParameterStore::default()),
            monitor: Arc::clone(monitor),
            lfo_rate_hz: 2.0,
            max_callback_frames: 4096,
        }
    }

    fn request() -> StreamRequest {
        StreamRequest {
            sample_rate: 48_000,
            buffer_frames: 128,
            output_channels: 2,
            capture_input: true,
            input_ring_frames: 1024,
        }
    }

    #[test]
    fn test_reports_negotiated_parameters() {
        let backend = SimulatedBackend::with_device(SimulatedDevice {
            sample_rate: Some(44_100),
            ..SimulatedDevice::default()
        });
        let monitor = Arc::new(RenderMonitor::new());
        let stream = backend.open(&request(), context(&monitor)).unwrap();

        assert_eq!(stream.info().sample_rate_hz, 44_100);
        assert_eq!(stream.info().buffer_size_frames, 128);
        assert_eq!(stream.info().input_channels, 1);
        assert_eq!(backend.opens(), 1);
        stream.close().unwrap();
        assert!(!backend.is_running());
    }

    #[test]
    fn test_fail_next_open_is_one_shot() {
        let backend = SimulatedBackend::new();
        let monitor = Arc::new(RenderMonitor::new());
        backend.fail_next_open();

        assert!(backend.open(&request(), context(&monitor)).is_err());
        let stream = backend.open(&request(), context(&monitor)).unwrap();
        stream.close().unwrap();
        assert_eq!(backend.opens(), 1);
    }

    #[test]
    fn test_no_invocations_after_close() {
        let backend = SimulatedBackend::new();
        let monitor = Arc::new(RenderMonitor::new());
        monitor.arm();
        let stream = backend.open(&request(), context(&monitor)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while monitor.callbacks() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(monitor.callbacks() > 0);

        stream.close().unwrap();
        let after_close = backend.invocations();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(backend.invocations(), after_close);
    }

    #[test]
    fn test_first_callback_delay_holds_back_rendering() {
        let backend = SimulatedBackend::with_device(SimulatedDevice {
            first_callback_delay: Duration::from_secs(5),
            ..SimulatedDevice::default()
        });
        let monitor = Arc::new(RenderMonitor::new());
        monitor.arm();
        let stream = backend.open(&request(), context(&monitor)).unwrap();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(backend.invocations(), 0);

        // Close must not wait out the delay
        let closing = Instant::now();
        stream.close().unwrap();
        assert!(closing.elapsed() < Duration::from_secs(1));
        assert_eq!(backend.invocations(), 0);
    }

    #[test]
    fn test_unreported_buffer_size_reads_as_zero() {
        let backend = SimulatedBackend::with_device(SimulatedDevice {
            buffer_frames: Some(480),
            report_buffer_size: false,
            ..SimulatedDevice::default()
        });
        let monitor = Arc::new(RenderMonitor::new());
        let stream = backend.open(&request(), context(&monitor)).unwrap();
        assert_eq!(stream.info().buffer_size_frames, 0);
        stream.close().unwrap();
    }

    #[test]
    fn test_stub_time_source_advances_monotonically() {
        let clock = StubTimeSource::new();
        let first = clock.now();
        let second = clock.now();
        assert_eq!(second - first, Duration::from_millis(10));
    }
}
