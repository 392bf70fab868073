use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;

use crate::audio::{InputConsumer, InputRing, RenderContext, RenderMonitor};
use crate::error::EngineError;

use super::stream_thread::{HeldStream, StreamThread};
use super::{AudioBackend, DeviceInfo, DeviceStream, StreamRequest};

/// Desktop backend built on cpal's default host.
///
/// Output is always opened. Capture is best-effort: if no usable input
/// device matches the output sample rate, the engine runs without
/// passthrough and reports `input_channels == 0`.
#[derive(Default)]
pub struct CpalBackend {
    _unit: (),
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open(
        &self,
        request: &StreamRequest,
        render: RenderContext,
    ) -> Result<Box<dyn DeviceStream>, EngineError> {
        let request = request.clone();
        let stream = StreamThread::spawn("tone-engine-cpal", move || {
            open_streams(&request, render)
        })?;
        Ok(Box::new(stream))
    }
}

struct CpalStreams {
    output: cpal::Stream,
    input: Option<cpal::Stream>,
}

impl HeldStream for CpalStreams {
    fn halt(self) -> Result<(), EngineError> {
        let paused = self.output.pause();
        if let Some(input) = &self.input {
            let _ = input.pause();
        }
        // Dropping the stream joins the host callback thread
        drop(self.output);
        drop(self.input);
        paused.map_err(|e| EngineError::StreamFailure {
            reason: format!("Failed to pause output stream: {:?}", e),
        })
    }
}

fn open_streams(
    request: &StreamRequest,
    render: RenderContext,
) -> Result<(CpalStreams, DeviceInfo), EngineError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| EngineError::DeviceUnavailable {
            reason: "No default output device found".to_string(),
        })?;
    let device_name = device
        .name()
        .unwrap_or_else(|_| "Unknown output device".to_string());

    let supported = select_output_config(&device, request)?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(EngineError::DeviceUnavailable {
            reason: format!(
                "Only F32 output is supported, device offers {:?}",
                supported.sample_format()
            ),
        });
    }

    let buffer_size = match supported.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            cpal::BufferSize::Fixed(request.buffer_frames.clamp(*min, *max))
        }
        cpal::SupportedBufferSize::Unknown => cpal::BufferSize::Default,
    };
    let mut stream_config: cpal::StreamConfig = supported.config();
    stream_config.buffer_size = buffer_size.clone();

    let channels = stream_config.channels as usize;
    let sample_rate = stream_config.sample_rate.0;
    let monitor = Arc::clone(&render.monitor);
    let mut callback = render.into_callback(sample_rate);

    let mut input_stream = None;
    let mut input_channels = 0;
    if request.capture_input {
        match open_input(
            &host,
            sample_rate,
            request.input_ring_frames,
            Arc::clone(&monitor),
        ) {
            Ok((stream, stream_channels, consumer)) => {
                callback = callback.with_input(consumer);
                input_stream = Some(stream);
                input_channels = stream_channels;
            }
            Err(err) => {
                log::warn!("Capture unavailable, passthrough disabled: {}", err);
            }
        }
    }

    let fault = Arc::clone(&monitor);
    let output = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                callback.render(data, channels);
            },
            move |_err| fault.raise_fault(),
            None,
        )
        .map_err(|e| EngineError::DeviceUnavailable {
            reason: format!("Failed to build output stream: {:?}", e),
        })?;

    if let Some(input) = &input_stream {
        if let Err(e) = input.play() {
            log::warn!("Failed to start input stream: {:?}", e);
        }
    }
    output.play().map_err(|e| EngineError::DeviceUnavailable {
        reason: format!("Failed to start output stream: {:?}", e),
    })?;

    let info = DeviceInfo {
        sample_rate_hz: sample_rate,
        buffer_size_frames: match buffer_size {
            cpal::BufferSize::Fixed(frames) => frames,
            cpal::BufferSize::Default => 0,
        },
        output_channels: stream_config.channels,
        input_channels,
        device_name,
        backend: "cpal".to_string(),
    };

    Ok((
        CpalStreams {
            output,
            input: input_stream,
        },
        info,
    ))
}

/// Prefer an F32 config at the requested rate and channel count, falling
/// back to the device default.
fn select_output_config(
    device: &cpal::Device,
    request: &StreamRequest,
) -> Result<cpal::SupportedStreamConfig, EngineError> {
    let wanted = cpal::SampleRate(request.sample_rate);
    if let Ok(mut ranges) = device.supported_output_configs() {
        let matching = ranges.find(|range| {
            range.sample_format() == cpal::SampleFormat::F32
                && range.channels() == request.output_channels
                && range.min_sample_rate() <= wanted
                && wanted <= range.max_sample_rate()
        });
        if let Some(range) = matching {
            return Ok(range.with_sample_rate(wanted));
        }
    }

    device
        .default_output_config()
        .map_err(|e| EngineError::DeviceUnavailable {
            reason: format!("Failed to get default output config: {:?}", e),
        })
}

fn open_input(
    host: &cpal::Host,
    sample_rate: u32,
    ring_frames: usize,
    monitor: Arc<RenderMonitor>,
) -> Result<(cpal::Stream, u16, InputConsumer), EngineError> {
    let device = host
        .default_input_device()
        .ok_or_else(|| EngineError::DeviceUnavailable {
            reason: "No default input device found".to_string(),
        })?;

    let wanted = cpal::SampleRate(sample_rate);
    let supported = device
        .supported_input_configs()
        .map_err(|e| EngineError::DeviceUnavailable {
            reason: format!("Failed to query input configs: {:?}", e),
        })?
        .find(|range| {
            range.sample_format() == cpal::SampleFormat::F32
                && range.min_sample_rate() <= wanted
                && wanted <= range.max_sample_rate()
        })
        .ok_or_else(|| EngineError::DeviceUnavailable {
            reason: format!("No F32 input config at {} Hz", sample_rate),
        })?
        .with_sample_rate(wanted);

    let stream_config: cpal::StreamConfig = supported.config();
    let channels = stream_config.channels;
    let (mut producer, consumer) = InputRing::new(ring_frames);

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                producer.push_interleaved(data, channels as usize);
            },
            move |_err| monitor.raise_fault(),
            None,
        )
        .map_err(|e| EngineError::DeviceUnavailable {
            reason: format!("Failed to build input stream: {:?}", e),
        })?;

    Ok((stream, channels, consumer))
}
