//! Android backend driving Oboe streams.
//!
//! Output is the master stream: its callback renders every buffer. Capture
//! runs as a second callback stream feeding the input ring, so neither
//! callback blocks on the other.

use oboe::{
    AudioInputCallback, AudioInputStreamSafe, AudioOutputCallback, AudioOutputStreamSafe,
    AudioStream, AudioStreamAsync, AudioStreamBase, AudioStreamBuilder, DataCallbackResult,
    Input, Output, PerformanceMode, SharingMode,
};
use std::sync::Arc;

use crate::audio::{InputProducer, InputRing, RenderCallback, RenderContext, RenderMonitor};
use crate::error::EngineError;

use super::stream_thread::{HeldStream, StreamThread};
use super::{AudioBackend, DeviceInfo, DeviceStream, StreamRequest};

#[derive(Default)]
pub struct OboeBackend {
    _unit: (),
}

impl OboeBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioBackend for OboeBackend {
    fn name(&self) -> &'static str {
        "oboe"
    }

    fn open(
        &self,
        request: &StreamRequest,
        render: RenderContext,
    ) -> Result<Box<dyn DeviceStream>, EngineError> {
        let request = request.clone();
        let stream = StreamThread::spawn("tone-engine-oboe", move || {
            open_streams(&request, render)
        })?;
        Ok(Box::new(stream))
    }
}

/// Output callback. Mono frames; the render path sees one channel.
struct ToneOutputCallback {
    render: RenderCallback,
    monitor: Arc<RenderMonitor>,
    sample_rate: u32,
}

impl AudioOutputCallback for ToneOutputCallback {
    type FrameType = (f32, oboe::Mono);

    fn on_audio_ready(
        &mut self,
        stream: &mut dyn AudioOutputStreamSafe,
        frames: &mut [f32],
    ) -> DataCallbackResult {
        // The negotiated rate is only known once the stream is open
        let rate = stream.get_sample_rate().max(1) as u32;
        if rate != self.sample_rate {
            self.render.retune(rate);
            self.sample_rate = rate;
        }
        self.render.render(frames, 1);
        DataCallbackResult::Continue
    }

    fn on_error_before_close(
        &mut self,
        _stream: &mut dyn AudioOutputStreamSafe,
        _error: oboe::Error,
    ) {
        self.monitor.raise_fault();
    }
}

struct CaptureCallback {
    producer: InputProducer,
    monitor: Arc<RenderMonitor>,
}

impl AudioInputCallback for CaptureCallback {
    type FrameType = (f32, oboe::Mono);

    fn on_audio_ready(
        &mut self,
        _stream: &mut dyn AudioInputStreamSafe,
        frames: &[f32],
    ) -> DataCallbackResult {
        self.producer.push_interleaved(frames, 1);
        DataCallbackResult::Continue
    }

    fn on_error_before_close(&mut self, _stream: &mut dyn AudioInputStreamSafe, _error: oboe::Error) {
        self.monitor.raise_fault();
    }
}

struct OboeStreams {
    output: AudioStreamAsync<Output, ToneOutputCallback>,
    input: Option<AudioStreamAsync<Input, CaptureCallback>>,
}

impl HeldStream for OboeStreams {
    fn halt(mut self) -> Result<(), EngineError> {
        // Stop master first, then the capture stream
        let stopped = self.output.stop();
        if let Some(input) = self.input.as_mut() {
            if let Err(e) = input.stop() {
                log::warn!("Failed to stop input stream: {:?}", e);
            }
        }
        stopped.map_err(|e| EngineError::StreamFailure {
            reason: format!("Failed to stop output stream: {:?}", e),
        })
    }
}

fn open_streams(
    request: &StreamRequest,
    render: RenderContext,
) -> Result<(OboeStreams, DeviceInfo), EngineError> {
    let monitor = Arc::clone(&render.monitor);
    let mut callback = render.into_callback(request.sample_rate);

    let mut input = None;
    if request.capture_input {
        let (producer, consumer) = InputRing::new(request.input_ring_frames);
        match open_input(request.sample_rate, producer, Arc::clone(&monitor)) {
            Ok(stream) => {
                callback = callback.with_input(consumer);
                input = Some(stream);
            }
            Err(err) => log::warn!("Capture unavailable, passthrough disabled: {}", err),
        }
    }

    let mut output = AudioStreamBuilder::default()
        .set_performance_mode(PerformanceMode::LowLatency)
        .set_sharing_mode(SharingMode::Exclusive)
        .set_direction::<Output>()
        .set_sample_rate(request.sample_rate as i32)
        .set_channel_count::<oboe::Mono>()
        .set_format::<f32>()
        .set_callback(ToneOutputCallback {
            render: callback,
            monitor,
            sample_rate: request.sample_rate,
        })
        .open_stream()
        .map_err(|e| EngineError::DeviceUnavailable {
            reason: format!("Output stream: {:?}", e),
        })?;

    // Capture first so the ring is filling when output starts pulling
    if let Some(stream) = input.as_mut() {
        if let Err(e) = stream.start() {
            log::warn!("Failed to start input stream: {:?}", e);
            input = None;
        }
    }
    output.start().map_err(|e| EngineError::DeviceUnavailable {
        reason: format!("Failed to start output stream: {:?}", e),
    })?;

    let info = DeviceInfo {
        sample_rate_hz: output.get_sample_rate().max(0) as u32,
        buffer_size_frames: output.get_frames_per_burst().max(0) as u32,
        output_channels: 1,
        input_channels: if input.is_some() { 1 } else { 0 },
        device_name: format!("Oboe device {}", output.get_device_id()),
        backend: "oboe".to_string(),
    };

    Ok((OboeStreams { output, input }, info))
}

fn open_input(
    sample_rate: u32,
    producer: InputProducer,
    monitor: Arc<RenderMonitor>,
) -> Result<AudioStreamAsync<Input, CaptureCallback>, EngineError> {
    AudioStreamBuilder::default()
        .set_performance_mode(PerformanceMode::LowLatency)
        .set_sharing_mode(SharingMode::Exclusive)
        .set_direction::<Input>()
        .set_sample_rate(sample_rate as i32)
        .set_channel_count::<oboe::Mono>()
        .set_format::<f32>()
        .set_callback(CaptureCallback { producer, monitor })
        .open_stream()
        .map_err(|e| EngineError::DeviceUnavailable {
            reason: format!("Input stream: {:?}", e),
        })
}
