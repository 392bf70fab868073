//! Render callback - the real-time path invoked once per device buffer
//!
//! # Real-Time Safety
//! - No heap allocations (scratch space is sized when the stream opens)
//! - No locks (parameters come from `ParameterStore` atomics)
//! - No logging, no error propagation: anything inconsistent renders
//!   silence and bumps a counter on the `RenderMonitor`
//!
//! # Per-buffer flow
//! ```text
//! RenderCallback::render()
//!   ├─> RenderMonitor::enter()        [closed gate -> silence]
//!   ├─> ParameterStore::snapshot()    [once per buffer]
//!   ├─> tone path: SineOscillator + linear gain ramp
//!   │     or
//!   ├─> passthrough: input -> PingPong
//!   └─> copy mono result to every output channel
//! ```

use std::sync::Arc;

use super::input_ring::InputConsumer;
use super::monitor::RenderMonitor;
use super::params::ParameterStore;
use crate::dsp::{PingPong, SineOscillator};

/// Everything a backend needs to build the callback once the device has
/// negotiated its sample rate.
pub struct RenderContext {
    pub params: Arc<ParameterStore>,
    pub monitor: Arc<RenderMonitor>,
    pub lfo_rate_hz: f32,
    pub max_callback_frames: usize,
}

impl RenderContext {
    pub fn into_callback(self, sample_rate: u32) -> RenderCallback {
        RenderCallback {
            params: self.params,
            monitor: self.monitor,
            oscillator: SineOscillator::new(sample_rate),
            ping_pong: PingPong::new(sample_rate, self.lfo_rate_hz),
            tone_gain: 0.0,
            input: None,
            mono: vec![0.0; self.max_callback_frames.max(1)],
        }
    }
}

/// Render-thread state. Owned by exactly one device callback.
pub struct RenderCallback {
    params: Arc<ParameterStore>,
    monitor: Arc<RenderMonitor>,
    oscillator: SineOscillator,
    ping_pong: PingPong,
    /// Gain reached at the end of the previous buffer
    tone_gain: f32,
    input: Option<InputConsumer>,
    mono: Vec<f32>,
}

impl RenderCallback {
    /// Pull microphone samples from a capture ring on every buffer.
    pub fn with_input(mut self, input: InputConsumer) -> Self {
        self.input = Some(input);
        self
    }

    pub fn is_capturing(&self) -> bool {
        self.input.is_some()
    }

    /// Follow a device-side sample rate change. Allocation-free.
    pub fn retune(&mut self, sample_rate: u32) {
        self.oscillator.set_sample_rate(sample_rate);
        self.ping_pong.set_sample_rate(sample_rate);
    }

    /// Render one interleaved buffer, reading capture data from the ring
    /// (if any).
    #[inline]
    pub fn render(&mut self, output: &mut [f32], channels: usize) {
        self.process(output, channels, None);
    }

    /// Render one interleaved buffer with capture data supplied by the
    /// caller (mono, one sample per frame).
    #[inline]
    pub fn render_with_input(&mut self, output: &mut [f32], channels: usize, input: &[f32]) {
        self.process(output, channels, Some(input));
    }

    fn process(&mut self, output: &mut [f32], channels: usize, external: Option<&[f32]>) {
        let Some(_ticket) = self.monitor.enter() else {
            output.fill(0.0);
            return;
        };

        if channels == 0 || output.len() % channels != 0 || self.monitor.has_fault() {
            output.fill(0.0);
            self.monitor.record_degraded();
            return;
        }

        let frames = output.len() / channels;
        let snap = self.params.snapshot();
        let tone = snap.playing || self.tone_gain > 0.0;
        // Tone takes priority over passthrough while audible
        let target = if snap.playing { snap.volume } else { 0.0 };
        let start = self.tone_gain;
        let step = (target - start) / frames.max(1) as f32;

        // Buffers larger than the scratch space render in slices that
        // share one snapshot and one continuous gain ramp
        let block = self.mono.len();
        for (index, chunk) in output.chunks_mut(block * channels).enumerate() {
            let offset = index * block;
            let mono = &mut self.mono[..chunk.len() / channels];

            if tone {
                for (i, sample) in mono.iter_mut().enumerate() {
                    let gain = start + step * (offset + i + 1) as f32;
                    *sample = self.oscillator.next_sample(snap.frequency_hz) * gain;
                }
            } else if let Some(input) = external {
                let available = input.get(offset..).unwrap_or(&[]);
                let n = available.len().min(mono.len());
                mono[..n].copy_from_slice(&available[..n]);
                mono[n..].fill(0.0);
                self.ping_pong.process(mono, snap.effect_enabled);
            } else if let Some(ring) = self.input.as_mut() {
                ring.read_into(mono);
                self.ping_pong.process(mono, snap.effect_enabled);
            } else {
                mono.fill(0.0);
            }

            for (frame, &sample) in chunk.chunks_exact_mut(channels).zip(mono.iter()) {
                frame.fill(sample);
            }
        }
        if tone {
            self.tone_gain = target;
        }

        self.monitor.record_buffer(frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::input_ring::InputRing;
    use approx::assert_abs_diff_eq;

    fn setup(max_frames: usize) -> (Arc<ParameterStore>, Arc<RenderMonitor>, RenderCallback) {
        let params = Arc::new(ParameterStore::default());
        let monitor = Arc::new(RenderMonitor::new());
        monitor.arm();
        let callback = RenderContext {
            params: Arc::clone(&params),
            monitor: Arc::clone(&monitor),
            lfo_rate_hz: 2.0,
            max_callback_frames: max_frames,
        }
        .into_callback(48_000);
        (params, monitor, callback)
    }

    #[test]
    fn test_disarmed_gate_renders_silence_without_counting() {
        let (params, monitor, mut callback) = setup(256);
        params.set_playing(true);
        monitor.disarm_and_drain(std::time::Duration::from_millis(10));

        let mut out = vec![1.0f32; 512];
        callback.render(&mut out, 2);

        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(monitor.callbacks(), 0);
    }

    #[test]
    fn test_idle_without_input_is_silent() {
        let (_params, monitor, mut callback) = setup(256);
        let mut out = vec![1.0f32; 512];
        callback.render(&mut out, 2);

        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(monitor.callbacks(), 1);
        assert_eq!(monitor.last_buffer_frames(), 256);
    }

    #[test]
    fn test_tone_ramps_to_volume_and_duplicates_channels() {
        let (params, _monitor, mut callback) = setup(256);
        params.set_volume(1.0);
        params.set_playing(true);

        let mut first = vec![0.0f32; 256];
        callback.render(&mut first, 2);
        let mut second = vec![0.0f32; 256];
        callback.render(&mut second, 2);

        for frame in second.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
        // Second buffer runs at full gain
        let peak = second.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!(peak > 0.5, "expected audible tone, peak {}", peak);
        // First buffer starts from silence
        assert!(first[0].abs() < 1e-3);
    }

    #[test]
    fn test_tone_stop_ramps_down_then_goes_silent() {
        let (params, _monitor, mut callback) = setup(128);
        params.set_playing(true);
        let mut out = vec![0.0f32; 128];
        callback.render(&mut out, 1);

        params.set_playing(false);
        callback.render(&mut out, 1);
        assert_abs_diff_eq!(out[127], 0.0, epsilon = 1e-6);

        callback.render(&mut out, 1);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_passthrough_without_effect_is_identity() {
        let (params, _monitor, mut callback) = setup(64);
        params.set_effect_enabled(false);
        let input: Vec<f32> = (0..64).map(|i| (i as f32 / 64.0) - 0.5).collect();

        let mut out = vec![0.0f32; 64];
        callback.render_with_input(&mut out, 1, &input);

        assert_eq!(out, input);
    }

    #[test]
    fn test_passthrough_from_ring_applies_effect() {
        let params = Arc::new(ParameterStore::default());
        let monitor = Arc::new(RenderMonitor::new());
        monitor.arm();
        let (mut producer, consumer) = InputRing::new(1024);
        let mut callback = RenderContext {
            params: Arc::clone(&params),
            monitor,
            lfo_rate_hz: 2.0,
            max_callback_frames: 64,
        }
        .into_callback(48_000)
        .with_input(consumer);
        assert!(callback.is_capturing());

        producer.push_interleaved(&[1.0; 64], 1);
        let mut out = vec![0.0f32; 64];
        callback.render(&mut out, 1);

        // LFO starts at phase 0 -> gain 0.5, rising slowly
        assert_abs_diff_eq!(out[0], 0.5, epsilon = 1e-6);
        assert!(out[63] > 0.5 && out[63] < 0.51);
    }

    #[test]
    fn test_tone_has_priority_over_passthrough() {
        let (params, _monitor, mut callback) = setup(64);
        params.set_effect_enabled(false);
        params.set_frequency(1000.0);
        params.set_playing(true);
        let input = vec![0.9f32; 64];

        let mut out = vec![0.0f32; 64];
        callback.render_with_input(&mut out, 1, &input);

        assert_ne!(out, input);
    }

    #[test]
    fn test_inconsistent_layout_degrades_to_silence() {
        let (params, monitor, mut callback) = setup(64);
        params.set_playing(true);

        let mut out = vec![1.0f32; 5];
        callback.render(&mut out, 2);
        assert!(out.iter().all(|&s| s == 0.0));

        assert_eq!(monitor.degraded_buffers(), 1);
    }

    #[test]
    fn test_buffer_larger_than_scratch_renders_tone() {
        let (params, monitor, mut callback) = setup(64);
        params.set_volume(1.0);
        params.set_frequency(1000.0);
        params.set_playing(true);

        let mut out = vec![0.0f32; 64 * 2 * 2];
        callback.render(&mut out, 2);
        // Ramp spans the whole buffer, so the tail runs near full gain
        let tail_peak = out[128..].iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!(tail_peak > 0.5, "expected audible tail, peak {}", tail_peak);
        assert_eq!(monitor.degraded_buffers(), 0);
        assert_eq!(monitor.last_buffer_frames(), 128);

        // Same samples as a single oscillator run over 128 frames
        let mut reference = SineOscillator::new(48_000);
        let mut expected = vec![0.0f32; 128];
        reference.fill(&mut expected, 1000.0);
        for (i, frame) in out.chunks_exact(2).enumerate() {
            let gain = (i + 1) as f32 / 128.0;
            assert_abs_diff_eq!(frame[0], expected[i] * gain, epsilon = 1e-6);
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn test_oversized_passthrough_keeps_input_order() {
        let (params, _monitor, mut callback) = setup(16);
        params.set_effect_enabled(false);
        let input: Vec<f32> = (0..40).map(|i| i as f32 / 40.0).collect();

        let mut out = vec![0.0f32; 40];
        callback.render_with_input(&mut out, 1, &input);

        assert_eq!(out, input);
    }

    #[test]
    fn test_fault_silences_output() {
        let (params, monitor, mut callback) = setup(64);
        params.set_playing(true);
        monitor.raise_fault();

        let mut out = vec![1.0f32; 64];
        callback.render(&mut out, 1);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
