//! Ping-pong modulation - tremolo-style amplitude envelope for passthrough
//! audio.
//!
//! `gain = 0.5 + 0.5 * sin(2π * lfo_phase)`, with `lfo_phase` advancing by
//! `rate / sample_rate` per sample. When disabled the input passes through
//! untouched and the LFO phase is frozen, so re-enabling resumes from the
//! same point in the envelope.

use std::f64::consts::TAU;

use super::oscillator::wrap_unit;

#[derive(Debug, Clone)]
pub struct PingPong {
    lfo_phase: f64,
    rate_hz: f64,
    sample_rate: f64,
}

impl PingPong {
    pub fn new(sample_rate: u32, rate_hz: f32) -> Self {
        Self {
            lfo_phase: 0.0,
            rate_hz: f64::from(rate_hz.max(0.0)),
            sample_rate: f64::from(sample_rate.max(1)),
        }
    }

    pub fn lfo_phase(&self) -> f64 {
        self.lfo_phase
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = f64::from(sample_rate.max(1));
    }

    /// Current envelope gain without advancing.
    #[inline]
    pub fn gain(&self) -> f32 {
        (0.5 + 0.5 * (TAU * self.lfo_phase).sin()) as f32
    }

    /// Process one sample.
    #[inline]
    pub fn process_sample(&mut self, input: f32, enabled: bool) -> f32 {
        if !enabled {
            return input;
        }
        let out = input * self.gain();
        self.lfo_phase = wrap_unit(self.lfo_phase + self.rate_hz / self.sample_rate);
        out
    }

    /// Process a buffer in place.
    pub fn process(&mut self, samples: &mut [f32], enabled: bool) {
        if !enabled {
            return;
        }
        for sample in samples.iter_mut() {
            *sample = self.process_sample(*sample, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_disabled_is_identity() {
        let mut fx = PingPong::new(48_000, 2.0);
        let input: Vec<f32> = (0..4096).map(|i| ((i as f32) * 0.013).sin()).collect();
        let mut buffer = input.clone();

        fx.process(&mut buffer, false);

        assert_eq!(buffer, input);
        assert_eq!(fx.lfo_phase(), 0.0);
    }

    #[test]
    fn test_disabled_freezes_phase_between_enabled_runs() {
        let mut fx = PingPong::new(1_000, 10.0);
        let mut buffer = vec![1.0f32; 25];
        fx.process(&mut buffer, true);
        let phase = fx.lfo_phase();

        let mut bypass = vec![1.0f32; 500];
        fx.process(&mut bypass, false);

        assert_eq!(fx.lfo_phase(), phase);
    }

    #[test]
    fn test_enabled_gain_follows_envelope() {
        // 1 Hz LFO at 4 Hz sample rate: quarter cycle per sample
        let mut fx = PingPong::new(4, 1.0);
        let out: Vec<f32> = (0..4).map(|_| fx.process_sample(1.0, true)).collect();

        assert_abs_diff_eq!(out[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[2], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(out[3], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_gain_bounded() {
        let mut fx = PingPong::new(48_000, 7.3);
        for _ in 0..48_000 {
            let g = fx.gain();
            assert!((0.0..=1.0).contains(&g));
            fx.process_sample(0.0, true);
        }
    }
}
