//! Sine oscillator with a wrapped phase accumulator.
//!
//! The phase lives on the render thread. Output depends only on
//! `(phase, frequency, sample_rate)`, so two oscillators fed the same
//! inputs produce bit-identical sample sequences.

use std::f64::consts::TAU;

/// Phase-accumulating sine oscillator.
#[derive(Debug, Clone)]
pub struct SineOscillator {
    phase: f64,
    sample_rate: f64,
}

impl SineOscillator {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_phase(sample_rate, 0.0)
    }

    /// Start from an arbitrary phase (wrapped into [0, 1)).
    pub fn with_phase(sample_rate: u32, phase: f64) -> Self {
        Self {
            phase: wrap_unit(phase),
            sample_rate: f64::from(sample_rate.max(1)),
        }
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    /// Change the rate without touching the phase.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = f64::from(sample_rate.max(1));
    }

    /// Produce one sample and advance the phase by `frequency / sample_rate`.
    #[inline]
    pub fn next_sample(&mut self, frequency: f32) -> f32 {
        let sample = (TAU * self.phase).sin() as f32;
        self.phase = wrap_unit(self.phase + f64::from(frequency) / self.sample_rate);
        sample
    }

    /// Fill `out` with consecutive samples at a fixed frequency.
    pub fn fill(&mut self, out: &mut [f32], frequency: f32) {
        for sample in out.iter_mut() {
            *sample = self.next_sample(frequency);
        }
    }
}

/// Wrap a phase value into [0, 1).
#[inline]
pub(crate) fn wrap_unit(phase: f64) -> f64 {
    let wrapped = phase - phase.floor();
    // floor() of values just below an integer can round back up to 1.0
    if wrapped >= 1.0 {
        0.0
    } else {
        wrapped
    }
}
