//! ParameterStore - lock-free holder for real-time tunable scalars
//!
//! Each field is an independent atomic. Writers publish with `Release`,
//! the render callback reads with `Acquire`, so a write that completes
//! before a callback starts is visible to that callback. There is no
//! cross-field snapshot transaction: a snapshot may combine a new frequency
//! with an old volume, which the render path tolerates.
//!
//! Floats are stored as their IEEE-754 bit patterns in `AtomicU32`, so a
//! read always returns a value some writer actually stored, never a torn
//! mix of two writes.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;

/// Lowest tone frequency in Hz
pub const MIN_FREQUENCY_HZ: f32 = 20.0;
/// Highest tone frequency in Hz
pub const MAX_FREQUENCY_HZ: f32 = 20_000.0;
/// Lowest tone volume
pub const MIN_VOLUME: f32 = 0.0;
/// Highest tone volume
pub const MAX_VOLUME: f32 = 1.0;

/// `f32` published through an `AtomicU32`.
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Result of publishing a continuous parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clamped {
    pub requested: f32,
    pub applied: f32,
}

impl Clamped {
    pub fn was_clamped(&self) -> bool {
        self.requested != self.applied
    }
}

/// Values read once at the start of each render buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSnapshot {
    pub frequency_hz: f32,
    pub volume: f32,
    pub playing: bool,
    pub effect_enabled: bool,
}

/// Tone generator state as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneParameters {
    pub frequency_hz: f32,
    pub volume: f32,
    pub playing: bool,
}

/// Microphone effect state as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectState {
    pub enabled: bool,
}

/// Defaults restored on every fresh open.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamDefaults {
    pub frequency_hz: f32,
    pub volume: f32,
    pub effect_enabled: bool,
}

impl Default for ParamDefaults {
    fn default() -> Self {
        Self {
            frequency_hz: 440.0,
            volume: 0.5,
            effect_enabled: true,
        }
    }
}

impl From<&AppConfig> for ParamDefaults {
    fn from(config: &AppConfig) -> Self {
        Self {
            frequency_hz: clamp_frequency(config.tone.default_frequency_hz),
            volume: clamp_volume(config.tone.default_volume),
            effect_enabled: config.effect.enabled_by_default,
        }
    }
}

/// Lock-free parameter store shared between control and render contexts.
#[derive(Debug)]
pub struct ParameterStore {
    frequency_hz: AtomicF32,
    volume: AtomicF32,
    playing: AtomicBool,
    effect_enabled: AtomicBool,
    defaults: ParamDefaults,
}

impl ParameterStore {
    pub fn new(defaults: ParamDefaults) -> Self {
        Self {
            frequency_hz: AtomicF32::new(defaults.frequency_hz),
            volume: AtomicF32::new(defaults.volume),
            playing: AtomicBool::new(false),
            effect_enabled: AtomicBool::new(defaults.effect_enabled),
            defaults,
        }
    }

    /// Restore defaults (tone stopped).
    pub fn reset(&self) {
        self.playing.store(false, Ordering::Release);
        self.frequency_hz.store(self.defaults.frequency_hz);
        self.volume.store(self.defaults.volume);
        self.effect_enabled
            .store(self.defaults.effect_enabled, Ordering::Release);
    }

    /// Publish a tone frequency, clamped to [20, 20000] Hz.
    ///
    /// NaN is not clampable; the previous value is kept and `None` returned.
    pub fn set_frequency(&self, hz: f32) -> Option<Clamped> {
        if hz.is_nan() {
            return None;
        }
        let applied = clamp_frequency(hz);
        self.frequency_hz.store(applied);
        Some(Clamped {
            requested: hz,
            applied,
        })
    }

    /// Publish a tone volume, clamped to [0, 1].
    pub fn set_volume(&self, volume: f32) -> Option<Clamped> {
        if volume.is_nan() {
            return None;
        }
        let applied = clamp_volume(volume);
        self.volume.store(applied);
        Some(Clamped {
            requested: volume,
            applied,
        })
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    pub fn set_effect_enabled(&self, enabled: bool) {
        self.effect_enabled.store(enabled, Ordering::Release);
    }

    pub fn frequency(&self) -> f32 {
        self.frequency_hz.load()
    }

    pub fn volume(&self) -> f32 {
        self.volume.load()
    }

    pub fn playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn effect_enabled(&self) -> bool {
        self.effect_enabled.load(Ordering::Acquire)
    }

    /// Per-field atomic reads; no cross-field consistency.
    #[inline]
    pub fn snapshot(&self) -> ParamSnapshot {
        ParamSnapshot {
            frequency_hz: self.frequency(),
            volume: self.volume(),
            playing: self.playing(),
            effect_enabled: self.effect_enabled(),
        }
    }

    pub fn tone(&self) -> ToneParameters {
        ToneParameters {
            frequency_hz: self.frequency(),
            volume: self.volume(),
            playing: self.playing(),
        }
    }

    pub fn effect(&self) -> EffectState {
        EffectState {
            enabled: self.effect_enabled(),
        }
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new(ParamDefaults::default())
    }
}

#[inline]
pub fn clamp_frequency(hz: f32) -> f32 {
    hz.clamp(MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ)
}

#[inline]
pub fn clamp_volume(volume: f32) -> f32 {
    volume.clamp(MIN_VOLUME, MAX_VOLUME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_defaults() {
        let store = ParameterStore::default();
        let snap = store.snapshot();
        assert_eq!(snap.frequency_hz, 440.0);
        assert_eq!(snap.volume, 0.5);
        assert!(!snap.playing);
        assert!(snap.effect_enabled);
    }

    #[test]
    fn test_frequency_clamps_to_bounds() {
        let store = ParameterStore::default();

        let low = store.set_frequency(1.0).unwrap();
        assert_eq!(low.applied, MIN_FREQUENCY_HZ);
        assert!(low.was_clamped());

        let high = store.set_frequency(96_000.0).unwrap();
        assert_eq!(high.applied, MAX_FREQUENCY_HZ);
        assert_eq!(store.frequency(), MAX_FREQUENCY_HZ);

        let inf = store.set_frequency(f32::NEG_INFINITY).unwrap();
        assert_eq!(inf.applied, MIN_FREQUENCY_HZ);
    }

    #[test]
    fn test_volume_clamps_to_bounds() {
        let store = ParameterStore::default();
        assert_eq!(store.set_volume(-3.0).unwrap().applied, 0.0);
        assert_eq!(store.set_volume(1.5).unwrap().applied, 1.0);

        let exact = store.set_volume(0.25).unwrap();
        assert!(!exact.was_clamped());
        assert_eq!(store.volume(), 0.25);
    }

    #[test]
    fn test_nan_keeps_previous_value() {
        let store = ParameterStore::default();
        store.set_frequency(1000.0);
        assert!(store.set_frequency(f32::NAN).is_none());
        assert_eq!(store.frequency(), 1000.0);
        assert!(store.set_volume(f32::NAN).is_none());
        assert_eq!(store.volume(), 0.5);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let store = ParameterStore::new(ParamDefaults {
            frequency_hz: 880.0,
            volume: 0.2,
            effect_enabled: false,
        });
        store.set_frequency(100.0);
        store.set_volume(1.0);
        store.set_playing(true);
        store.set_effect_enabled(true);

        store.reset();

        assert_eq!(
            store.tone(),
            ToneParameters {
                frequency_hz: 880.0,
                volume: 0.2,
                playing: false
            }
        );
        assert!(!store.effect().enabled);
    }

    #[test]
    fn test_concurrent_writers_never_tear() {
        let store = Arc::new(ParameterStore::default());
        let written: Vec<f32> = (0..8).map(|i| 100.0 + i as f32 * 1111.5).collect();

        let writers: Vec<_> = written
            .iter()
            .copied()
            .map(|value| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        store.set_frequency(value);
                    }
                })
            })
            .collect();

        let reader = {
            let store = Arc::clone(&store);
            let written = written.clone();
            thread::spawn(move || {
                for _ in 0..50_000 {
                    let seen = store.frequency();
                    assert!(
                        seen == 440.0 || written.contains(&seen),
                        "torn or foreign value {}",
                        seen
                    );
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();

        assert!(written.contains(&store.frequency()));
    }
}
