//! Configuration management for the tone engine
//!
//! Runtime configuration is loaded from a JSON file at controller
//! construction, falling back to compiled-in defaults. Nothing here is read
//! by the render callback; values are copied into the engine when a stream
//! is opened.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub tone: ToneConfig,
    #[serde(default)]
    pub effect: EffectConfig,
}

/// Device stream configuration requested at open time
///
/// The device may adjust these; `DeviceInfo` always reports what was
/// actually negotiated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Preferred sample rate in Hz
    pub preferred_sample_rate: u32,
    /// Preferred callback size in frames
    pub preferred_buffer_frames: u32,
    /// Preferred number of output channels
    pub output_channels: u16,
    /// Open a microphone stream alongside the output stream
    pub capture_input: bool,
    /// Capacity of the input-to-output sample ring, in frames
    pub input_ring_frames: usize,
    /// Largest callback the render path pre-allocates scratch space for
    pub max_callback_frames: usize,
    /// How long start() waits for the first render callback
    pub first_callback_wait_ms: u64,
    /// Upper bound on waiting for in-flight callbacks during close
    pub drain_timeout_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            preferred_sample_rate: 48_000,
            preferred_buffer_frames: 256,
            output_channels: 2,
            capture_input: true,
            input_ring_frames: 8192,
            max_callback_frames: 4096,
            first_callback_wait_ms: 500,
            drain_timeout_ms: 2000,
        }
    }
}

/// Tone generator defaults applied on every fresh open
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    pub default_frequency_hz: f32,
    pub default_volume: f32,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            default_frequency_hz: 440.0,
            default_volume: 0.5,
        }
    }
}

/// Ping-pong effect configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    /// Effect state applied on every fresh open
    pub enabled_by_default: bool,
    /// Modulation rate in Hz
    pub lfo_rate_hz: f32,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            enabled_by_default: true,
            lfo_rate_hz: 2.0,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// Missing files and malformed JSON are not errors: the defaults are
    /// returned and a warning is logged.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Configuration for Android builds
    ///
    /// Asset loading goes through the AssetManager, which this crate does
    /// not touch, so the defaults are used.
    #[cfg(target_os = "android")]
    pub fn load_android() -> Self {
        log::info!("[Config] Using default configuration on Android");
        Self::default()
    }

    /// Load configuration for non-Android platforms
    #[cfg(not(target_os = "android"))]
    pub fn load() -> Self {
        Self::load_from_file("assets/engine_config.json")
    }

    /// Platform-appropriate configuration
    pub fn load_platform() -> Self {
        #[cfg(target_os = "android")]
        {
            Self::load_android()
        }

        #[cfg(not(target_os = "android"))]
        {
            Self::load()
        }
    }
}
