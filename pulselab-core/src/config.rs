//! # Configuration Module
//!
//! Plain configuration types shared by the engines and the front-end:
//! - [`StreamConfig`]: the stream shape negotiated once at open time
//! - [`TunerConfig`]: tunable parameters of the YIN detector
//! - [`Settings`]: the user-facing values a front-end persists
//! - [`AtomicF32`]: a lock-free `f32` cell for values read on audio threads
//!
//! Nothing here touches the filesystem.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Default sample rate in Hz (CD quality).
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Default number of frames exchanged with the driver per callback.
///
/// 2048 samples is ~46 ms at 44.1 kHz, which also matches the default
/// analysis window of the pitch detector.
pub const DEFAULT_BLOCK_SIZE: usize = 2048;

/// Shape of the input and output streams.
///
/// Immutable once a stream is open. Both directions are mono, 32-bit float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Frames per callback.
    pub block_size: usize,
    /// Channel count, always 1.
    pub channels: u16,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            channels: 1,
        }
    }
}

impl StreamConfig {
    /// Creates a mono stream config, rejecting zero rates and block sizes.
    pub fn new(sample_rate: u32, block_size: usize) -> Result<Self, ConfigError> {
        if sample_rate == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "sample rate",
                value: 0.0,
            });
        }
        if block_size == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "block size",
                value: 0.0,
            });
        }
        Ok(Self {
            sample_rate,
            block_size,
            channels: 1,
        })
    }
}

impl From<StreamConfig> for cpal::StreamConfig {
    fn from(config: StreamConfig) -> Self {
        cpal::StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(config.block_size as u32),
        }
    }
}

/// Parameters of the YIN pitch detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TunerConfig {
    /// Number of samples analysed per detection.
    pub buffer_size: usize,
    /// Lowest detectable frequency in Hz. Sets the largest lag searched.
    pub fmin: f32,
    /// Highest detectable frequency in Hz. Sets the smallest lag searched.
    pub fmax: f32,
    /// Absolute threshold on the normalized difference function.
    pub threshold: f32,
    /// Blocks whose RMS is below this are treated as silence.
    pub silence_rms: f32,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 2048,
            fmin: 70.0,
            fmax: 1000.0,
            threshold: 0.1,
            silence_rms: 0.01,
        }
    }
}

impl TunerConfig {
    /// Checks the parameters against a sample rate.
    ///
    /// The analysis window must be longer than the largest lag
    /// (`sample_rate / fmin`), otherwise the difference function is empty.
    pub fn validate(&self, sample_rate: u32) -> Result<(), ConfigError> {
        if !(self.fmin.is_finite() && self.fmin > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "fmin",
                value: self.fmin,
            });
        }
        if !(self.fmax.is_finite() && self.fmax > self.fmin) {
            return Err(ConfigError::InvalidParameter {
                name: "fmax",
                value: self.fmax,
            });
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(ConfigError::InvalidParameter {
                name: "threshold",
                value: self.threshold,
            });
        }
        let max_tau = (sample_rate as f32 / self.fmin) as usize;
        if self.buffer_size <= max_tau {
            return Err(ConfigError::InvalidParameter {
                name: "buffer size",
                value: self.buffer_size as f32,
            });
        }
        Ok(())
    }
}

/// User-facing values that outlive a session.
///
/// The core exposes getters and setters for each of these on the engines;
/// loading and saving them is left to the front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Reference pitch for A4 in Hz.
    pub a4: f32,
    /// Reference tone volume, 0.0 to 1.0.
    pub tone_volume: f32,
    /// Metronome tempo.
    pub bpm: f32,
    pub beats_per_bar: u32,
    pub note_value: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            a4: 440.0,
            tone_volume: 0.3,
            bpm: 120.0,
            beats_per_bar: 4,
            note_value: 4,
        }
    }
}

/// Thread-safe f32 parameter using atomic operations.
///
/// Stored as the raw bits in an `AtomicU32` so it can be read from an audio
/// callback without locking.
#[derive(Debug, Clone)]
pub struct AtomicF32 {
    inner: Arc<AtomicU32>,
}

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self {
            inner: Arc::new(AtomicU32::new(value.to_bits())),
        }
    }

    pub fn set(&self, value: f32) {
        self.inner.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.inner.load(Ordering::Relaxed))
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tuner_config_is_valid_at_common_rates() {
        let config = TunerConfig::default();
        assert!(config.validate(44_100).is_ok());
        assert!(config.validate(48_000).is_ok());
    }

    #[test]
    fn tuner_config_rejects_window_shorter_than_largest_lag() {
        let config = TunerConfig {
            buffer_size: 512,
            ..TunerConfig::default()
        };
        // 44100 / 70 = 630 > 512
        assert!(matches!(
            config.validate(44_100),
            Err(ConfigError::InvalidParameter { name: "buffer size", .. })
        ));
    }

    #[test]
    fn tuner_config_rejects_inverted_range() {
        let config = TunerConfig {
            fmin: 500.0,
            fmax: 400.0,
            ..TunerConfig::default()
        };
        assert!(config.validate(44_100).is_err());
    }

    #[test]
    fn stream_config_rejects_zero_values() {
        assert!(StreamConfig::new(0, 512).is_err());
        assert!(StreamConfig::new(48_000, 0).is_err());
        let config = StreamConfig::new(48_000, 256).unwrap();
        assert_eq!(config.channels, 1);
    }

    #[test]
    fn stream_config_maps_to_fixed_cpal_buffer() {
        let config: cpal::StreamConfig = StreamConfig::default().into();
        assert_eq!(config.channels, 1);
        assert_eq!(config.sample_rate, cpal::SampleRate(44_100));
        assert_eq!(config.buffer_size, cpal::BufferSize::Fixed(2048));
    }

    #[test]
    fn settings_fill_missing_fields_with_defaults() {
        let settings: Settings = serde_json::from_str(r#"{ "bpm": 90.0 }"#).unwrap();
        assert_eq!(settings.bpm, 90.0);
        assert_eq!(settings.a4, 440.0);
        assert_eq!(settings.beats_per_bar, 4);
    }

    #[test]
    fn atomic_f32_shares_value_between_clones() {
        let a = AtomicF32::new(440.0);
        let b = a.clone();
        b.set(442.0);
        assert_eq!(a.get(), 442.0);
    }
}
