//! # Error Types
//!
//! Two error families cross the public API:
//! - [`AudioError`] for anything the audio device or driver refuses.
//!   These are never fatal; the engine stays usable in a closed state.
//! - [`ConfigError`] for invalid musical or numeric parameters. These are
//!   raised before any state is mutated.
//!
//! "No pitch" and "no note" are ordinary `None` results, not errors.

use thiserror::Error;

/// Failure to open or run an audio stream.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no {0} device available")]
    NoDevice(&'static str),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("device does not support mono f32 at {sample_rate} Hz")]
    UnsupportedConfig { sample_rate: u32 },

    #[error("failed to build {direction} stream: {source}")]
    Build {
        direction: &'static str,
        #[source]
        source: cpal::BuildStreamError,
    },

    #[error("failed to start {direction} stream: {source}")]
    Play {
        direction: &'static str,
        #[source]
        source: cpal::PlayStreamError,
    },
}

impl From<cpal::DeviceNameError> for AudioError {
    fn from(err: cpal::DeviceNameError) -> Self {
        Self::Device(err.to_string())
    }
}

impl From<cpal::SupportedStreamConfigsError> for AudioError {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        Self::Device(err.to_string())
    }
}

/// An invalid parameter passed through the control surface.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unknown pitch class `{0}`")]
    UnknownPitchClass(String),

    #[error("invalid note name `{0}`, expected e.g. `A4` or `C#3`")]
    InvalidNoteName(String),

    #[error("invalid time signature `{0}`, expected e.g. `4/4`")]
    InvalidTimeSignature(String),

    #[error("invalid {name}: {value}")]
    InvalidParameter { name: &'static str, value: f32 },
}
