// pulselab-core/src/lib.rs

//! The core logic for the PulseLab tuner and metronome.
//! This crate is responsible for the real-time audio path: stream handling,
//! mixing, pitch detection, reference tones and beat scheduling. It is
//! completely headless and contains no UI code; a front-end feeds it control
//! calls and consumes the [`events::Event`] stream it produces.

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod metronome;
pub mod mixer;
pub mod notes;
pub mod pitch;
pub mod tone;

pub use audio::{AudioEngine, Diagnostics, InputConsumer};
pub use config::{AtomicF32, Settings, StreamConfig, TunerConfig};
pub use error::{AudioError, ConfigError};
pub use events::{Event, EventSender};
pub use metronome::{MetronomeEngine, TapTempo, TimeSignature};
pub use notes::{Note, NoteMapping, PitchClass};
pub use pitch::{TunerEngine, TunerSession};
pub use tone::ToneGenerator;
