//! # Reference Tone Module
//!
//! Turns musical intent (a note, an A4 reference, a volume) into oscillator
//! requests on the shared mixer. The generator itself never touches audio
//! samples.

use crate::audio::AudioEngine;
use crate::error::ConfigError;
use crate::mixer::Mixer;
use crate::notes::{self, Note, PitchClass};
use std::sync::Arc;
use tracing::debug;

/// Default reference tone volume.
pub const DEFAULT_VOLUME: f32 = 0.3;

/// Drives the mixer's oscillator like a tuning fork.
#[derive(Debug)]
pub struct ToneGenerator {
    mixer: Arc<Mixer>,
    a4: f32,
    frequency: f32,
    volume: f32,
    running: bool,
}

impl ToneGenerator {
    /// Creates a stopped generator set to A4 = 440 Hz.
    pub fn new(engine: &AudioEngine) -> Self {
        Self {
            mixer: engine.mixer(),
            a4: notes::DEFAULT_A4,
            frequency: notes::DEFAULT_A4,
            volume: DEFAULT_VOLUME,
            running: false,
        }
    }

    /// Sets the A4 anchor used by subsequent note selections. The current
    /// frequency is left alone.
    pub fn set_reference_pitch(&mut self, a4: f32) -> Result<(), ConfigError> {
        if !(a4.is_finite() && a4 > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "reference pitch",
                value: a4,
            });
        }
        self.a4 = a4;
        Ok(())
    }

    pub fn reference_pitch(&self) -> f32 {
        self.a4
    }

    /// Selects a note by pitch-class name and octave, e.g. `("C#", 4)`.
    ///
    /// An unrecognised name is rejected and nothing changes.
    pub fn set_note(&mut self, name: &str, octave: i32) -> Result<(), ConfigError> {
        let pitch_class = name.parse::<PitchClass>()?;
        self.set_pitch(Note::new(pitch_class, octave));
        Ok(())
    }

    /// Selects a note; `a4 * 2^((midi - 69) / 12)`.
    pub fn set_pitch(&mut self, note: Note) {
        self.frequency = note.frequency(self.a4);
        debug!(%note, frequency = self.frequency, "reference tone note");
        self.refresh();
    }

    /// Selects an explicit frequency in Hz.
    pub fn set_frequency(&mut self, frequency: f32) -> Result<(), ConfigError> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "frequency",
                value: frequency,
            });
        }
        self.frequency = frequency;
        self.refresh();
        Ok(())
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// Sets the volume, clamped to `[0, 1]`.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.refresh();
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Makes the tone audible. Calling it again just re-sends the current
    /// parameters.
    pub fn start(&mut self) {
        self.running = true;
        self.mixer.enable_tone(self.frequency, self.volume);
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.mixer.disable_tone();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn refresh(&self) {
        if self.running {
            self.mixer.enable_tone(self.frequency, self.volume);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;

    fn setup() -> (AudioEngine, ToneGenerator) {
        let engine = AudioEngine::new(StreamConfig::default());
        let tone = ToneGenerator::new(&engine);
        (engine, tone)
    }

    #[test]
    fn starts_silent_at_a440() {
        let (engine, tone) = setup();
        assert!(!tone.is_running());
        assert_eq!(tone.frequency(), 440.0);
        assert_eq!(tone.volume(), DEFAULT_VOLUME);
        assert!(!engine.mixer().oscillator().enabled);
    }

    #[test]
    fn set_note_computes_equal_temperament_frequency() {
        let (_engine, mut tone) = setup();
        tone.set_note("C", 4).unwrap();
        assert!((tone.frequency() - 261.6256).abs() < 1e-2);
        tone.set_note("A", 2).unwrap();
        assert!((tone.frequency() - 110.0).abs() < 1e-3);
    }

    #[test]
    fn unknown_pitch_class_is_rejected_without_change() {
        let (_engine, mut tone) = setup();
        tone.set_note("E", 4).unwrap();
        let before = tone.frequency();
        assert_eq!(
            tone.set_note("X", 4),
            Err(ConfigError::UnknownPitchClass("X".to_owned()))
        );
        assert_eq!(tone.frequency(), before);
    }

    #[test]
    fn reference_pitch_applies_to_later_notes_only() {
        let (_engine, mut tone) = setup();
        tone.set_note("A", 4).unwrap();
        tone.set_reference_pitch(432.0).unwrap();
        assert_eq!(tone.frequency(), 440.0);
        tone.set_note("A", 4).unwrap();
        assert!((tone.frequency() - 432.0).abs() < 1e-3);
        assert!(tone.set_reference_pitch(0.0).is_err());
        assert_eq!(tone.reference_pitch(), 432.0);
    }

    #[test]
    fn changes_while_stopped_stay_silent() {
        let (engine, mut tone) = setup();
        tone.set_volume(0.8);
        tone.set_note("G", 3).unwrap();
        assert!(!engine.mixer().oscillator().enabled);
    }

    #[test]
    fn changes_while_running_reach_the_oscillator() {
        let (engine, mut tone) = setup();
        tone.start();
        tone.start();
        let osc = engine.mixer().oscillator();
        assert!(osc.enabled);
        assert_eq!(osc.frequency, 440.0);

        tone.set_volume(1.7);
        assert_eq!(engine.mixer().oscillator().volume, 1.0);
        tone.set_volume(-0.2);
        assert_eq!(engine.mixer().oscillator().volume, 0.0);

        tone.set_note("A", 5).unwrap();
        assert!((engine.mixer().oscillator().frequency - 880.0).abs() < 1e-2);

        tone.stop();
        assert!(!tone.is_running());
        assert!(!engine.mixer().oscillator().enabled);
    }

    #[test]
    fn explicit_frequency() {
        let (engine, mut tone) = setup();
        tone.start();
        tone.set_frequency(123.4).unwrap();
        assert_eq!(engine.mixer().oscillator().frequency, 123.4);
        assert!(tone.set_frequency(-1.0).is_err());
        assert_eq!(tone.frequency(), 123.4);
    }
}
