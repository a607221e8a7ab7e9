//! # Musical Note Module
//!
//! Equal-temperament conversions between frequency, MIDI number, note name
//! and cents. Every function here is pure; the A4 reference is always passed
//! in explicitly.
//!
//! ## Features
//! - Fixed 12-variant [`PitchClass`] instead of string lookups
//! - Frequency ↔ MIDI ↔ note name conversions
//! - Cent deviation measurements
//! - Nearest-note mapping for the tuner display

use crate::error::ConfigError;
use std::fmt;
use std::str::FromStr;

/// The reference A4 frequency used when none is configured.
pub const DEFAULT_A4: f32 = 440.0;

/// MIDI number of A4.
const A4_MIDI: i32 = 69;

/// One of the twelve pitch classes, in chromatic order starting at C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    /// All pitch classes in chromatic order.
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Semitones above C (0-11).
    pub fn index(self) -> i32 {
        self as i32
    }

    /// Pitch class of a semitone index; wraps modulo 12.
    pub fn from_index(index: i32) -> Self {
        Self::ALL[index.rem_euclid(12) as usize]
    }

    /// Canonical sharp spelling, e.g. `"C#"`.
    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
        }
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PitchClass {
    type Err = ConfigError;

    /// Parses a sharp or flat spelling (`"C#"`, `"Db"`), case-insensitive
    /// on the letter. Anything else is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ConfigError::UnknownPitchClass(s.to_owned());
        let mut chars = s.trim().chars();
        let letter = chars.next().ok_or_else(unknown)?;
        let natural = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(unknown()),
        };
        let accidental = match chars.as_str() {
            "" => 0,
            "#" | "♯" => 1,
            "b" | "♭" => -1,
            _ => return Err(unknown()),
        };
        Ok(Self::from_index(natural + accidental))
    }
}

/// A pitch class in a specific octave (scientific pitch notation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Note {
    pub pitch_class: PitchClass,
    pub octave: i32,
}

impl Note {
    pub fn new(pitch_class: PitchClass, octave: i32) -> Self {
        Self {
            pitch_class,
            octave,
        }
    }

    /// `(octave + 1) * 12 + pitch class index`, so C4 is 60 and A4 is 69.
    pub fn midi_number(self) -> i32 {
        (self.octave + 1) * 12 + self.pitch_class.index()
    }

    /// Inverse of [`Note::midi_number`].
    pub fn from_midi(midi: i32) -> Self {
        Self {
            pitch_class: PitchClass::from_index(midi),
            octave: midi.div_euclid(12) - 1,
        }
    }

    /// Equal-temperament frequency of this note for the given A4.
    pub fn frequency(self, a4: f32) -> f32 {
        midi_to_frequency(self.midi_number() as f32, a4)
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.pitch_class, self.octave)
    }
}

impl FromStr for Note {
    type Err = ConfigError;

    /// Parses names like `"A4"`, `"C#3"`, `"Bb-1"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| c.is_ascii_digit() || c == '-')
            .ok_or_else(|| ConfigError::InvalidNoteName(s.to_owned()))?;
        let (class, octave) = s.split_at(split);
        let pitch_class = class.parse::<PitchClass>()?;
        let octave = octave
            .parse::<i32>()
            .map_err(|_| ConfigError::InvalidNoteName(s.to_owned()))?;
        Ok(Self::new(pitch_class, octave))
    }
}

/// The nearest equal-tempered note to a measured frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteMapping {
    /// Nearest note.
    pub note: Note,
    /// Exact frequency of `note` for the A4 in use.
    pub reference_frequency: f32,
    /// Signed deviation of the measured frequency from `reference_frequency`.
    /// Within ±50 for anything that rounds to `note`, but not clamped.
    pub cents: f32,
}

/// Converts a frequency to a fractional MIDI number.
///
/// Returns `None` for non-positive or non-finite frequencies.
pub fn frequency_to_midi(frequency: f32, a4: f32) -> Option<f32> {
    if !(frequency.is_finite() && frequency > 0.0) {
        return None;
    }
    Some(A4_MIDI as f32 + 12.0 * (frequency / a4).log2())
}

/// Converts a (possibly fractional) MIDI number to a frequency.
pub fn midi_to_frequency(midi: f32, a4: f32) -> f32 {
    a4 * 2.0_f32.powf((midi - A4_MIDI as f32) / 12.0)
}

/// Names the nearest integer MIDI number, e.g. `69.2` → `"A4"`.
pub fn midi_to_note_name(midi: f32) -> String {
    Note::from_midi(midi.round() as i32).to_string()
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
pub fn cents_difference(frequency: f32, reference: f32) -> f32 {
    1200.0 * (frequency / reference).log2()
}

/// Maps a measured frequency onto the nearest note for the given A4.
///
/// The frequency is rounded to the nearest MIDI integer, that note's exact
/// frequency is derived, and the signed cent deviation of the input from it
/// is reported.
///
/// # Returns
/// * `Some(mapping)` - Nearest note, its reference frequency and the offset
/// * `None` - The frequency was non-positive or not finite
pub fn frequency_to_note(frequency: f32, a4: f32) -> Option<NoteMapping> {
    let midi = frequency_to_midi(frequency, a4)?;
    let nearest = midi.round() as i32;
    let reference_frequency = midi_to_frequency(nearest as f32, a4);
    Some(NoteMapping {
        note: Note::from_midi(nearest),
        reference_frequency,
        cents: cents_difference(frequency, reference_frequency),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn a440_maps_to_a4_with_zero_cents() {
        let mapping = frequency_to_note(440.0, 440.0).unwrap();
        assert_eq!(mapping.note.pitch_class, PitchClass::A);
        assert_eq!(mapping.note.octave, 4);
        assert_eq!(mapping.note.to_string(), "A4");
        assert!((mapping.reference_frequency - 440.0).abs() < 1e-3);
        assert!(mapping.cents.abs() < 1e-3);
    }

    #[test]
    fn slightly_flat_b_flat_maps_to_a_sharp() {
        let mapping = frequency_to_note(466.0, 440.0).unwrap();
        assert_eq!(mapping.note.pitch_class, PitchClass::ASharp);
        assert_eq!(mapping.note.octave, 4);
        let expected = 1200.0 * (466.0_f32 / mapping.reference_frequency).log2();
        assert!((mapping.cents - expected).abs() < 1e-3);
        assert!(mapping.cents < 0.0 && mapping.cents > -1.0);
    }

    #[test]
    fn reference_pitch_shifts_the_mapping() {
        let mapping = frequency_to_note(442.0, 442.0).unwrap();
        assert_eq!(mapping.note.to_string(), "A4");
        assert!(mapping.cents.abs() < 1e-3);
        let against_440 = frequency_to_note(442.0, 440.0).unwrap();
        assert!((against_440.cents - 7.85).abs() < 0.05);
    }

    #[test]
    fn non_positive_frequency_has_no_note() {
        assert!(frequency_to_note(0.0, 440.0).is_none());
        assert!(frequency_to_note(-10.0, 440.0).is_none());
        assert!(frequency_to_note(f32::NAN, 440.0).is_none());
        assert!(frequency_to_midi(0.0, 440.0).is_none());
    }

    #[test]
    fn midi_numbers_follow_scientific_pitch_notation() {
        assert_eq!(Note::new(PitchClass::C, 4).midi_number(), 60);
        assert_eq!(Note::new(PitchClass::A, 4).midi_number(), 69);
        assert_eq!(Note::new(PitchClass::C, -1).midi_number(), 0);
        assert_eq!(Note::from_midi(0).to_string(), "C-1");
        assert_eq!(Note::from_midi(61).to_string(), "C#4");
        assert_eq!(midi_to_note_name(68.7), "A4");
    }

    #[test]
    fn note_frequencies_match_equal_temperament() {
        assert!((Note::new(PitchClass::C, 4).frequency(440.0) - 261.6256).abs() < 1e-2);
        assert!((Note::new(PitchClass::A, 3).frequency(440.0) - 220.0).abs() < 1e-3);
        assert!((midi_to_frequency(81.0, 440.0) - 880.0).abs() < 1e-2);
    }

    #[test]
    fn pitch_class_parsing_accepts_sharps_and_flats() {
        assert_eq!("C#".parse::<PitchClass>(), Ok(PitchClass::CSharp));
        assert_eq!("Db".parse::<PitchClass>(), Ok(PitchClass::CSharp));
        assert_eq!("a".parse::<PitchClass>(), Ok(PitchClass::A));
        assert_eq!("Cb".parse::<PitchClass>(), Ok(PitchClass::B));
        assert_eq!(
            "H".parse::<PitchClass>(),
            Err(ConfigError::UnknownPitchClass("H".to_owned()))
        );
        assert!("C##".parse::<PitchClass>().is_err());
        assert!("".parse::<PitchClass>().is_err());
    }

    #[test]
    fn note_parsing() {
        assert_eq!("A4".parse::<Note>(), Ok(Note::new(PitchClass::A, 4)));
        assert_eq!("F#2".parse::<Note>(), Ok(Note::new(PitchClass::FSharp, 2)));
        assert_eq!("C-1".parse::<Note>(), Ok(Note::new(PitchClass::C, -1)));
        assert!(matches!(
            "A".parse::<Note>(),
            Err(ConfigError::InvalidNoteName(_))
        ));
        assert!(matches!(
            "X4".parse::<Note>(),
            Err(ConfigError::UnknownPitchClass(_))
        ));
    }

    proptest! {
        #[test]
        fn nearest_note_is_within_half_a_semitone(freq in 20.0f32..5000.0, a4 in 415.0f32..466.0) {
            let mapping = frequency_to_note(freq, a4).unwrap();
            prop_assert!(mapping.cents.abs() <= 50.01);
        }

        #[test]
        fn midi_round_trips_through_note(midi in 0i32..128) {
            prop_assert_eq!(Note::from_midi(midi).midi_number(), midi);
        }
    }
}
