//! Command line parsing.

use anyhow::{Context, Result, anyhow, bail};
use pulselab_core::{Note, PitchClass, Settings, TimeSignature};

pub const USAGE: &str = "\
Usage: pulselab [--a4 HZ] [--volume 0..1] <MODE>

Modes:
  tune                                  Listen on the microphone and show the nearest note
  fork [NOTE | PITCH OCTAVE]            Play a reference tone, e.g. `fork A4` or `fork C# 3`
  metronome [BPM] [BEATS/NOTE]          Run the metronome, e.g. `metronome 90 3/4`
            [--ramp START END SECONDS]  Ramp the tempo linearly over SECONDS

Press Enter to stop. In metronome mode an empty line taps the tempo and `q` quits.";

/// Tempo ramp requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ramp {
    pub start_bpm: f32,
    pub end_bpm: f32,
    pub seconds: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Help,
    Tune,
    Fork {
        note: Option<Note>,
    },
    Metronome {
        bpm: Option<f32>,
        signature: Option<TimeSignature>,
        ramp: Option<Ramp>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    pub mode: Mode,
    pub a4: Option<f32>,
    pub volume: Option<f32>,
}

impl Args {
    /// Folds command line overrides into the persisted settings.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(a4) = self.a4 {
            settings.a4 = a4;
        }
        if let Some(volume) = self.volume {
            settings.tone_volume = volume.clamp(0.0, 1.0);
        }
        if let Mode::Metronome { bpm, signature, .. } = &self.mode {
            if let Some(bpm) = bpm {
                settings.bpm = *bpm;
            }
            if let Some(signature) = signature {
                settings.beats_per_bar = signature.beats_per_bar;
                settings.note_value = signature.note_value;
            }
        }
    }
}

fn number(value: Option<String>, name: &str) -> Result<f32> {
    let value = value.ok_or_else(|| anyhow!("{name} expects a value"))?;
    value
        .parse::<f32>()
        .with_context(|| format!("invalid {name} `{value}`"))
}

/// Parses the arguments after the program name.
pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Args> {
    let mut args = args.into_iter();
    let mut positionals = Vec::new();
    let mut a4 = None;
    let mut volume = None;
    let mut ramp = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                return Ok(Args {
                    mode: Mode::Help,
                    a4,
                    volume,
                });
            }
            "--a4" => a4 = Some(number(args.next(), "--a4")?),
            "--volume" => volume = Some(number(args.next(), "--volume")?),
            "--ramp" => {
                ramp = Some(Ramp {
                    start_bpm: number(args.next(), "--ramp START")?,
                    end_bpm: number(args.next(), "--ramp END")?,
                    seconds: number(args.next(), "--ramp SECONDS")?,
                });
            }
            flag if flag.starts_with("--") => bail!("unknown option `{flag}`"),
            _ => positionals.push(arg),
        }
    }

    let mut positionals = positionals.into_iter();
    let mode = match positionals.next().as_deref() {
        None | Some("help") => Mode::Help,
        Some("tune") => Mode::Tune,
        Some("fork") => {
            let note = match (positionals.next(), positionals.next()) {
                (None, _) => None,
                (Some(note), None) => Some(note.parse::<Note>()?),
                (Some(pitch), Some(octave)) => {
                    let octave = octave
                        .parse::<i32>()
                        .with_context(|| format!("invalid octave `{octave}`"))?;
                    Some(Note::new(pitch.parse::<PitchClass>()?, octave))
                }
            };
            Mode::Fork { note }
        }
        Some("metronome") => {
            let bpm = positionals
                .next()
                .map(|bpm| number(Some(bpm), "BPM"))
                .transpose()?;
            let signature = positionals
                .next()
                .map(|s| s.parse::<TimeSignature>())
                .transpose()?;
            Mode::Metronome {
                bpm,
                signature,
                ramp,
            }
        }
        Some(other) => bail!("unknown mode `{other}`"),
    };
    if let Some(extra) = positionals.next() {
        bail!("unexpected argument `{extra}`");
    }
    if ramp.is_some() && !matches!(mode, Mode::Metronome { .. }) {
        bail!("--ramp only applies to the metronome");
    }

    Ok(Args { mode, a4, volume })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Result<Args> {
        parse(line.split_whitespace().map(str::to_owned))
    }

    #[test]
    fn no_arguments_shows_help() {
        assert_eq!(args("").unwrap().mode, Mode::Help);
    }

    #[test]
    fn fork_accepts_full_or_split_note_names() {
        let expected = Mode::Fork {
            note: Some(Note::new(PitchClass::CSharp, 3)),
        };
        assert_eq!(args("fork C#3").unwrap().mode, expected);
        assert_eq!(args("fork C# 3").unwrap().mode, expected);
        assert_eq!(args("fork").unwrap().mode, Mode::Fork { note: None });
        assert!(args("fork H4").is_err());
    }

    #[test]
    fn metronome_with_ramp_and_overrides() {
        let parsed = args("--a4 442 metronome 90 3/4 --ramp 60 120 300 --volume 0.5").unwrap();
        assert_eq!(parsed.a4, Some(442.0));
        assert_eq!(parsed.volume, Some(0.5));
        assert_eq!(
            parsed.mode,
            Mode::Metronome {
                bpm: Some(90.0),
                signature: Some(TimeSignature::new(3, 4)),
                ramp: Some(Ramp {
                    start_bpm: 60.0,
                    end_bpm: 120.0,
                    seconds: 300.0,
                }),
            }
        );
    }

    #[test]
    fn overrides_fold_into_settings() {
        let mut settings = Settings::default();
        args("--volume 3 metronome 72 6/8")
            .unwrap()
            .apply(&mut settings);
        assert_eq!(settings.tone_volume, 1.0);
        assert_eq!(settings.bpm, 72.0);
        assert_eq!((settings.beats_per_bar, settings.note_value), (6, 8));
        assert_eq!(settings.a4, 440.0);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(args("dance").is_err());
        assert!(args("tune extra").is_err());
        assert!(args("tune --ramp 1 2 3").is_err());
        assert!(args("--a4").is_err());
        assert!(args("--a4 abc tune").is_err());
        assert!(args("--verbose tune").is_err());
        assert!(args("metronome 90 4-4").is_err());
    }
}
