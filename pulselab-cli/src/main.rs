//! # PulseLab - Terminal Tuner and Metronome
//!
//! Headless front-end over `pulselab-core`.
//!
//! ## Architecture
//! - **Main Thread**: parses arguments, owns the engines and renders events
//! - **Audio Threads**: cpal callbacks owned by the [`AudioEngine`]
//! - **Stdin Thread**: forwards typed lines so the main loop can `select!`
//!   over user input and engine events at once

mod cli;
mod logging;
mod settings;

use anyhow::{Context, Result};
use cli::{Args, Mode};
use crossbeam_channel::{Receiver, select};
use pulselab_core::{
    AtomicF32, AudioEngine, Event, MetronomeEngine, Note, PitchClass, Settings, StreamConfig,
    TapTempo, ToneGenerator, TunerConfig, TunerEngine, TunerSession, events,
};
use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Instant;
use tracing::{info, warn};

fn main() -> Result<()> {
    logging::init();

    let args = cli::parse(std::env::args().skip(1))?;
    if args.mode == Mode::Help {
        println!("{}", cli::USAGE);
        return Ok(());
    }

    let mut file = settings::SettingsFile::open(settings::default_path()?);
    let writable = file.is_writable();
    let settings = &mut file.settings;
    args.apply(settings);
    info!(
        a4 = settings.a4,
        volume = settings.tone_volume,
        bpm = settings.bpm,
        writable,
        "settings loaded"
    );

    let mut engine = AudioEngine::new(StreamConfig::default());
    let lines = spawn_stdin_reader();

    let result = match &args.mode {
        Mode::Tune => run_tuner(&mut engine, settings, &lines),
        Mode::Fork { note } => run_fork(&mut engine, settings, *note, &lines),
        Mode::Metronome { .. } => run_metronome(&mut engine, settings, &args, &lines),
        Mode::Help => Ok(()),
    };

    let diagnostics = engine.diagnostics();
    info!(?diagnostics, "shutting down");
    engine.close_input();
    engine.close_output();

    if let Err(e) = file.persist() {
        warn!("could not save settings: {e:#}");
    }
    result
}

/// Forwards stdin lines on a channel. The channel disconnects on EOF.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .ok();
    rx
}

fn run_tuner(engine: &mut AudioEngine, settings: &Settings, lines: &Receiver<String>) -> Result<()> {
    engine.open_input().context("failed to open microphone")?;

    let sample_rate = engine.config().sample_rate;
    let tuner = TunerEngine::new(sample_rate, TunerConfig::default())?;
    let a4 = AtomicF32::new(settings.a4);
    let (tx, rx) = events::channel(events::DEFAULT_CAPACITY);
    engine.register_input_consumer(TunerSession::new(tuner, a4, tx));
    println!("Listening (A4 = {:.1} Hz). Press Enter to stop.", settings.a4);

    let mut stdout = io::stdout();
    loop {
        select! {
            recv(rx) -> event => match event {
                Ok(Event::PitchDetected { note, frequency, cents }) => {
                    print!("\r{:<4} {:>8.2} Hz {:>+7.1} cents {:<21}", note, frequency, cents, meter(cents));
                    stdout.flush()?;
                }
                Ok(_) => {}
                Err(_) => break,
            },
            recv(lines) -> _ => break,
        }
    }
    println!();
    engine.clear_input_consumer();
    Ok(())
}

/// Text needle: one cell per 5 cents, clipped at ±50.
fn meter(cents: f32) -> String {
    let offset = (cents / 5.0).round().clamp(-10.0, 10.0) as i32;
    (-10..=10)
        .map(|cell| match cell {
            c if c == offset => '|',
            0 => '+',
            _ => '-',
        })
        .collect()
}

fn run_fork(
    engine: &mut AudioEngine,
    settings: &Settings,
    note: Option<Note>,
    lines: &Receiver<String>,
) -> Result<()> {
    engine.open_output().context("failed to open speakers")?;

    let mut tone = ToneGenerator::new(engine);
    tone.set_reference_pitch(settings.a4)?;
    tone.set_volume(settings.tone_volume);
    let note = note.unwrap_or(Note::new(PitchClass::A, 4));
    tone.set_pitch(note);
    tone.start();
    println!(
        "Playing {} at {:.2} Hz. Press Enter to stop.",
        note,
        tone.frequency()
    );

    // Either a line or EOF ends playback.
    let _ = lines.recv();
    tone.stop();
    Ok(())
}

fn run_metronome(
    engine: &mut AudioEngine,
    settings: &mut Settings,
    args: &Args,
    lines: &Receiver<String>,
) -> Result<()> {
    engine.open_output().context("failed to open speakers")?;

    let mut metronome = MetronomeEngine::new(engine);
    metronome.set_bpm(settings.bpm);
    metronome.set_time_signature(settings.beats_per_bar, settings.note_value);
    if let Mode::Metronome {
        ramp: Some(ramp), ..
    } = &args.mode
    {
        metronome.enable_practice_mode(ramp.start_bpm, ramp.end_bpm, ramp.seconds);
    }
    let (tx, rx) = events::channel(events::DEFAULT_CAPACITY);
    metronome.register_listener(tx);
    metronome.start();
    println!(
        "{} at {:.0} BPM. Press Enter to tap the tempo, q then Enter to quit.",
        metronome.time_signature(),
        metronome.bpm()
    );

    let mut tap = TapTempo::new();
    let mut stdout = io::stdout();
    let mut bpm = metronome.bpm();
    loop {
        select! {
            recv(rx) -> event => match event {
                // The tempo for a beat arrives just before it.
                Ok(Event::Beat { primary, index }) => {
                    let mark = if primary { "TICK" } else { "tock" };
                    print!("\r{mark} #{index:<6} {bpm:>6.1} BPM ");
                    stdout.flush()?;
                }
                Ok(Event::TempoChanged { bpm: current }) => bpm = current,
                Ok(_) => {}
                Err(_) => break,
            },
            recv(lines) -> line => match line.as_deref().map(str::trim) {
                Ok("") => {
                    if let Some(tapped) = tap.tap(Instant::now()) {
                        metronome.disable_practice_mode();
                        metronome.set_bpm(tapped);
                        info!(bpm = tapped, "tapped tempo");
                    }
                }
                Ok("q") | Err(_) => break,
                Ok(other) => warn!("unknown command `{other}`"),
            },
        }
    }
    println!();

    metronome.stop();
    settings.bpm = metronome.bpm();
    let signature = metronome.time_signature();
    settings.beats_per_bar = signature.beats_per_bar;
    settings.note_value = signature.note_value;
    Ok(())
}
