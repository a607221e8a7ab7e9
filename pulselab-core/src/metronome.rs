//! # Metronome Module
//!
//! Beat scheduling for the metronome. A dedicated thread polls a monotonic
//! clock on a short fixed quantum, emits a click into the mixer whenever a
//! beat boundary is reached and notifies the listener.
//!
//! ## Features
//! - Fixed tempo or a linear practice ramp between two tempos
//! - Accumulator-based beat grid: a late iteration does not shift later beats
//! - Accented first beat of each bar
//! - Precomputed click waveforms
//! - Tap tempo

use crate::audio::AudioEngine;
use crate::error::ConfigError;
use crate::events::{Event, EventSender};
use crate::mixer::Mixer;
use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::f32::consts::TAU;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Sleep between scheduling iterations.
pub const POLL_QUANTUM: Duration = Duration::from_micros(500);

const ACCENT_HZ: f32 = 1600.0;
const NORMAL_HZ: f32 = 1000.0;
const CLICK_SECONDS: f32 = 0.05;
const FADE_SECONDS: f32 = 0.01;
const CLICK_AMPLITUDE: f32 = 0.6;

/// Tempo range accepted by the scheduler.
pub const MIN_BPM: f32 = 1.0;
pub const MAX_BPM: f32 = 1000.0;

/// Shortest practice ramp.
const MIN_RAMP_DURATION: Duration = Duration::from_secs(1);

const TAP_HISTORY: usize = 5;
const TAP_RESET: Duration = Duration::from_secs(2);
const TAP_MIN_BPM: f32 = 20.0;
const TAP_MAX_BPM: f32 = 240.0;

/// Beats per bar over the note value that gets the beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub beats_per_bar: u32,
    pub note_value: u32,
}

impl TimeSignature {
    /// Both parts are raised to at least 1.
    pub fn new(beats_per_bar: u32, note_value: u32) -> Self {
        Self {
            beats_per_bar: beats_per_bar.max(1),
            note_value: note_value.max(1),
        }
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.beats_per_bar, self.note_value)
    }
}

impl FromStr for TimeSignature {
    type Err = ConfigError;

    /// Parses `"3/4"`-style strings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidTimeSignature(s.to_owned());
        let (beats, note) = s.trim().split_once('/').ok_or_else(invalid)?;
        let beats = beats.trim().parse::<u32>().map_err(|_| invalid())?;
        let note = note.trim().parse::<u32>().map_err(|_| invalid())?;
        if beats == 0 || note == 0 {
            return Err(invalid());
        }
        Ok(Self::new(beats, note))
    }
}

/// Linear tempo change over a fixed duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PracticeRamp {
    pub start_bpm: f32,
    pub end_bpm: f32,
    pub duration: Duration,
}

impl PracticeRamp {
    /// Tempo `elapsed` after the ramp started; held at `end_bpm` once the
    /// duration has passed.
    pub fn bpm_at(&self, elapsed: Duration) -> f32 {
        let progress = (elapsed.as_secs_f32() / self.duration.as_secs_f32()).min(1.0);
        self.start_bpm + progress * (self.end_bpm - self.start_bpm)
    }
}

/// Tempo configuration consulted on every scheduling tick.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatSchedule {
    /// Current tempo. Overwritten by the ramp while one is active.
    pub bpm: f32,
    pub time_signature: TimeSignature,
    pub ramp: Option<PracticeRamp>,
    /// Bumped whenever a ramp is (re)enabled so the scheduler restarts it.
    ramp_epoch: u64,
}

impl Default for BeatSchedule {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            time_signature: TimeSignature::default(),
            ramp: None,
            ramp_epoch: 0,
        }
    }
}

/// Limits a tempo to `[MIN_BPM, MAX_BPM]`; NaN becomes `MIN_BPM`.
fn clamp_bpm(bpm: f32) -> f32 {
    if bpm.is_nan() {
        MIN_BPM
    } else {
        bpm.clamp(MIN_BPM, MAX_BPM)
    }
}

impl BeatSchedule {
    pub fn set_bpm(&mut self, bpm: f32) {
        self.bpm = clamp_bpm(bpm);
    }

    /// Starts a ramp. The first tick after this call is the ramp's origin.
    pub fn enable_ramp(&mut self, start_bpm: f32, end_bpm: f32, duration: Duration) {
        let ramp = PracticeRamp {
            start_bpm: clamp_bpm(start_bpm),
            end_bpm: clamp_bpm(end_bpm),
            duration: duration.max(MIN_RAMP_DURATION),
        };
        self.bpm = ramp.start_bpm;
        self.ramp = Some(ramp);
        self.ramp_epoch += 1;
    }

    pub fn disable_ramp(&mut self) {
        self.ramp = None;
    }
}

/// One emitted beat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Beat {
    pub index: u64,
    pub primary: bool,
    pub bpm: f32,
}

/// The beat-grid state machine driven by the scheduling thread.
///
/// Kept separate from the thread so it can be stepped with synthetic
/// clock values.
#[derive(Debug, Clone)]
pub struct Scheduler {
    next_beat: Instant,
    beat_index: u64,
    ramp_start: Instant,
    ramp_epoch: u64,
}

impl Scheduler {
    /// The first beat falls on `now`.
    pub fn new(now: Instant, schedule: &BeatSchedule) -> Self {
        Self {
            next_beat: now,
            beat_index: 0,
            ramp_start: now,
            ramp_epoch: schedule.ramp_epoch,
        }
    }

    /// Advances the grid to `now`.
    ///
    /// Updates the ramped tempo in `schedule`, and returns a beat if a
    /// boundary has been reached. The next boundary is the previous one
    /// plus one interval. Boundaries that are already in the past after
    /// that are skipped, not replayed; they still count towards the bar
    /// position.
    pub fn tick(&mut self, now: Instant, schedule: &mut BeatSchedule) -> Option<Beat> {
        if schedule.ramp_epoch != self.ramp_epoch {
            self.ramp_epoch = schedule.ramp_epoch;
            self.ramp_start = now;
        }
        if let Some(ramp) = schedule.ramp {
            schedule.bpm = ramp.bpm_at(now.saturating_duration_since(self.ramp_start));
        }

        if now < self.next_beat {
            return None;
        }

        // `schedule.bpm` is public and may hold any value.
        let bpm = clamp_bpm(schedule.bpm);
        schedule.bpm = bpm;
        let beats_per_bar = u64::from(schedule.time_signature.beats_per_bar.max(1));
        let beat = Beat {
            index: self.beat_index,
            primary: self.beat_index % beats_per_bar == 0,
            bpm,
        };

        let interval = Duration::from_secs_f64(60.0 / f64::from(bpm));
        self.beat_index += 1;
        self.next_beat += interval;
        if self.next_beat <= now {
            let behind = now.duration_since(self.next_beat);
            let missed = u32::try_from(behind.as_nanos() / interval.as_nanos())
                .unwrap_or(u32::MAX - 1)
                + 1;
            self.next_beat += interval * missed;
            self.beat_index += u64::from(missed);
        }
        Some(beat)
    }

    pub fn next_beat(&self) -> Instant {
        self.next_beat
    }
}

/// Precomputed accent and normal click waveforms.
#[derive(Debug, Clone)]
pub struct ClickSounds {
    accent: Vec<f32>,
    normal: Vec<f32>,
}

impl ClickSounds {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            accent: generate_click(sample_rate, ACCENT_HZ),
            normal: generate_click(sample_rate, NORMAL_HZ),
        }
    }

    pub fn accent(&self) -> &[f32] {
        &self.accent
    }

    pub fn normal(&self) -> &[f32] {
        &self.normal
    }

    fn for_beat(&self, primary: bool) -> &[f32] {
        if primary { &self.accent } else { &self.normal }
    }
}

/// A 50 ms sine burst at `frequency` whose last 10 ms fade linearly to zero.
fn generate_click(sample_rate: u32, frequency: f32) -> Vec<f32> {
    let sr = sample_rate as f32;
    let len = (sr * CLICK_SECONDS) as usize;
    let mut click: Vec<f32> = (0..len)
        .map(|i| CLICK_AMPLITUDE * (TAU * frequency * i as f32 / sr).sin())
        .collect();

    let fade_len = ((sr * FADE_SECONDS) as usize).min(len);
    if fade_len > 1 {
        let tail = len - fade_len;
        for (k, sample) in click[tail..].iter_mut().enumerate() {
            *sample *= 1.0 - k as f32 / (fade_len - 1) as f32;
        }
    }
    click
}

#[derive(Debug, Default)]
struct Shared {
    schedule: Mutex<BeatSchedule>,
    listener: Mutex<Option<EventSender>>,
}

#[derive(Debug)]
struct Worker {
    shutdown_tx: Sender<()>,
    thread_handle: JoinHandle<()>,
}

/// The metronome: `Stopped` until [`MetronomeEngine::start`], `Running`
/// until [`MetronomeEngine::stop`].
///
/// Configuration calls are safe while running and apply from the next
/// scheduling tick.
#[derive(Debug)]
pub struct MetronomeEngine {
    mixer: Arc<Mixer>,
    clicks: Arc<ClickSounds>,
    shared: Arc<Shared>,
    worker: Option<Worker>,
}

impl MetronomeEngine {
    /// Creates a stopped metronome at 120 bpm in 4/4, precomputing the click
    /// waveforms for the engine's sample rate.
    pub fn new(engine: &AudioEngine) -> Self {
        let mixer = engine.mixer();
        let clicks = Arc::new(ClickSounds::new(mixer.sample_rate()));
        Self {
            mixer,
            clicks,
            shared: Arc::new(Shared::default()),
            worker: None,
        }
    }

    /// Sets where beat and tempo notifications go.
    pub fn register_listener(&self, events: EventSender) {
        *self.shared.listener.lock() = Some(events);
    }

    pub fn clear_listener(&self) {
        *self.shared.listener.lock() = None;
    }

    /// Sets the tempo, limited to 1-1000 bpm. An active ramp overrides it
    /// on the next tick.
    pub fn set_bpm(&self, bpm: f32) {
        self.shared.schedule.lock().set_bpm(bpm);
    }

    /// Current tempo, including ramp progress.
    pub fn bpm(&self) -> f32 {
        self.shared.schedule.lock().bpm
    }

    pub fn set_time_signature(&self, beats_per_bar: u32, note_value: u32) {
        self.shared.schedule.lock().time_signature = TimeSignature::new(beats_per_bar, note_value);
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.shared.schedule.lock().time_signature
    }

    /// Ramps the tempo linearly from `start_bpm` to `end_bpm` over
    /// `duration_seconds` (at least one second), starting now if running
    /// or at the next start otherwise.
    pub fn enable_practice_mode(&self, start_bpm: f32, end_bpm: f32, duration_seconds: f32) {
        let duration = Duration::try_from_secs_f32(duration_seconds).unwrap_or(MIN_RAMP_DURATION);
        self.shared
            .schedule
            .lock()
            .enable_ramp(start_bpm, end_bpm, duration);
        debug!(start_bpm, end_bpm, duration_seconds, "practice ramp enabled");
    }

    /// Stops ramping; the tempo stays where the ramp left it.
    pub fn disable_practice_mode(&self) {
        self.shared.schedule.lock().disable_ramp();
    }

    pub fn practice_ramp(&self) -> Option<PracticeRamp> {
        self.shared.schedule.lock().ramp
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Spawns the scheduling thread. The first beat sounds immediately.
    /// No-op if already running.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let mixer = Arc::clone(&self.mixer);
        let clicks = Arc::clone(&self.clicks);
        let shared = Arc::clone(&self.shared);

        let spawned = thread::Builder::new()
            .name("metronome".to_owned())
            .spawn(move || {
                let mut scheduler = Scheduler::new(Instant::now(), &shared.schedule.lock());
                loop {
                    let now = Instant::now();
                    let beat = scheduler.tick(now, &mut shared.schedule.lock());
                    if let Some(beat) = beat {
                        mixer.enqueue_click(clicks.for_beat(beat.primary));
                        if let Some(events) = shared.listener.lock().as_ref() {
                            events.emit(Event::TempoChanged { bpm: beat.bpm });
                            events.emit(Event::Beat {
                                primary: beat.primary,
                                index: beat.index,
                            });
                        }
                    }
                    match shutdown_rx.recv_timeout(POLL_QUANTUM) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("metronome thread finished");
            });

        match spawned {
            Ok(thread_handle) => {
                info!(bpm = self.bpm(), signature = %self.time_signature(), "Metronome started");
                self.worker = Some(Worker {
                    shutdown_tx,
                    thread_handle,
                });
            }
            Err(e) => error!("Failed to spawn metronome thread: {}", e),
        }
    }

    /// Stops the scheduling thread and waits for it to exit. No-op if
    /// stopped. Clicks already queued still play out.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = worker.shutdown_tx.send(());
        if worker.thread_handle.join().is_err() {
            error!("Metronome thread panicked");
        }
        info!("Metronome stopped");
    }
}

impl Drop for MetronomeEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Derives a tempo from the spacing of the last few taps.
#[derive(Debug, Clone, Default)]
pub struct TapTempo {
    taps: VecDeque<Instant>,
}

impl TapTempo {
    pub fn new() -> Self {
        Self {
            taps: VecDeque::with_capacity(TAP_HISTORY),
        }
    }

    /// Records a tap at `now`.
    ///
    /// A pause of more than two seconds starts a new sequence. From the
    /// second tap on, returns the whole-number tempo of the average tap
    /// interval, clamped to 20-240 bpm.
    pub fn tap(&mut self, now: Instant) -> Option<f32> {
        if let Some(&last) = self.taps.back() {
            if now.saturating_duration_since(last) > TAP_RESET {
                self.taps.clear();
            }
        }
        if self.taps.len() == TAP_HISTORY {
            self.taps.pop_front();
        }
        self.taps.push_back(now);

        let (&first, &last) = (self.taps.front()?, self.taps.back()?);
        let intervals = self.taps.len() - 1;
        if intervals == 0 {
            return None;
        }
        let average = last.saturating_duration_since(first).as_secs_f32() / intervals as f32;
        Some((60.0 / average).floor().clamp(TAP_MIN_BPM, TAP_MAX_BPM))
    }

    pub fn reset(&mut self) {
        self.taps.clear();
    }
}
