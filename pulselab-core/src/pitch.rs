//! # Pitch Detection Module
//!
//! This module implements monophonic pitch detection with the YIN algorithm
//! and the input-path plumbing around it.
//!
//! ## Features
//! - YIN difference and cumulative mean normalized difference functions
//! - Absolute threshold search with descent to the bottom of the first dip
//! - Parabolic interpolation for sub-sample accuracy
//! - DC offset removal and an RMS silence gate
//! - Frame accumulation so any driver block size can be analysed
//! - Median smoothing of successive estimates

use crate::audio::InputConsumer;
use crate::config::{AtomicF32, TunerConfig};
use crate::error::ConfigError;
use crate::events::{Event, EventSender};
use crate::notes;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Number of estimates the median smoother looks at.
pub const SMOOTHING_WINDOW: usize = 5;

/// A YIN pitch detector with fixed parameters and preallocated scratch
/// buffers, so [`TunerEngine::process`] does not allocate.
#[derive(Debug, Clone)]
pub struct TunerEngine {
    config: TunerConfig,
    sample_rate: u32,
    frame: Vec<f32>,
    difference: Vec<f32>,
    cmnd: Vec<f32>,
    last_frequency: Option<f32>,
}

impl TunerEngine {
    /// Creates a detector for the given sample rate.
    ///
    /// # Errors
    /// * `ConfigError::InvalidParameter` - The config does not fit the sample
    ///   rate (see [`TunerConfig::validate`])
    pub fn new(sample_rate: u32, config: TunerConfig) -> Result<Self, ConfigError> {
        config.validate(sample_rate)?;
        let max_tau = (sample_rate as f32 / config.fmin) as usize;
        Ok(Self {
            config,
            sample_rate,
            frame: vec![0.0; config.buffer_size],
            difference: vec![0.0; max_tau],
            cmnd: vec![0.0; max_tau],
            last_frequency: None,
        })
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The most recent successful estimate. Diagnostic only.
    pub fn last_frequency(&self) -> Option<f32> {
        self.last_frequency
    }

    /// Estimates the fundamental frequency of one block.
    ///
    /// Only the first `buffer_size` samples are used. The block is centred
    /// around zero before the silence gate and the YIN search run.
    ///
    /// # Returns
    /// * `Some(frequency)` - Detected frequency in Hz
    /// * `None` - Block too short, silent, or no lag under the threshold
    pub fn process(&mut self, block: &[f32]) -> Option<f32> {
        let size = self.config.buffer_size;
        if block.len() < size {
            return None;
        }

        self.frame.copy_from_slice(&block[..size]);
        remove_dc_offset(&mut self.frame);

        if rms(&self.frame) < self.config.silence_rms {
            return None;
        }

        let min_tau = (self.sample_rate as f32 / self.config.fmax) as usize;
        difference_function(&self.frame, &mut self.difference);
        cumulative_mean_normalized_difference(&self.difference, &mut self.cmnd);
        let tau = absolute_threshold(&self.cmnd, min_tau, self.config.threshold)?;
        let refined = parabolic_interpolation(&self.cmnd, tau);

        let frequency = self.sample_rate as f32 / refined;
        if !frequency.is_finite() {
            return None;
        }
        self.last_frequency = Some(frequency);
        Some(frequency)
    }
}

/// Subtracts the mean so the signal is centred around zero.
pub fn remove_dc_offset(signal: &mut [f32]) {
    if signal.is_empty() {
        return;
    }
    let mean = signal.iter().sum::<f32>() / signal.len() as f32;
    for sample in signal.iter_mut() {
        *sample -= mean;
    }
}

/// Root mean square of a signal; 0 for an empty slice.
pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|&s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
}

/// YIN step 1: `d(τ) = Σ (x[i] - x[i+τ])²` over `i in 0..N-τ`.
///
/// Fills `out[1..]`; `out.len()` is `max_tau`. `out[0]` is left at zero.
pub fn difference_function(signal: &[f32], out: &mut [f32]) {
    let n = signal.len();
    if let Some(first) = out.first_mut() {
        *first = 0.0;
    }
    for tau in 1..out.len() {
        if tau >= n {
            out[tau] = 0.0;
            continue;
        }
        out[tau] = signal[..n - tau]
            .iter()
            .zip(&signal[tau..])
            .map(|(a, b)| {
                let delta = a - b;
                delta * delta
            })
            .sum();
    }
}

/// YIN step 2: cumulative mean normalized difference.
///
/// `cmnd(0) = 1`; for τ ≥ 1, `cmnd(τ) = d(τ)·τ / Σ_{j=1..τ} d(j)`, or `1`
/// while that running sum is still zero.
pub fn cumulative_mean_normalized_difference(difference: &[f32], out: &mut [f32]) {
    if out.is_empty() {
        return;
    }
    out[0] = 1.0;
    let mut running_sum = 0.0;
    for tau in 1..difference.len().min(out.len()) {
        running_sum += difference[tau];
        out[tau] = if running_sum != 0.0 {
            difference[tau] * tau as f32 / running_sum
        } else {
            1.0
        };
    }
}

/// YIN step 3: finds the first dip of `cmnd` below `threshold`, scanning
/// from `min_tau`, and returns the lag at the bottom of that dip.
///
/// Returns `None` if no lag falls under the threshold.
pub fn absolute_threshold(cmnd: &[f32], min_tau: usize, threshold: f32) -> Option<usize> {
    let start = min_tau.max(1);
    let mut tau = (start..cmnd.len()).find(|&tau| cmnd[tau] < threshold)?;
    while tau + 1 < cmnd.len() && cmnd[tau + 1] < cmnd[tau] {
        tau += 1;
    }
    Some(tau)
}

/// YIN step 4: refines `tau` by fitting a parabola through it and its two
/// neighbours.
///
/// Returns `tau` unrefined at either boundary of `cmnd` or when the
/// parabola is degenerate.
pub fn parabolic_interpolation(cmnd: &[f32], tau: usize) -> f32 {
    if tau == 0 || tau + 1 >= cmnd.len() {
        return tau as f32;
    }
    let s0 = cmnd[tau - 1];
    let s1 = cmnd[tau];
    let s2 = cmnd[tau + 1];

    let denominator = 2.0 * (2.0 * s1 - s2 - s0);
    if denominator == 0.0 {
        return tau as f32;
    }
    tau as f32 + (s2 - s0) / denominator
}

/// Re-cuts arbitrarily sized driver blocks into fixed-size analysis frames.
#[derive(Debug, Clone)]
pub struct FrameAccumulator {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAccumulator {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size * 2),
        }
    }

    /// Appends `block` and calls `on_frame` for every complete frame.
    pub fn push(&mut self, block: &[f32], mut on_frame: impl FnMut(&[f32])) {
        self.pending.extend_from_slice(block);
        let mut consumed = 0;
        while self.pending.len() - consumed >= self.frame_size {
            on_frame(&self.pending[consumed..consumed + self.frame_size]);
            consumed += self.frame_size;
        }
        self.pending.drain(..consumed);
    }

    /// Samples waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Median of the last [`SMOOTHING_WINDOW`] estimates.
#[derive(Debug, Clone, Default)]
pub struct PitchSmoother {
    history: VecDeque<f32>,
}

impl PitchSmoother {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(SMOOTHING_WINDOW),
        }
    }

    /// Adds an estimate and returns the median of the window.
    pub fn push(&mut self, frequency: f32) -> f32 {
        if self.history.len() == SMOOTHING_WINDOW {
            self.history.pop_front();
        }
        self.history.push_back(frequency);

        let mut sorted = [0.0_f32; SMOOTHING_WINDOW];
        let len = self.history.len();
        for (slot, &value) in sorted.iter_mut().zip(&self.history) {
            *slot = value;
        }
        let window = &mut sorted[..len];
        window.sort_by(f32::total_cmp);
        if len % 2 == 1 {
            window[len / 2]
        } else {
            (window[len / 2 - 1] + window[len / 2]) / 2.0
        }
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

/// The tuner's input-path consumer.
///
/// Accumulates driver blocks into analysis frames, runs the detector,
/// smooths the estimate and maps it to the nearest note against a shared A4,
/// then pushes [`Event::PitchDetected`]. Register it on the
/// [`AudioEngine`](crate::AudioEngine) with `register_input_consumer`.
#[derive(Debug)]
pub struct TunerSession {
    engine: TunerEngine,
    frames: FrameAccumulator,
    smoother: PitchSmoother,
    a4: AtomicF32,
    events: EventSender,
}

impl TunerSession {
    pub fn new(engine: TunerEngine, a4: AtomicF32, events: EventSender) -> Self {
        let frame_size = engine.config().buffer_size;
        Self {
            engine,
            frames: FrameAccumulator::new(frame_size),
            smoother: PitchSmoother::new(),
            a4,
            events,
        }
    }

    pub fn engine(&self) -> &TunerEngine {
        &self.engine
    }

    /// Feeds one block of any length.
    pub fn feed(&mut self, block: &[f32]) {
        let Self {
            engine,
            frames,
            smoother,
            a4,
            events,
        } = self;
        frames.push(block, |frame| {
            let Some(raw) = engine.process(frame) else {
                return;
            };
            let frequency = smoother.push(raw);
            let Some(mapping) = notes::frequency_to_note(frequency, a4.get()) else {
                return;
            };
            trace!(raw, frequency, note = %mapping.note, cents = mapping.cents, "pitch");
            if !events.emit(Event::PitchDetected {
                note: mapping.note,
                frequency,
                cents: mapping.cents,
            }) {
                debug!("pitch event dropped");
            }
        });
    }
}

impl InputConsumer for TunerSession {
    fn on_block(&mut self, block: Vec<f32>) {
        self.feed(&block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use std::f32::consts::TAU;

    fn sine(freq: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (TAU * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    fn engine() -> TunerEngine {
        TunerEngine::new(44_100, TunerConfig::default()).unwrap()
    }

    #[test]
    fn detects_a440() {
        let mut tuner = engine();
        let freq = tuner.process(&sine(440.0, 44_100, 2048, 0.5)).unwrap();
        assert!((freq - 440.0).abs() / 440.0 < 0.005, "got {freq}");
        assert_eq!(tuner.last_frequency(), Some(freq));
    }

    #[test]
    fn short_block_is_not_an_error() {
        let mut tuner = engine();
        assert_eq!(tuner.process(&sine(440.0, 44_100, 1000, 0.5)), None);
    }

    #[test]
    fn silence_and_dc_are_gated() {
        let mut tuner = engine();
        assert_eq!(tuner.process(&vec![0.0; 2048]), None);
        // A pure offset has no energy once the mean is removed.
        assert_eq!(tuner.process(&vec![0.5; 2048]), None);
        assert_eq!(tuner.process(&sine(440.0, 44_100, 2048, 0.005)), None);
        assert_eq!(tuner.last_frequency(), None);
    }

    #[test]
    fn dc_offset_does_not_bias_detection() {
        let mut tuner = engine();
        let block: Vec<f32> = sine(220.0, 44_100, 2048, 0.4)
            .into_iter()
            .map(|s| s + 0.3)
            .collect();
        let freq = tuner.process(&block).unwrap();
        assert!((freq - 220.0).abs() / 220.0 < 0.005, "got {freq}");
    }

    #[test]
    fn longer_blocks_are_truncated() {
        let mut tuner = engine();
        let freq = tuner.process(&sine(330.0, 44_100, 4096, 0.5)).unwrap();
        assert!((freq - 330.0).abs() / 330.0 < 0.005);
    }

    #[test]
    fn cmnd_starts_at_one_and_survives_zero_sums() {
        let difference = vec![0.0; 16];
        let mut cmnd = vec![f32::NAN; 16];
        cumulative_mean_normalized_difference(&difference, &mut cmnd);
        assert_eq!(cmnd[0], 1.0);
        assert!(cmnd.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn cmnd_normalizes_by_running_mean() {
        let difference = [0.0, 2.0, 4.0, 0.0];
        let mut cmnd = [0.0; 4];
        cumulative_mean_normalized_difference(&difference, &mut cmnd);
        assert_eq!(cmnd, [1.0, 1.0, 4.0 * 2.0 / 6.0, 0.0]);
    }

    #[test]
    fn difference_function_of_constant_is_zero() {
        let signal = vec![0.25; 64];
        let mut out = vec![1.0; 10];
        difference_function(&signal, &mut out);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn threshold_search_descends_to_the_bottom_of_the_dip() {
        let cmnd = [1.0, 0.9, 0.8, 0.09, 0.05, 0.02, 0.04, 0.01];
        assert_eq!(absolute_threshold(&cmnd, 1, 0.1), Some(5));
        // Lags below min_tau are never considered.
        assert_eq!(absolute_threshold(&cmnd, 6, 0.1), Some(7));
        assert_eq!(absolute_threshold(&[1.0, 0.5, 0.4], 1, 0.1), None);
    }

    #[test]
    fn parabolic_interpolation_handles_boundaries_and_flat_curves() {
        let cmnd = [1.0, 0.5, 0.2, 0.5, 1.0];
        assert_eq!(parabolic_interpolation(&cmnd, 0), 0.0);
        assert_eq!(parabolic_interpolation(&cmnd, 4), 4.0);
        assert_eq!(parabolic_interpolation(&cmnd, 2), 2.0);
        let flat = [0.3, 0.3, 0.3];
        assert_eq!(parabolic_interpolation(&flat, 1), 1.0);
    }

    #[test]
    fn parabolic_interpolation_finds_the_vertex() {
        // y = (x - 2.25)^2
        let cmnd: Vec<f32> = (0..5).map(|x| (x as f32 - 2.25).powi(2)).collect();
        assert!((parabolic_interpolation(&cmnd, 2) - 2.25).abs() < 1e-5);
    }

    #[test]
    fn frame_accumulator_recuts_blocks() {
        let mut frames = FrameAccumulator::new(4);
        let mut seen = Vec::new();
        frames.push(&[1.0, 2.0, 3.0], |f| seen.push(f.to_vec()));
        assert!(seen.is_empty());
        frames.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], |f| seen.push(f.to_vec()));
        assert_eq!(seen, vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]);
        assert_eq!(frames.pending(), 1);
    }

    #[test]
    fn smoother_reports_the_median() {
        let mut smoother = PitchSmoother::new();
        assert_eq!(smoother.push(440.0), 440.0);
        assert_eq!(smoother.push(442.0), 441.0);
        assert_eq!(smoother.push(880.0), 442.0);
        smoother.push(441.0);
        smoother.push(439.0);
        // 300 evicts the oldest estimate (440).
        assert_eq!(smoother.push(300.0), 441.0);
    }

    #[test]
    fn session_emits_pitch_events_from_small_blocks() {
        let (tx, rx) = events::channel(16);
        let mut session = TunerSession::new(engine(), AtomicF32::new(440.0), tx);
        let signal = sine(440.0, 44_100, 4096, 0.5);
        for chunk in signal.chunks(512) {
            session.on_block(chunk.to_vec());
        }
        let received: Vec<Event> = rx.try_iter().collect();
        assert_eq!(received.len(), 2);
        match &received[0] {
            Event::PitchDetected { note, frequency, cents } => {
                assert_eq!(note.to_string(), "A4");
                assert!((frequency - 440.0).abs() < 2.2);
                assert!(cents.abs() < 10.0);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn session_follows_reference_pitch_changes() {
        let (tx, rx) = events::channel(16);
        let a4 = AtomicF32::new(440.0);
        let mut session = TunerSession::new(engine(), a4.clone(), tx);
        a4.set(430.0);
        session.feed(&sine(440.0, 44_100, 2048, 0.5));
        match rx.try_recv().unwrap() {
            Event::PitchDetected { note, cents, .. } => {
                assert_eq!(note.to_string(), "A4");
                assert!(cents > 35.0 && cents < 45.0, "got {cents}");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
