//! # Mixer Module
//!
//! The output-side state shared between the control threads and the output
//! audio callback:
//! - [`OscillatorState`]: the reference tone parameters
//! - [`ClickQueue`]: pending metronome samples, consumed FIFO
//!
//! Writers ([`Mixer::enable_tone`], [`Mixer::enqueue_click`]) take the locks
//! normally. The callback side ([`MixRenderer`]) only ever uses `try_lock`;
//! when a lock is contended it skips that part of the mix for the block
//! instead of waiting.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Upper bound on queued click audio, in seconds.
pub const MAX_CLICK_QUEUE_SECONDS: f32 = 2.0;

/// Reference tone parameters. The running phase lives in [`MixRenderer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscillatorState {
    pub frequency: f32,
    pub volume: f32,
    pub enabled: bool,
}

impl Default for OscillatorState {
    fn default() -> Self {
        Self {
            frequency: 440.0,
            volume: 0.3,
            enabled: false,
        }
    }
}

/// FIFO of output samples waiting to be mixed in.
#[derive(Debug)]
pub struct ClickQueue {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl ClickQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends samples. If the queue would exceed its capacity the oldest
    /// samples are discarded; returns how many were discarded.
    pub fn push(&mut self, click: &[f32]) -> usize {
        self.samples.extend(click.iter().copied());
        let overflow = self.samples.len().saturating_sub(self.capacity);
        if overflow > 0 {
            self.samples.drain(..overflow);
        }
        overflow
    }

    /// Adds the front of the queue into `out` and removes what was used.
    /// Returns the number of samples consumed.
    pub fn mix_into(&mut self, out: &mut [f32]) -> usize {
        let n = out.len().min(self.samples.len());
        for (dst, src) in out.iter_mut().zip(self.samples.drain(..n)) {
            *dst += src;
        }
        n
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Shared mixer surface. Owned by the [`AudioEngine`](crate::AudioEngine)
/// and handed to the tone generator and metronome as an `Arc`.
#[derive(Debug)]
pub struct Mixer {
    sample_rate: u32,
    oscillator: Mutex<OscillatorState>,
    clicks: Mutex<ClickQueue>,
    skipped_blocks: AtomicU64,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        let capacity = (sample_rate as f32 * MAX_CLICK_QUEUE_SECONDS) as usize;
        Self {
            sample_rate,
            oscillator: Mutex::new(OscillatorState::default()),
            clicks: Mutex::new(ClickQueue::new(capacity)),
            skipped_blocks: AtomicU64::new(0),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Turns the oscillator on with new parameters. Picked up by the output
    /// callback at its next block.
    ///
    /// Volume is clamped to `[0, 1]` with NaN treated as silence. A
    /// frequency that is not finite and positive is ignored and the call
    /// changes nothing.
    pub fn enable_tone(&self, frequency: f32, volume: f32) {
        if !(frequency.is_finite() && frequency > 0.0) {
            warn!(frequency, "ignoring invalid tone frequency");
            return;
        }
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        let mut osc = self.oscillator.lock();
        osc.frequency = frequency;
        osc.volume = volume;
        osc.enabled = true;
    }

    pub fn disable_tone(&self) {
        self.oscillator.lock().enabled = false;
    }

    /// Snapshot of the oscillator parameters.
    pub fn oscillator(&self) -> OscillatorState {
        *self.oscillator.lock()
    }

    /// Appends a click waveform to the output queue.
    pub fn enqueue_click(&self, samples: &[f32]) {
        let dropped = self.clicks.lock().push(samples);
        if dropped > 0 {
            warn!(dropped, "click queue full, discarded oldest samples");
        }
    }

    /// Samples currently waiting in the click queue.
    pub fn queued_click_samples(&self) -> usize {
        self.clicks.lock().len()
    }

    /// Drops everything still queued.
    pub fn clear_clicks(&self) {
        self.clicks.lock().clear();
    }

    /// Blocks in which part of the mix was skipped due to lock contention.
    pub fn skipped_blocks(&self) -> u64 {
        self.skipped_blocks.load(Ordering::Relaxed)
    }
}

/// The output callback's side of the mixer.
///
/// Owns the oscillator's running phase, which is always in `[0, 2π)`
/// between blocks.
#[derive(Debug)]
pub struct MixRenderer {
    mixer: Arc<Mixer>,
    phase: f64,
}

impl MixRenderer {
    pub fn new(mixer: Arc<Mixer>) -> Self {
        Self { mixer, phase: 0.0 }
    }

    /// Oscillator phase in radians.
    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Fills `out` with one block: silence, plus the tone if enabled, plus
    /// the front of the click queue.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let mut skipped = false;

        match self.mixer.oscillator.try_lock().map(|osc| *osc) {
            Some(osc) if osc.enabled && osc.frequency.is_finite() && osc.frequency > 0.0 => {
                let step = TAU * osc.frequency as f64 / self.mixer.sample_rate as f64;
                let volume = osc.volume as f64;
                for (i, sample) in out.iter_mut().enumerate() {
                    *sample += (volume * (self.phase + step * i as f64).sin()) as f32;
                }
                self.phase = (self.phase + step * out.len() as f64).rem_euclid(TAU);
                if self.phase >= TAU {
                    self.phase = 0.0;
                }
            }
            Some(_) => {}
            None => skipped = true,
        }

        match self.mixer.clicks.try_lock() {
            Some(mut clicks) => {
                clicks.mix_into(out);
            }
            None => skipped = true,
        }

        if skipped {
            self.mixer.skipped_blocks.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// [`MixRenderer::render`] behind a panic boundary. A fault leaves the
    /// block silent instead of unwinding into the driver.
    pub fn render_isolated(&mut self, out: &mut [f32]) {
        isolate(out, |out| self.render(out));
    }
}

fn isolate(out: &mut [f32], render: impl FnOnce(&mut [f32])) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| render(&mut *out)));
    if result.is_err() {
        out.fill(0.0);
    }
}
