//! # Audio Stream Module
//!
//! This module owns the hardware streams using CPAL (Cross-Platform Audio
//! Library) and performs the real-time work in their callbacks.
//!
//! ## Features
//! - Independent open/close of the input and output directions
//! - Output callback mixing the reference tone and metronome clicks
//! - Input callback forwarding copied blocks to a registered consumer
//! - Driver errors counted and logged, never fatal
//!
//! ## Audio Configuration
//! - Sample Rate: from [`StreamConfig`] (44.1 kHz by default)
//! - Format: 32-bit float
//! - Channels: Mono (1 channel) in both directions
//! - Block Size: from [`StreamConfig`] (2048 frames by default)

use crate::config::StreamConfig;
use crate::error::AudioError;
use crate::mixer::{MixRenderer, Mixer};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SupportedStreamConfigRange};
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, trace, warn};

/// Receives copies of input blocks, synchronously on the input callback.
///
/// Implementations run on a real-time thread and must not block.
pub trait InputConsumer: Send {
    fn on_block(&mut self, block: Vec<f32>);
}

/// Forwards blocks to another thread, dropping them if the channel is full
/// or disconnected.
///
/// These drops happen on the receiving side's account and are not counted in
/// [`Diagnostics::dropped_input_blocks`], which only tracks a busy consumer
/// slot; they are trace-logged.
impl InputConsumer for Sender<Vec<f32>> {
    fn on_block(&mut self, block: Vec<f32>) {
        match self.try_send(block) {
            Ok(()) => {}
            Err(TrySendError::Full(block)) => {
                trace!(len = block.len(), "input channel full, dropping block");
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!("input channel disconnected, dropping block");
            }
        }
    }
}

type ConsumerSlot = Arc<Mutex<Option<Box<dyn InputConsumer>>>>;

/// Counters for driver trouble and real-time compromises.
#[derive(Debug, Default)]
struct Counters {
    input_errors: AtomicU64,
    output_errors: AtomicU64,
    dropped_input_blocks: AtomicU64,
}

/// Snapshot of the engine's diagnostic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Diagnostics {
    /// Errors reported by the driver on the input stream (e.g. overflow).
    pub input_errors: u64,
    /// Errors reported by the driver on the output stream (e.g. underrun).
    pub output_errors: u64,
    /// Input blocks not delivered because the consumer slot was busy.
    pub dropped_input_blocks: u64,
    /// Output blocks where part of the mix was skipped.
    pub skipped_output_blocks: u64,
    /// Samples waiting in the click queue.
    pub queued_click_samples: usize,
}

/// Owner of the hardware streams and the shared mixer.
///
/// There is exactly one of these per application; the tone generator and
/// metronome are constructed from a reference to it and keep only a handle
/// to its [`Mixer`].
pub struct AudioEngine {
    config: StreamConfig,
    mixer: Arc<Mixer>,
    consumer: ConsumerSlot,
    counters: Arc<Counters>,
    host: Option<cpal::Host>,
    input_stream: Option<cpal::Stream>,
    output_stream: Option<cpal::Stream>,
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("config", &self.config)
            .field("input_open", &self.is_input_open())
            .field("output_open", &self.is_output_open())
            .finish_non_exhaustive()
    }
}

impl AudioEngine {
    /// Creates an engine with both directions closed. No device is touched
    /// until a stream is opened.
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            mixer: Arc::new(Mixer::new(config.sample_rate)),
            consumer: Arc::new(Mutex::new(None)),
            counters: Arc::new(Counters::default()),
            host: None,
            input_stream: None,
            output_stream: None,
        }
    }

    pub fn config(&self) -> StreamConfig {
        self.config
    }

    /// Handle to the shared mixer surface.
    pub fn mixer(&self) -> Arc<Mixer> {
        Arc::clone(&self.mixer)
    }

    pub fn is_input_open(&self) -> bool {
        self.input_stream.is_some()
    }

    pub fn is_output_open(&self) -> bool {
        self.output_stream.is_some()
    }

    /// Sets the consumer that receives every input block. Replaces any
    /// previous consumer.
    pub fn register_input_consumer(&self, consumer: impl InputConsumer + 'static) {
        *self.consumer.lock() = Some(Box::new(consumer));
    }

    pub fn clear_input_consumer(&self) {
        *self.consumer.lock() = None;
    }

    /// Turns the reference tone on. Takes effect at the next output block.
    pub fn enable_tone(&self, frequency: f32, volume: f32) {
        self.mixer.enable_tone(frequency, volume);
    }

    pub fn disable_tone(&self) {
        self.mixer.disable_tone();
    }

    /// Queues samples for playback on the output stream.
    pub fn enqueue_click(&self, samples: &[f32]) {
        self.mixer.enqueue_click(samples);
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            input_errors: self.counters.input_errors.load(Ordering::Relaxed),
            output_errors: self.counters.output_errors.load(Ordering::Relaxed),
            dropped_input_blocks: self.counters.dropped_input_blocks.load(Ordering::Relaxed),
            skipped_output_blocks: self.mixer.skipped_blocks(),
            queued_click_samples: self.mixer.queued_click_samples(),
        }
    }

    fn host(&mut self) -> &cpal::Host {
        self.host.get_or_insert_with(cpal::default_host)
    }

    /// Opens and starts the input stream on the default input device.
    ///
    /// Does nothing if the stream is already open. On failure the input
    /// direction stays closed and the output direction is unaffected.
    pub fn open_input(&mut self) -> Result<(), AudioError> {
        if self.input_stream.is_some() {
            return Ok(());
        }
        let config = self.config;
        let device = self
            .host()
            .default_input_device()
            .ok_or(AudioError::NoDevice("input"))?;
        info!("Using audio input device: {}", device.name()?);

        let configs = device.supported_input_configs()?.collect::<Vec<_>>();
        if !supports_config(&configs, config.sample_rate) {
            return Err(AudioError::UnsupportedConfig {
                sample_rate: config.sample_rate,
            });
        }

        let consumer = Arc::clone(&self.consumer);
        let data_counters = Arc::clone(&self.counters);
        let err_counters = Arc::clone(&self.counters);

        let stream = device
            .build_input_stream(
                &config.into(),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    deliver_input(&consumer, &data_counters, data);
                },
                move |err| {
                    err_counters.input_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("An error occurred on the input stream: {}", err);
                },
                None,
            )
            .map_err(|source| AudioError::Build {
                direction: "input",
                source,
            })?;

        stream.play().map_err(|source| AudioError::Play {
            direction: "input",
            source,
        })?;

        info!(
            sample_rate = config.sample_rate,
            block_size = config.block_size,
            "Input stream started"
        );
        self.input_stream = Some(stream);
        Ok(())
    }

    /// Opens and starts the output stream on the default output device.
    ///
    /// Does nothing if the stream is already open. On failure the output
    /// direction stays closed and the input direction is unaffected.
    pub fn open_output(&mut self) -> Result<(), AudioError> {
        if self.output_stream.is_some() {
            return Ok(());
        }
        let config = self.config;
        let device = self
            .host()
            .default_output_device()
            .ok_or(AudioError::NoDevice("output"))?;
        info!("Using audio output device: {}", device.name()?);

        let configs = device.supported_output_configs()?.collect::<Vec<_>>();
        if !supports_config(&configs, config.sample_rate) {
            return Err(AudioError::UnsupportedConfig {
                sample_rate: config.sample_rate,
            });
        }

        let mut renderer = MixRenderer::new(Arc::clone(&self.mixer));
        let err_counters = Arc::clone(&self.counters);

        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    renderer.render_isolated(data);
                },
                move |err| {
                    err_counters.output_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("An error occurred on the output stream: {}", err);
                },
                None,
            )
            .map_err(|source| AudioError::Build {
                direction: "output",
                source,
            })?;

        stream.play().map_err(|source| AudioError::Play {
            direction: "output",
            source,
        })?;

        info!(
            sample_rate = config.sample_rate,
            block_size = config.block_size,
            "Output stream started"
        );
        self.output_stream = Some(stream);
        Ok(())
    }

    /// Stops and releases the input stream. Safe to call when closed.
    pub fn close_input(&mut self) {
        if let Some(stream) = self.input_stream.take() {
            close_stream(stream, "input");
        }
    }

    /// Stops and releases the output stream. Safe to call when closed.
    pub fn close_output(&mut self) {
        if let Some(stream) = self.output_stream.take() {
            close_stream(stream, "output");
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.close_input();
        self.close_output();
    }
}

/// Body of the input callback: copy the block and hand it to the consumer.
///
/// The consumer slot is only try-locked; if the control thread is swapping
/// consumers the block is dropped.
fn deliver_input(consumer: &ConsumerSlot, counters: &Counters, data: &[f32]) {
    match consumer.try_lock() {
        Some(mut slot) => {
            if let Some(consumer) = slot.as_mut() {
                consumer.on_block(data.to_vec());
            }
        }
        None => {
            counters.dropped_input_blocks.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn close_stream(stream: cpal::Stream, direction: &str) {
    if let Err(e) = stream.pause() {
        error!("Error pausing {} stream: {}", direction, e);
    }
    drop(stream);
    debug!("{} stream closed", direction);
}

/// Checks whether a device offers a mono 32-bit float configuration whose
/// sample rate range contains `sample_rate`.
fn supports_config(configs: &[SupportedStreamConfigRange], sample_rate: u32) -> bool {
    configs.iter().any(|c| {
        c.channels() == 1
            && c.sample_format() == SampleFormat::F32
            && c.min_sample_rate().0 <= sample_rate
            && sample_rate <= c.max_sample_rate().0
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collect(Arc<Mutex<Vec<Vec<f32>>>>);

    impl InputConsumer for Collect {
        fn on_block(&mut self, block: Vec<f32>) {
            self.0.lock().push(block);
        }
    }

    #[test]
    fn new_engine_has_both_directions_closed() {
        let engine = AudioEngine::new(StreamConfig::default());
        assert!(!engine.is_input_open());
        assert!(!engine.is_output_open());
        assert_eq!(engine.diagnostics(), Diagnostics::default());
    }

    #[test]
    fn closing_unopened_streams_is_a_no_op() {
        let mut engine = AudioEngine::new(StreamConfig::default());
        engine.close_input();
        engine.close_output();
        engine.close_output();
        assert!(!engine.is_output_open());
    }

    #[test]
    fn input_blocks_are_copied_to_the_consumer() {
        let engine = AudioEngine::new(StreamConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        engine.register_input_consumer(Collect(Arc::clone(&seen)));

        let mut block = vec![0.1, 0.2, 0.3];
        deliver_input(&engine.consumer, &engine.counters, &block);
        block[0] = 9.0;

        assert_eq!(*seen.lock(), vec![vec![0.1, 0.2, 0.3]]);
    }

    #[test]
    fn input_without_consumer_is_discarded() {
        let engine = AudioEngine::new(StreamConfig::default());
        deliver_input(&engine.consumer, &engine.counters, &[1.0; 8]);
        assert_eq!(engine.diagnostics().dropped_input_blocks, 0);
    }

    #[test]
    fn busy_consumer_slot_drops_the_block() {
        let engine = AudioEngine::new(StreamConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        engine.register_input_consumer(Collect(Arc::clone(&seen)));

        let guard = engine.consumer.lock();
        deliver_input(&engine.consumer, &engine.counters, &[1.0; 8]);
        drop(guard);

        assert!(seen.lock().is_empty());
        assert_eq!(engine.diagnostics().dropped_input_blocks, 1);
    }

    #[test]
    fn channel_consumer_forwards_blocks() {
        let engine = AudioEngine::new(StreamConfig::default());
        let (tx, rx) = crossbeam_channel::bounded(1);
        engine.register_input_consumer(tx);
        deliver_input(&engine.consumer, &engine.counters, &[0.5; 4]);
        deliver_input(&engine.consumer, &engine.counters, &[0.7; 4]);
        assert_eq!(rx.try_recv(), Ok(vec![0.5; 4]));
        assert!(rx.try_recv().is_err());
        // The slot itself was free, so nothing counts as dropped.
        assert_eq!(engine.diagnostics().dropped_input_blocks, 0);
    }

    #[test]
    fn disconnected_channel_consumer_does_not_block() {
        let engine = AudioEngine::new(StreamConfig::default());
        let (tx, rx) = crossbeam_channel::bounded::<Vec<f32>>(1);
        drop(rx);
        engine.register_input_consumer(tx);
        deliver_input(&engine.consumer, &engine.counters, &[0.5; 4]);
        deliver_input(&engine.consumer, &engine.counters, &[0.5; 4]);
        assert_eq!(engine.diagnostics().dropped_input_blocks, 0);
    }

    #[test]
    fn tone_and_clicks_reach_the_mixer() {
        let engine = AudioEngine::new(StreamConfig::default());
        engine.enable_tone(220.0, 0.4);
        engine.enqueue_click(&[0.1; 32]);
        let osc = engine.mixer().oscillator();
        assert!(osc.enabled);
        assert_eq!(osc.frequency, 220.0);
        assert_eq!(engine.diagnostics().queued_click_samples, 32);
        engine.disable_tone();
        assert!(!engine.mixer().oscillator().enabled);
    }
}
