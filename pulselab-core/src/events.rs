//! # Event Channel
//!
//! Notifications pushed from the audio and scheduling threads to whatever
//! front-end is listening. Delivery goes through a bounded crossbeam channel
//! and never blocks the producer: a full channel drops the event.

use crate::notes::Note;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::trace;

/// Default capacity of an event channel.
pub const DEFAULT_CAPACITY: usize = 256;

/// Something a front-end may want to render.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The tuner settled on a pitch.
    PitchDetected {
        note: Note,
        /// Smoothed detected frequency in Hz.
        frequency: f32,
        /// Signed offset from the nearest note's reference frequency.
        cents: f32,
    },
    /// The metronome emitted a click.
    Beat {
        /// First beat of the bar.
        primary: bool,
        /// Beats emitted since the metronome was started.
        index: u64,
    },
    /// Current tempo, sent alongside every beat.
    TempoChanged { bpm: f32 },
}

/// Producer half of an event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<Event>,
}

impl EventSender {
    /// Sends without blocking.
    ///
    /// Returns `false` if the event was dropped because the channel is full
    /// or the receiver is gone.
    pub fn emit(&self, event: Event) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                trace!(?event, "event channel full, dropping");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Creates a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, Receiver<Event>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (EventSender { tx }, rx)
}
