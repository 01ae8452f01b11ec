//! timeline.rs
//!
//! Turns per-track delta times into absolute ticks and keeps only the note events.
//!
//! Every track starts its own clock at tick 0. Tracks share nothing but that origin,
//! so tick 5 in one track and tick 5 in another are simply the same number of ticks
//! after their respective starts. No tempo is applied: the tick is the unit of time.

use log::trace;

use crate::midi::{EventFile, MessageKind};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TimelineError {
    #[error("absolute tick overflow in track {track}")]
    TickOverflow { track: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NoteKind {
    On,
    Off,
}

/// A note message stamped with its absolute tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoteEvent {
    pub kind: NoteKind,
    pub tick: u64,
    pub pitch: u8,
}

impl NoteEvent {
    pub fn on(tick: u64, pitch: u8) -> Self {
        Self { kind: NoteKind::On, tick, pitch }
    }

    pub fn off(tick: u64, pitch: u8) -> Self {
        Self { kind: NoteKind::Off, tick, pitch }
    }
}

/// The order in which note events are applied to the piano roll.
///
/// Sustain writes overwrite everything after their tick, so the order decides
/// which event wins when two tracks touch the same pitch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum EventOrder {
    /// Sort by absolute tick. Ties keep their encoded order.
    #[default]
    Chronological,
    /// Track by track, then message by message, exactly as encoded.
    Track,
}

/// Flatten an event file into absolute-time note events.
///
/// - Walk each track independently, starting at tick 0
/// - Add each message's delta before looking at the message itself
/// - Emit note-on / note-off messages with the accumulated tick
///
/// The result is all of track 0's notes, then all of track 1's, and so on.
/// Nothing is sorted here, see `order_events`.
pub fn reconstruct(file: &EventFile) -> Result<Vec<NoteEvent>, TimelineError> {
    let mut notes = Vec::new();

    for (i, track) in file.tracks.iter().enumerate() {
        trace!("track {}: {}", i, track.name.as_deref().unwrap_or("<unnamed>"));

        let mut current_tick: u64 = 0;
        for msg in &track.messages {
            current_tick = current_tick
                .checked_add(u64::from(msg.delta))
                .ok_or(TimelineError::TickOverflow { track: i })?;

            let note = match msg.kind {
                MessageKind::NoteOn { pitch } => NoteEvent::on(current_tick, pitch),
                MessageKind::NoteOff { pitch } => NoteEvent::off(current_tick, pitch),
                MessageKind::Other => continue,
            };
            trace!(
                "event: {:?} delta: {:4} abs: {:6} note: {:3}",
                note.kind, msg.delta, current_tick, note.pitch
            );
            notes.push(note);
        }
    }

    Ok(notes)
}

/// Arrange reconstructed events in the order they will be applied.
pub fn order_events(mut events: Vec<NoteEvent>, order: EventOrder) -> Vec<NoteEvent> {
    if order == EventOrder::Chronological {
        // stable: equal ticks keep track/message order
        events.sort_by_key(|e| e.tick);
    }
    events
}
