//! midi.rs
//!
//! This module adapts a parsed Standard MIDI File (SMF) into our own event file model.
//! `midly` does the binary decoding; here we keep each track and each message in its
//! original encoded order, but throw away everything except what the piano roll needs.
//!
//! ### What survives the conversion
//! - Every message keeps its delta time, so tick accumulation stays exact even across
//!   meta events, controllers and other messages we otherwise ignore.
//! - Note messages become `MessageKind::NoteOn` / `MessageKind::NoteOff` with their key.
//! - Everything else becomes `MessageKind::Other`.
//!
//! A NoteOn with velocity 0 is the usual MIDI shorthand for NoteOff, so it is
//! normalized here once and the rest of the pipeline never looks at velocity.
//! Rolls from files that use the shorthand therefore release those notes, where a
//! converter taking every `note_on` literally would keep them sounding.

use midly::{MetaMessage, MidiMessage, Smf, TrackEventKind};

/// The only message distinction the piano roll cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Start sounding a pitch
    NoteOn { pitch: u8 },
    /// Stop sounding a pitch
    NoteOff { pitch: u8 },
    /// Any other channel or meta message. Still carries time.
    Other,
}

/// A message with its delta time in ticks since the previous message of the same track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Message {
    pub delta: u32,
    pub kind: MessageKind,
}

impl Message {
    pub fn note_on(delta: u32, pitch: u8) -> Self {
        Self { delta, kind: MessageKind::NoteOn { pitch } }
    }

    pub fn note_off(delta: u32, pitch: u8) -> Self {
        Self { delta, kind: MessageKind::NoteOff { pitch } }
    }

    pub fn other(delta: u32) -> Self {
        Self { delta, kind: MessageKind::Other }
    }
}

/// One independently timed sequence of messages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Track {
    /// Track name meta event, if the track has one. Only used for logging.
    pub name: Option<String>,
    pub messages: Vec<Message>,
}

impl Track {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { name: None, messages }
    }
}

/// A whole event file: tracks in file order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFile {
    pub tracks: Vec<Track>,
}

impl EventFile {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    /// Convert a parsed SMF into an `EventFile`.
    ///
    /// - Delta ticks are copied as-is from every track event
    /// - NoteOn with velocity 0 becomes NoteOff
    /// - The first TrackName meta event names the track
    pub fn from_smf(smf: &Smf<'_>) -> Self {
        let tracks = smf
            .tracks
            .iter()
            .map(|tr| {
                let mut name = None;
                let messages = tr
                    .iter()
                    .map(|ev| {
                        let delta = ev.delta.as_int();
                        match ev.kind {
                            TrackEventKind::Midi { message, .. } => match message {
                                MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => {
                                    Message::note_off(delta, key.as_int())
                                }
                                MidiMessage::NoteOn { key, .. } => Message::note_on(delta, key.as_int()),
                                MidiMessage::NoteOff { key, .. } => Message::note_off(delta, key.as_int()),
                                _ => Message::other(delta),
                            },
                            TrackEventKind::Meta(MetaMessage::TrackName(raw)) => {
                                if name.is_none() {
                                    name = Some(String::from_utf8_lossy(raw).into_owned());
                                }
                                Message::other(delta)
                            }
                            _ => Message::other(delta),
                        }
                    })
                    .collect();
                Track { name, messages }
            })
            .collect();

        Self { tracks }
    }

    /// Parse SMF bytes and convert them in one go.
    pub fn parse(bytes: &[u8]) -> Result<Self, midly::Error> {
        let smf = Smf::parse(bytes)?;
        Ok(Self::from_smf(&smf))
    }
}
