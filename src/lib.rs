//! MIDI files to piano-roll matrices.
//!
//! The pipeline, one file at a time:
//! - `midi`: SMF bytes (via `midly`) to tracks of delta-timed messages
//! - `timeline`: delta times to absolute ticks, keeping note events only
//! - `pianoroll`: note events to sustain / note-on / note-off grids
//! - `sparse`: compressed sparse column storage of a grid
//! - `batch`: a whole directory in, a directory of rolls out

pub mod batch;
pub mod midi;
pub mod pianoroll;
pub mod sparse;
pub mod timeline;
