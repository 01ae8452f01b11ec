//! pianoroll.rs
//!
//! Projects absolute-time note events onto a `[tick, pitch]` grid.
//!
//! Three grids come out of one pass:
//! - **sustain**: 1 while a pitch is sounding. A note-on turns its column on from its
//!   tick to the end of the roll, a note-off turns it off again from its tick onward.
//!   A note from `a` to `b` therefore covers the half-open range `a..b`.
//! - **note_on**: 1 exactly at the tick/pitch of each note-on.
//! - **note_off**: 1 exactly at the tick/pitch of each note-off.
//!
//! Sustain writes are range overwrites, so the event order matters. See `EventOrder`.

use crate::timeline::{EventOrder, NoteEvent, NoteKind, order_events};

/// Number of pitch columns. Fixed by the MIDI key range.
pub const PITCHES: usize = 128;

/// Upper bound on roll length unless configured otherwise.
///
/// `build` holds three dense grids, so this is 3 x 128 bytes per tick: about 400 MB
/// per file at the limit, and that much again for every busy worker.
pub const DEFAULT_MAX_TICKS: usize = 1 << 20;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RollError {
    #[error("no notes found")]
    NoNotes,
    #[error("pitch {pitch} at tick {tick} is outside 0..=127")]
    PitchOutOfRange { pitch: u8, tick: u64 },
    #[error("roll would need {ticks} ticks, limit is {limit}")]
    TooManyTicks { ticks: u64, limit: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuildOptions {
    pub order: EventOrder,
    /// Largest number of rows a roll may have.
    pub max_ticks: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self { order: EventOrder::default(), max_ticks: DEFAULT_MAX_TICKS }
    }
}

/// Dense `rows x 128` grid of 0/1 cells, row-major.
#[derive(Clone, PartialEq, Eq)]
pub struct PianoRoll {
    rows: usize,
    cells: Vec<u8>,
}

impl PianoRoll {
    pub fn zeros(rows: usize) -> Self {
        Self { rows, cells: vec![0; rows * PITCHES] }
    }

    pub(crate) fn from_cells(rows: usize, cells: Vec<u8>) -> Self {
        debug_assert_eq!(cells.len(), rows * PITCHES);
        Self { rows, cells }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        PITCHES
    }

    /// Cell value, 0 for anything outside the grid.
    pub fn get(&self, tick: usize, pitch: usize) -> u8 {
        if tick >= self.rows || pitch >= PITCHES {
            return 0;
        }
        self.cells[tick * PITCHES + pitch]
    }

    pub fn count_nonzero(&self) -> usize {
        self.cells.iter().filter(|&&c| c != 0).count()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.cells
    }

    fn set(&mut self, tick: usize, pitch: usize) {
        self.cells[tick * PITCHES + pitch] = 1;
    }

    fn fill_column(&mut self, pitch: usize, ticks: std::ops::Range<usize>) {
        for t in ticks {
            self.cells[t * PITCHES + pitch] = 1;
        }
    }
}

impl std::fmt::Debug for PianoRoll {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PianoRoll")
            .field("rows", &self.rows)
            .field("nonzero", &self.count_nonzero())
            .finish()
    }
}

/// The three aligned grids built from one event list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PianoRolls {
    pub sustain: PianoRoll,
    pub note_on: PianoRoll,
    pub note_off: PianoRoll,
}

impl PianoRolls {
    pub fn rows(&self) -> usize {
        self.sustain.rows()
    }
}

/// Build sustain, note-on and note-off rolls from note events.
///
/// Events are put in `opts.order` first and then applied one after another. The
/// sustain column for a pitch ends up exactly as if every event had forward-filled
/// its value from its tick to the end, later events overwriting earlier ones.
///
/// Rather than doing those overlapping fills, each pitch is swept once in tick order
/// while remembering which event was applied last so far. Between two consecutive
/// event ticks the column holds the value of that event.
pub fn build(events: &[NoteEvent], opts: &BuildOptions) -> Result<PianoRolls, RollError> {
    let mut max_tick = None;
    for e in events {
        if e.pitch as usize >= PITCHES {
            return Err(RollError::PitchOutOfRange { pitch: e.pitch, tick: e.tick });
        }
        max_tick = max_tick.max(Some(e.tick));
    }
    let max_tick = max_tick.ok_or(RollError::NoNotes)?;

    let rows = usize::try_from(max_tick)
        .ok()
        .and_then(|t| t.checked_add(1))
        .filter(|&r| r <= opts.max_ticks)
        .ok_or(RollError::TooManyTicks { ticks: max_tick.saturating_add(1), limit: opts.max_ticks })?;

    let events = order_events(events.to_vec(), opts.order);

    let mut sustain = PianoRoll::zeros(rows);
    let mut note_on = PianoRoll::zeros(rows);
    let mut note_off = PianoRoll::zeros(rows);

    // (tick, applied position, turns on) per pitch
    let mut columns: Vec<Vec<(usize, usize, bool)>> = vec![Vec::new(); PITCHES];

    for (seq, e) in events.iter().enumerate() {
        let tick = e.tick as usize;
        let pitch = e.pitch as usize;
        match e.kind {
            NoteKind::On => note_on.set(tick, pitch),
            NoteKind::Off => note_off.set(tick, pitch),
        }
        columns[pitch].push((tick, seq, e.kind == NoteKind::On));
    }

    for (pitch, mut writes) in columns.into_iter().enumerate() {
        if writes.is_empty() {
            continue;
        }
        writes.sort_unstable_by_key(|&(tick, seq, _)| (tick, seq));

        // latest applied write among those at or before the current tick
        let mut last_seq = 0;
        let mut sounding = false;
        let mut i = 0;
        while i < writes.len() {
            let tick = writes[i].0;
            while i < writes.len() && writes[i].0 == tick {
                let (_, seq, on) = writes[i];
                if seq >= last_seq {
                    last_seq = seq;
                    sounding = on;
                }
                i += 1;
            }
            let until = writes.get(i).map_or(rows, |w| w.0);
            if sounding {
                sustain.fill_column(pitch, tick..until);
            }
        }
    }

    Ok(PianoRolls { sustain, note_on, note_off })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Straightforward forward-fill, applied event by event.
    fn naive_sustain(events: &[NoteEvent], rows: usize) -> PianoRoll {
        let mut cells = vec![0u8; rows * PITCHES];
        for e in events {
            let v = u8::from(e.kind == NoteKind::On);
            for t in e.tick as usize..rows {
                cells[t * PITCHES + e.pitch as usize] = v;
            }
        }
        PianoRoll::from_cells(rows, cells)
    }

    fn column(roll: &PianoRoll, pitch: usize) -> Vec<u8> {
        (0..roll.rows()).map(|t| roll.get(t, pitch)).collect()
    }

    fn track_order() -> BuildOptions {
        BuildOptions { order: EventOrder::Track, ..BuildOptions::default() }
    }

    #[test]
    fn single_note_covers_half_open_interval() {
        let rolls = build(&[NoteEvent::on(0, 60), NoteEvent::off(10, 60)], &BuildOptions::default()).unwrap();
        assert_eq!(rolls.rows(), 11);

        let col = column(&rolls.sustain, 60);
        assert!(col[0..10].iter().all(|&c| c == 1));
        assert_eq!(col[10], 0);

        assert_eq!(rolls.note_on.get(0, 60), 1);
        assert_eq!(rolls.note_off.get(10, 60), 1);
        assert_eq!(rolls.note_on.count_nonzero(), 1);
        assert_eq!(rolls.note_off.count_nonzero(), 1);
        assert_eq!(rolls.sustain.count_nonzero(), 10);
    }

    #[test]
    fn note_between_a_and_b() {
        let (a, b, p) = (4usize, 9usize, 72usize);
        let rolls = build(&[NoteEvent::on(a as u64, p as u8), NoteEvent::off(b as u64, p as u8)], &BuildOptions::default())
            .unwrap();
        for t in 0..rolls.rows() {
            let expected = u8::from(a <= t && t < b);
            assert_eq!(rolls.sustain.get(t, p), expected, "tick {t}");
        }
    }

    #[test]
    fn overlapping_note_on_is_idempotent() {
        let events = [NoteEvent::on(5, 40), NoteEvent::on(8, 40), NoteEvent::off(12, 40)];
        let rolls = build(&events, &BuildOptions::default()).unwrap();
        let col = column(&rolls.sustain, 40);
        assert_eq!(col, vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 0]);
        assert_eq!(rolls.note_on.get(5, 40), 1);
        assert_eq!(rolls.note_on.get(8, 40), 1);
        assert_eq!(rolls.note_on.count_nonzero(), 2);
    }

    #[test]
    fn unterminated_note_holds_to_the_end() {
        let events = [NoteEvent::on(2, 10), NoteEvent::on(0, 11), NoteEvent::off(6, 11)];
        let rolls = build(&events, &BuildOptions::default()).unwrap();
        assert_eq!(column(&rolls.sustain, 10), vec![0, 0, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn row_count_is_max_tick_plus_one() {
        let events = [NoteEvent::on(0, 1), NoteEvent::off(1, 1), NoteEvent::on(41, 127)];
        let rolls = build(&events, &BuildOptions::default()).unwrap();
        assert_eq!(rolls.sustain.rows(), 42);
        assert_eq!(rolls.note_on.rows(), 42);
        assert_eq!(rolls.note_off.rows(), 42);
        assert_eq!(rolls.sustain.cols(), PITCHES);
    }

    #[test]
    fn coinciding_markers_are_combined() {
        let events = [NoteEvent::on(3, 50), NoteEvent::on(3, 50), NoteEvent::off(3, 51), NoteEvent::off(3, 51)];
        let rolls = build(&events, &BuildOptions::default()).unwrap();
        assert_eq!(rolls.note_on.as_slice().iter().map(|&c| c as usize).sum::<usize>(), 1);
        assert_eq!(rolls.note_off.as_slice().iter().map(|&c| c as usize).sum::<usize>(), 1);
        assert_eq!(rolls.note_on.get(3, 50), 1);
        assert_eq!(rolls.note_off.get(3, 51), 1);
    }

    // Track A plays pitch 60 from 0 to 10. Track B, encoded after it, plays 60 from 5 to 20.
    fn cross_track_events() -> Vec<NoteEvent> {
        vec![NoteEvent::on(0, 60), NoteEvent::off(10, 60), NoteEvent::on(5, 60), NoteEvent::off(20, 60)]
    }

    #[test]
    fn track_order_lets_later_tracks_win() {
        let rolls = build(&cross_track_events(), &track_order()).unwrap();
        let col = column(&rolls.sustain, 60);
        // track B's on at 5 is applied after track A's off at 10
        assert!(col[0..20].iter().all(|&c| c == 1));
        assert_eq!(col[20], 0);
    }

    #[test]
    fn chronological_order_follows_ticks() {
        let rolls = build(&cross_track_events(), &BuildOptions::default()).unwrap();
        let col = column(&rolls.sustain, 60);
        assert!(col[0..10].iter().all(|&c| c == 1));
        assert!(col[10..].iter().all(|&c| c == 0));

        // markers do not depend on order
        let track = build(&cross_track_events(), &track_order()).unwrap();
        assert_eq!(rolls.note_on, track.note_on);
        assert_eq!(rolls.note_off, track.note_off);
    }

    #[test]
    fn retrigger_at_same_tick_uses_encoded_order() {
        // off then on at tick 4: the note keeps sounding
        let events = [NoteEvent::on(0, 30), NoteEvent::off(4, 30), NoteEvent::on(4, 30), NoteEvent::off(8, 30)];
        let rolls = build(&events, &BuildOptions::default()).unwrap();
        assert_eq!(column(&rolls.sustain, 30), vec![1, 1, 1, 1, 1, 1, 1, 1, 0]);
    }

    #[test]
    fn sweep_matches_forward_fill() {
        // small LCG so the event soup is reproducible
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = |m: u64| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) % m
        };

        for _ in 0..50 {
            let n = 1 + next(40) as usize;
            let events: Vec<NoteEvent> = (0..n)
                .map(|_| {
                    let tick = next(30);
                    let pitch = 60 + next(4) as u8;
                    if next(2) == 0 { NoteEvent::on(tick, pitch) } else { NoteEvent::off(tick, pitch) }
                })
                .collect();
            let rows = events.iter().map(|e| e.tick).max().unwrap() as usize + 1;

            for order in [EventOrder::Track, EventOrder::Chronological] {
                let rolls = build(&events, &BuildOptions { order, ..BuildOptions::default() }).unwrap();
                let expected = naive_sustain(&order_events(events.clone(), order), rows);
                assert_eq!(rolls.sustain, expected, "{order:?} {events:?}");
            }
        }
    }

    #[test]
    fn empty_input_is_no_notes() {
        assert_eq!(build(&[], &BuildOptions::default()), Err(RollError::NoNotes));
    }

    #[test]
    fn pitch_above_127_is_rejected() {
        let err = build(&[NoteEvent::on(0, 60), NoteEvent::on(7, 128)], &BuildOptions::default()).unwrap_err();
        assert_eq!(err, RollError::PitchOutOfRange { pitch: 128, tick: 7 });
    }

    #[test]
    fn tick_limit_is_enforced() {
        let opts = BuildOptions { max_ticks: 100, ..BuildOptions::default() };
        assert!(build(&[NoteEvent::on(99, 1)], &opts).is_ok());
        assert_eq!(
            build(&[NoteEvent::on(100, 1)], &opts),
            Err(RollError::TooManyTicks { ticks: 101, limit: 100 })
        );
    }

    #[test]
    fn one_far_out_tick_is_refused_by_default() {
        // the largest delta a single SMF message can carry
        let far = (1u64 << 28) - 1;
        let err = build(&[NoteEvent::on(0, 60), NoteEvent::off(far, 60)], &BuildOptions::default()).unwrap_err();
        assert_eq!(err, RollError::TooManyTicks { ticks: far + 1, limit: DEFAULT_MAX_TICKS });
    }
}
