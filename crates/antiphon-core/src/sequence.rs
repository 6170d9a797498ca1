//! Time-ordered note sequences.
//!
//! Operations never mutate in place: shifting, transposing and trimming all
//! return a new sequence so a response handed to playback stays untouched.

use crate::note::NoteEvent;
use serde::{Deserialize, Serialize};

/// Default tempo in quarters per minute.
pub const DEFAULT_QPM: f64 = 120.0;

/// Ordered collection of notes plus a total duration and tempo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteSequence {
    notes: Vec<NoteEvent>,
    /// End of the sequence in seconds on the absolute timeline.
    pub total_time: f64,
    /// Quarters per minute.
    pub qpm: f64,
}

impl Default for NoteSequence {
    fn default() -> Self {
        Self::new(DEFAULT_QPM)
    }
}

impl NoteSequence {
    pub fn new(qpm: f64) -> Self {
        Self {
            notes: Vec::new(),
            total_time: 0.0,
            qpm,
        }
    }

    /// Build from arbitrary notes; they are sorted by start time.
    pub fn from_notes(notes: impl IntoIterator<Item = NoteEvent>, qpm: f64) -> Self {
        let mut seq = Self::new(qpm);
        for note in notes {
            seq.push(note);
        }
        seq
    }

    /// Insert a note keeping start-time order. Extends `total_time` if needed.
    pub fn push(&mut self, note: NoteEvent) {
        let idx = self
            .notes
            .partition_point(|n| n.start_time <= note.start_time);
        self.notes.insert(idx, note);
        if note.end_time > self.total_time {
            self.total_time = note.end_time;
        }
    }

    #[inline]
    pub fn notes(&self) -> &[NoteEvent] {
        &self.notes
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Latest end time of any note, or 0.0 for an empty sequence.
    pub fn last_end_time(&self) -> f64 {
        self.notes
            .iter()
            .map(|n| n.end_time)
            .fold(0.0_f64, f64::max)
    }

    /// Earliest start time, if any.
    pub fn first_start_time(&self) -> Option<f64> {
        self.notes.first().map(|n| n.start_time)
    }

    /// Offset every note and `total_time` by `delta` seconds.
    pub fn shifted(&self, delta: f64) -> Self {
        Self {
            notes: self.notes.iter().map(|n| n.shifted(delta)).collect(),
            total_time: self.total_time + delta,
            qpm: self.qpm,
        }
    }

    /// Pitch shift every non-drum note.
    pub fn transposed(&self, semitones: i16) -> Self {
        Self {
            notes: self.notes.iter().map(|n| n.transposed(semitones)).collect(),
            total_time: self.total_time,
            qpm: self.qpm,
        }
    }

    /// Keep notes starting in `[start, end)`, truncating their ends to `end`.
    ///
    /// Times are not re-zeroed. `total_time` becomes `min(total_time, end)`.
    pub fn trimmed(&self, start: f64, end: f64) -> Self {
        let notes = self
            .notes
            .iter()
            .filter(|n| n.start_time >= start && n.start_time < end)
            .map(|n| NoteEvent {
                end_time: n.end_time.min(end),
                ..*n
            })
            .collect();
        Self {
            notes,
            total_time: self.total_time.min(end),
            qpm: self.qpm,
        }
    }

    /// Trim to `[start, end)` and move the window to begin at zero.
    pub fn extract_window(&self, start: f64, end: f64) -> Self {
        let mut window = self.trimmed(start, end).shifted(-start);
        window.total_time = window.total_time.max(0.0);
        window
    }

    /// Append `other` after this sequence; its notes are offset by `self.total_time`.
    pub fn concat(&self, other: &NoteSequence) -> Self {
        let mut out = self.clone();
        for note in other.notes() {
            out.push(note.shifted(self.total_time));
        }
        out.total_time = self.total_time + other.total_time;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn phrase() -> NoteSequence {
        NoteSequence::from_notes(
            [
                NoteEvent::new(60, 100, 0.0, 0.5),
                NoteEvent::new(64, 100, 0.5, 1.5),
                NoteEvent::new(67, 100, 1.5, 2.5),
            ],
            120.0,
        )
    }

    #[test]
    fn test_push_keeps_order() {
        let mut seq = NoteSequence::default();
        seq.push(NoteEvent::new(64, 90, 1.0, 2.0));
        seq.push(NoteEvent::new(60, 90, 0.0, 0.5));
        assert_eq!(seq.notes()[0].pitch, 60);
        assert_eq!(seq.total_time, 2.0);
    }

    #[test]
    fn test_shift_moves_total_time() {
        let seq = phrase().shifted(4.0);
        assert_eq!(seq.notes()[0].start_time, 4.0);
        assert_relative_eq!(seq.total_time, 6.5);
    }

    #[test]
    fn test_trim_drops_and_truncates() {
        let seq = phrase().trimmed(0.5, 2.0);
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.notes()[0].pitch, 64);
        assert_eq!(seq.notes()[1].end_time, 2.0);
        assert_eq!(seq.total_time, 2.0);
    }

    #[test]
    fn test_trim_window_bounds_hold() {
        let (a, b) = (0.25, 1.75);
        let seq = phrase().trimmed(a, b);
        for note in seq.notes() {
            assert!(note.start_time >= a);
            assert!(note.end_time <= b);
        }
        let span = seq.last_end_time() - seq.first_start_time().unwrap_or(a);
        assert!(span <= b - a);
        assert!(seq.total_time <= b);
    }

    #[test]
    fn test_extract_window_rezeroes() {
        let seq = phrase().extract_window(0.5, 2.5);
        assert_eq!(seq.notes()[0].start_time, 0.0);
        assert_relative_eq!(seq.total_time, 2.0);
    }

    #[test]
    fn test_concat_offsets_second() {
        let seq = phrase().concat(&phrase());
        assert_eq!(seq.len(), 6);
        assert_relative_eq!(seq.notes()[3].start_time, 2.5);
        assert_relative_eq!(seq.total_time, 5.0);
    }

    #[test]
    fn test_last_end_time_empty() {
        assert_eq!(NoteSequence::default().last_end_time(), 0.0);
    }
}
