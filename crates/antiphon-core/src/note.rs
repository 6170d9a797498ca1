//! A single captured or generated note.

use serde::{Deserialize, Serialize};

/// Highest MIDI pitch.
pub const MAX_PITCH: u8 = 127;

/// A note with absolute start/end times in seconds.
///
/// Times share the timeline of the [`WallClock`](crate::WallClock) that
/// produced them. Notes are never edited in place once captured; use the
/// shifting helpers on [`NoteSequence`](crate::NoteSequence) instead.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch: u8,
    pub velocity: u8,
    pub start_time: f64,
    pub end_time: f64,
    /// MIDI channel (0-15)
    #[serde(default)]
    pub channel: u8,
    #[serde(default)]
    pub is_drum: bool,
}

impl NoteEvent {
    pub fn new(pitch: u8, velocity: u8, start_time: f64, end_time: f64) -> Self {
        Self {
            pitch: pitch.min(MAX_PITCH),
            velocity: velocity.min(127),
            start_time,
            end_time,
            channel: 0,
            is_drum: false,
        }
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel.min(15);
        self
    }

    pub fn drum(mut self) -> Self {
        self.is_drum = true;
        self
    }

    #[inline]
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    #[inline]
    pub fn shifted(&self, delta: f64) -> Self {
        Self {
            start_time: self.start_time + delta,
            end_time: self.end_time + delta,
            ..*self
        }
    }

    /// Pitch shift, clamped to the MIDI range. Drum notes are left alone.
    pub fn transposed(&self, semitones: i16) -> Self {
        if self.is_drum {
            return *self;
        }
        let pitch = (self.pitch as i16 + semitones).clamp(0, MAX_PITCH as i16) as u8;
        Self { pitch, ..*self }
    }
}
