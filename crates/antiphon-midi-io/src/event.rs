//! Raw MIDI 1.0 channel messages, incoming and outgoing.

/// MIDI channel (0-15, where 0 = channel 1)
pub type MidiChannel = u8;

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const CONTROL_CHANGE: u8 = 0xB0;
const ALL_NOTES_OFF: u8 = 123;

/// Decoded incoming message. Only the kinds the hub acts on are broken out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn {
        channel: MidiChannel,
        pitch: u8,
        velocity: u8,
    },
    NoteOff {
        channel: MidiChannel,
        pitch: u8,
    },
    ControlChange {
        channel: MidiChannel,
        control: u8,
        value: u8,
    },
    Other,
}

impl MidiMessage {
    /// Parse one message from raw bytes. Note-on with velocity 0 is a note-off.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let (&status, data) = bytes.split_first()?;
        if status < 0x80 {
            return None;
        }
        let channel = status & 0x0F;
        let msg = match (status & 0xF0, data) {
            (NOTE_ON, [pitch, 0, ..]) | (NOTE_OFF, [pitch, _, ..]) => MidiMessage::NoteOff {
                channel,
                pitch: pitch & 0x7F,
            },
            (NOTE_ON, [pitch, velocity, ..]) => MidiMessage::NoteOn {
                channel,
                pitch: pitch & 0x7F,
                velocity: velocity & 0x7F,
            },
            (CONTROL_CHANGE, [control, value, ..]) => MidiMessage::ControlChange {
                channel,
                control: control & 0x7F,
                value: value & 0x7F,
            },
            (NOTE_ON | NOTE_OFF | CONTROL_CHANGE, _) => return None,
            _ => MidiMessage::Other,
        };
        Some(msg)
    }

    #[inline]
    pub fn is_note(&self) -> bool {
        matches!(self, MidiMessage::NoteOn { .. } | MidiMessage::NoteOff { .. })
    }
}

/// Outgoing message bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiOutputMessage {
    pub bytes: Vec<u8>,
}

impl MidiOutputMessage {
    pub fn control_change(channel: u8, cc_number: u8, value: u8) -> Self {
        let channel = channel.min(15); // MIDI channels are 0-15
        Self {
            bytes: vec![CONTROL_CHANGE | channel, cc_number & 0x7F, value & 0x7F],
        }
    }

    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        let channel = channel.min(15);
        Self {
            bytes: vec![NOTE_ON | channel, note & 0x7F, velocity & 0x7F],
        }
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        let channel = channel.min(15);
        Self {
            bytes: vec![NOTE_OFF | channel, note & 0x7F, velocity & 0x7F],
        }
    }

    pub fn all_notes_off(channel: u8) -> Self {
        Self::control_change(channel, ALL_NOTES_OFF, 0)
    }

    pub fn raw(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }
}
