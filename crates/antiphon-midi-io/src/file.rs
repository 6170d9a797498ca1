//! Standard MIDI File (SMF) conversion to and from note sequences.
//!
//! Used to exchange seed and response phrases with external generator
//! programs. Reads any metrical SMF (tempo changes honoured); writes a
//! single-track file at [`TICKS_PER_QUARTER`].

use crate::error::{Error, Result};
use antiphon_core::{NoteEvent, NoteSequence, DEFAULT_QPM};
use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Ticks per quarter note in written files.
pub const TICKS_PER_QUARTER: u16 = 480;

const DRUM_CHANNEL: u8 = 9;

#[derive(Debug, Clone, Copy)]
enum FileEvent {
    Tempo(u32),
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8 },
    EndOfTrack,
}

/// Load a MIDI file from disk.
pub fn read_sequence(path: impl AsRef<Path>) -> Result<NoteSequence> {
    let data = std::fs::read(path.as_ref())?;
    parse_sequence(&data)
}

/// Parse MIDI file bytes into a note sequence with times in seconds.
pub fn parse_sequence(data: &[u8]) -> Result<NoteSequence> {
    let smf = Smf::parse(data)?;

    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(tpb) => tpb.as_int(),
        Timing::Timecode(_, _) => {
            return Err(Error::MidiUnsupportedTiming);
        }
    };

    debug!(
        "Parsing MIDI file: {} tracks, {} ticks per beat",
        smf.tracks.len(),
        ticks_per_beat
    );

    // Merge all tracks on absolute ticks.
    let mut events: Vec<(u64, FileEvent)> = Vec::new();
    for track in smf.tracks.iter() {
        let mut current_tick = 0u64;
        for event in track.iter() {
            current_tick += event.delta.as_int() as u64;
            if let Some(file_event) = convert_event(&event.kind) {
                events.push((current_tick, file_event));
            }
        }
    }
    events.sort_by_key(|(tick, _)| *tick);

    let mut first_tempo = None;
    let mut us_per_quarter = 500_000u32;
    let mut last_tick = 0u64;
    let mut seconds = 0.0f64;
    let mut open: HashMap<(u8, u8), Vec<(f64, u8)>> = HashMap::new();
    let mut notes = Vec::new();

    for (tick, event) in events {
        seconds += (tick - last_tick) as f64 / ticks_per_beat as f64 * us_per_quarter as f64
            / 1_000_000.0;
        last_tick = tick;

        match event {
            FileEvent::Tempo(tempo) => {
                us_per_quarter = tempo.max(1);
                first_tempo.get_or_insert(tempo);
            }
            FileEvent::NoteOn {
                channel,
                key,
                velocity,
            } => {
                open.entry((channel, key))
                    .or_default()
                    .push((seconds, velocity));
            }
            FileEvent::NoteOff { channel, key } => {
                let started = open.get_mut(&(channel, key)).and_then(|stack| {
                    if stack.is_empty() {
                        None
                    } else {
                        Some(stack.remove(0))
                    }
                });
                if let Some((start, velocity)) = started {
                    notes.push(file_note(channel, key, velocity, start, seconds));
                }
            }
            FileEvent::EndOfTrack => {}
        }
    }

    // Unterminated notes end with the file, which lasts until its last
    // end-of-track marker.
    for ((channel, key), starts) in open {
        for (start, velocity) in starts {
            notes.push(file_note(channel, key, velocity, start, seconds));
        }
    }

    let qpm = first_tempo
        .map(|tempo| 60_000_000.0 / tempo.max(1) as f64)
        .unwrap_or(DEFAULT_QPM);
    let mut sequence = NoteSequence::from_notes(notes, qpm);
    sequence.total_time = sequence.total_time.max(seconds);

    debug!(
        "Parsed {} notes, duration: {:.2}s, qpm {:.1}",
        sequence.len(),
        sequence.total_time,
        qpm
    );

    Ok(sequence)
}

fn convert_event(kind: &TrackEventKind) -> Option<FileEvent> {
    match kind {
        TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => Some(FileEvent::Tempo(tempo.as_int())),
        TrackEventKind::Meta(MetaMessage::EndOfTrack) => Some(FileEvent::EndOfTrack),
        TrackEventKind::Midi { channel, message } => {
            let channel = channel.as_int();
            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => Some(FileEvent::NoteOn {
                    channel,
                    key: key.as_int(),
                    velocity: vel.as_int(),
                }),
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    Some(FileEvent::NoteOff {
                        channel,
                        key: key.as_int(),
                    })
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn file_note(channel: u8, key: u8, velocity: u8, start: f64, end: f64) -> NoteEvent {
    let note = NoteEvent::new(key, velocity, start, end).with_channel(channel);
    if channel == DRUM_CHANNEL {
        note.drum()
    } else {
        note
    }
}

/// Write a sequence to disk as a single-track SMF.
pub fn write_sequence(sequence: &NoteSequence, path: impl AsRef<Path>) -> Result<()> {
    let bytes = encode_sequence(sequence)?;
    std::fs::write(path.as_ref(), bytes)?;
    debug!("Wrote {} notes to {}", sequence.len(), path.as_ref().display());
    Ok(())
}

/// Encode a sequence as SMF bytes. Negative times are clamped to zero, notes
/// with `end <= start` are dropped and notes shorter than a tick last one tick.
pub fn encode_sequence(sequence: &NoteSequence) -> Result<Vec<u8>> {
    let qpm = if sequence.qpm > 0.0 {
        sequence.qpm
    } else {
        DEFAULT_QPM
    };
    let to_ticks = |seconds: f64| -> u32 {
        (seconds.max(0.0) * qpm / 60.0 * TICKS_PER_QUARTER as f64).round() as u32
    };

    // (tick, note-offs first, message)
    let mut timed: Vec<(u32, u8, u8, MidiMessage)> = Vec::with_capacity(sequence.len() * 2);
    for note in sequence.notes() {
        if note.end_time <= note.start_time {
            continue;
        }
        let channel = note.channel.min(15);
        let start_tick = to_ticks(note.start_time);
        let end_tick = to_ticks(note.end_time).max(start_tick + 1);
        timed.push((
            start_tick,
            1,
            channel,
            MidiMessage::NoteOn {
                key: u7::new(note.pitch),
                vel: u7::new(note.velocity.max(1)),
            },
        ));
        timed.push((
            end_tick,
            0,
            channel,
            MidiMessage::NoteOff {
                key: u7::new(note.pitch),
                vel: u7::new(0),
            },
        ));
    }
    timed.sort_by_key(|(tick, order, _, _)| (*tick, *order));

    let mut track = Vec::with_capacity(timed.len() + 2);
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(
            (60_000_000.0 / qpm).round() as u32,
        ))),
    });

    let mut current_tick = 0u32;
    for (tick, _, channel, message) in timed {
        track.push(TrackEvent {
            delta: u28::new(tick - current_tick),
            kind: TrackEventKind::Midi {
                channel: u4::new(channel),
                message,
            },
        });
        current_tick = tick;
    }

    let end_tick = to_ticks(sequence.total_time).max(current_tick);
    track.push(TrackEvent {
        delta: u28::new(end_tick - current_tick),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let mut smf = Smf::new(Header::new(
        Format::SingleTrack,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));
    smf.tracks.push(track);

    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn phrase() -> NoteSequence {
        NoteSequence::from_notes(
            vec![
                NoteEvent::new(60, 100, 0.0, 0.5),
                NoteEvent::new(64, 90, 0.5, 1.0),
                NoteEvent::new(36, 110, 0.0, 0.25).with_channel(9).drum(),
            ],
            120.0,
        )
    }

    #[test]
    fn test_encode_then_parse_preserves_timing() {
        let bytes = encode_sequence(&phrase()).unwrap();
        let parsed = parse_sequence(&bytes).unwrap();

        assert_eq!(parsed.len(), 3);
        assert_relative_eq!(parsed.qpm, 120.0, epsilon = 1e-6);
        let e4 = parsed.notes().iter().find(|n| n.pitch == 64).unwrap();
        assert_relative_eq!(e4.start_time, 0.5, epsilon = 1e-3);
        assert_relative_eq!(e4.end_time, 1.0, epsilon = 1e-3);
        let kick = parsed.notes().iter().find(|n| n.pitch == 36).unwrap();
        assert!(kick.is_drum);
        assert_eq!(kick.channel, 9);
    }

    #[test]
    fn test_tempo_changes_scale_seconds() {
        let seq = NoteSequence::from_notes(vec![NoteEvent::new(60, 100, 0.0, 1.0)], 60.0);
        let parsed = parse_sequence(&encode_sequence(&seq).unwrap()).unwrap();
        assert_relative_eq!(parsed.qpm, 60.0, epsilon = 1e-6);
        assert_relative_eq!(parsed.notes()[0].end_time, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_total_time_kept() {
        let mut seq = phrase();
        seq.total_time = 4.0;
        let parsed = parse_sequence(&encode_sequence(&seq).unwrap()).unwrap();
        assert_relative_eq!(parsed.total_time, 4.0, epsilon = 1e-3);
    }

    #[test]
    fn test_short_notes_keep_their_length() {
        let mut seq = NoteSequence::from_notes(
            vec![
                NoteEvent::new(60, 100, 1.0, 1.0),
                NoteEvent::new(62, 100, 1.0, 1.0001),
                NoteEvent::new(64, 100, 1.0, 1.5),
            ],
            120.0,
        );
        seq.total_time = 3.0;
        let parsed = parse_sequence(&encode_sequence(&seq).unwrap()).unwrap();

        let pitches: Vec<u8> = parsed.notes().iter().map(|n| n.pitch).collect();
        assert!(!pitches.contains(&60));
        let short = parsed.notes().iter().find(|n| n.pitch == 62).unwrap();
        assert!(short.end_time < 1.01);
        assert!(short.end_time > short.start_time);
        let long = parsed.notes().iter().find(|n| n.pitch == 64).unwrap();
        assert_relative_eq!(long.end_time, 1.5, epsilon = 1e-3);
        assert_relative_eq!(parsed.total_time, 3.0, epsilon = 1e-3);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phrase.mid");
        write_sequence(&phrase(), &path).unwrap();
        assert_eq!(read_sequence(&path).unwrap().len(), 3);
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(matches!(
            parse_sequence(b"not a midi file"),
            Err(Error::MidiFileParse(_))
        ));
    }
}
