//! Scheduled playback of a replaceable note sequence on a dedicated thread.

use super::MidiSink;
use crate::event::MidiOutputMessage;
use antiphon_core::{NoteSequence, PlaybackSession, WallClock};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq)]
struct ScheduledEvent {
    time: f64,
    pitch: u8,
    /// `None` for note off.
    velocity: Option<u8>,
}

/// Open note count per pitch. Overlapping notes of one pitch share a single
/// note off, sent when the last of them ends.
#[derive(Debug)]
struct SoundingNotes([u16; 128]);

impl Default for SoundingNotes {
    fn default() -> Self {
        Self([0; 128])
    }
}

impl SoundingNotes {
    fn note_on(&mut self, pitch: u8) {
        let count = &mut self.0[pitch as usize & 0x7F];
        *count = count.saturating_add(1);
    }

    /// Returns `true` when the pitch is now silent and needs a note off.
    fn note_off(&mut self, pitch: u8) -> bool {
        let count = &mut self.0[pitch as usize & 0x7F];
        match *count {
            0 => false,
            1 => {
                *count = 0;
                true
            }
            _ => {
                *count -= 1;
                false
            }
        }
    }

    /// Forget every sounding pitch, returning them in ascending order.
    fn drain(&mut self) -> Vec<u8> {
        let pitches = (0..128u8).filter(|&p| self.0[p as usize] > 0).collect();
        self.0 = [0; 128];
        pitches
    }
}

enum PlayerCommand {
    Update(Vec<ScheduledEvent>),
    Stop,
}

/// Note on/off events for every note starting at or after `cutoff`, shifted
/// by `offset` and ordered with note offs first at equal times.
fn schedule(sequence: &NoteSequence, cutoff: f64, offset: f64) -> Vec<ScheduledEvent> {
    let mut events: Vec<ScheduledEvent> = sequence
        .notes()
        .iter()
        .filter(|note| note.start_time >= cutoff)
        .flat_map(|note| {
            [
                ScheduledEvent {
                    time: note.start_time + offset,
                    pitch: note.pitch,
                    velocity: Some(note.velocity),
                },
                ScheduledEvent {
                    time: note.end_time + offset,
                    pitch: note.pitch,
                    velocity: None,
                },
            ]
        })
        .collect();
    events.sort_by(|a, b| {
        a.time
            .total_cmp(&b.time)
            .then(a.velocity.is_some().cmp(&b.velocity.is_some()))
    });
    events
}

/// Playback session driving the hub's outputs.
pub struct HardwarePlayback {
    commands: Sender<PlayerCommand>,
    handle: Option<JoinHandle<()>>,
    clock: Arc<dyn WallClock>,
    offset: f64,
}

impl HardwarePlayback {
    pub(crate) fn start(
        sink: Arc<dyn MidiSink>,
        clock: Arc<dyn WallClock>,
        channel: u8,
        offset: f64,
        sequence: &NoteSequence,
    ) -> std::io::Result<Self> {
        let (commands, receiver) = unbounded();
        let thread_clock = Arc::clone(&clock);
        let handle = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || Self::playback_thread(receiver, sink, thread_clock, channel))?;

        let mut playback = Self {
            commands,
            handle: Some(handle),
            clock,
            offset,
        };
        playback.update_sequence(sequence, None);
        Ok(playback)
    }

    fn playback_thread(
        receiver: Receiver<PlayerCommand>,
        sink: Arc<dyn MidiSink>,
        clock: Arc<dyn WallClock>,
        channel: u8,
    ) {
        let mut pending: VecDeque<ScheduledEvent> = VecDeque::new();
        let mut sounding = SoundingNotes::default();

        let silence = |sounding: &mut SoundingNotes| {
            for pitch in sounding.drain() {
                sink.send(&MidiOutputMessage::note_off(channel, pitch, 0));
            }
        };

        loop {
            let now = clock.now();
            while let Some(event) = pending.front().copied() {
                if event.time > now {
                    break;
                }
                pending.pop_front();
                match event.velocity {
                    Some(velocity) => {
                        sink.send(&MidiOutputMessage::note_on(channel, event.pitch, velocity));
                        sounding.note_on(event.pitch);
                    }
                    None => {
                        if sounding.note_off(event.pitch) {
                            sink.send(&MidiOutputMessage::note_off(channel, event.pitch, 0));
                        }
                    }
                }
            }

            let wait = pending
                .front()
                .map(|event| Duration::from_secs_f64((event.time - now).max(0.0)))
                .map_or(POLL_INTERVAL, |wait| wait.min(POLL_INTERVAL));

            match receiver.recv_timeout(wait) {
                Ok(PlayerCommand::Update(events)) => {
                    silence(&mut sounding);
                    pending = events.into();
                }
                Ok(PlayerCommand::Stop) | Err(RecvTimeoutError::Disconnected) => {
                    silence(&mut sounding);
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        debug!("Playback thread exited");
    }
}

impl PlaybackSession for HardwarePlayback {
    fn update_sequence(&mut self, sequence: &NoteSequence, start_time: Option<f64>) {
        let cutoff = start_time.unwrap_or_else(|| self.clock.now());
        let events = schedule(sequence, cutoff, self.offset);
        debug!(
            "Playback update: {} events from {:.3}",
            events.len(),
            cutoff
        );
        if self.commands.send(PlayerCommand::Update(events)).is_err() {
            warn!("Playback thread is gone; update dropped");
        }
    }

    fn stop(&mut self) {
        let _ = self.commands.send(PlayerCommand::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HardwarePlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use antiphon_core::NoteEvent;

    #[test]
    fn test_schedule_strips_events_before_cutoff() {
        let sequence = NoteSequence::from_notes(
            vec![
                NoteEvent::new(60, 100, 0.0, 1.0),
                NoteEvent::new(62, 100, 2.0, 3.0),
            ],
            120.0,
        );
        let events = schedule(&sequence, 1.0, 0.0);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].pitch, 62);
        assert_eq!(events[0].time, 2.0);
    }

    #[test]
    fn test_schedule_offsets_and_orders_offs_first() {
        let sequence = NoteSequence::from_notes(
            vec![
                NoteEvent::new(60, 100, 0.0, 1.0),
                NoteEvent::new(62, 90, 1.0, 2.0),
            ],
            120.0,
        );
        let events = schedule(&sequence, 0.0, 0.5);
        let times: Vec<f64> = events.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0.5, 1.5, 1.5, 2.5]);
        assert_eq!(events[1].velocity, None);
        assert_eq!(events[2].velocity, Some(90));
    }

    #[test]
    fn test_overlapping_same_pitch_keeps_sounding() {
        let mut sounding = SoundingNotes::default();
        sounding.note_on(60);
        sounding.note_on(60);
        assert!(!sounding.note_off(60));
        assert!(sounding.note_off(60));
        assert!(!sounding.note_off(60));
    }

    #[test]
    fn test_drain_silences_each_pitch_once() {
        let mut sounding = SoundingNotes::default();
        sounding.note_on(64);
        sounding.note_on(60);
        sounding.note_on(60);
        assert_eq!(sounding.drain(), vec![60, 64]);
        assert!(sounding.drain().is_empty());
        assert!(!sounding.note_off(60));
    }
}
