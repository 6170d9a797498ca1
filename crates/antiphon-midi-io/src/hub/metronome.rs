//! Click track on a MIDI channel, one click per quarter note with an accent
//! on the first beat of every bar.

use super::MidiSink;
use crate::event::MidiOutputMessage;
use antiphon_core::WallClock;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const ACCENT_PITCH: u8 = 44;
const CLICK_PITCH: u8 = 35;
const CLICK_VELOCITY: u8 = 64;
const CLICK_DURATION: f64 = 0.05;
const BEATS_PER_BAR: u32 = 4;
/// Retuning onto a beat that just clicked must not double it.
const MIN_CLICK_GAP: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
struct MetronomeSettings {
    qpm: f64,
    start_time: f64,
    channel: u8,
}

/// Beat-crossing detection.
#[derive(Debug)]
struct ClickTracker {
    last_click_beat: i64,
    accent_every: u32,
}

impl ClickTracker {
    fn new(accent_every: u32) -> Self {
        Self {
            last_click_beat: -1,
            accent_every,
        }
    }

    /// True once per integer beat.
    fn update(&mut self, beat: f64) -> bool {
        let current_beat_int = beat.floor() as i64;
        if current_beat_int > self.last_click_beat {
            self.last_click_beat = current_beat_int;
            true
        } else {
            false
        }
    }

    fn is_accent_beat(&self, beat: f64) -> bool {
        if self.accent_every == 0 {
            return false;
        }
        (beat.floor() as i64).rem_euclid(self.accent_every as i64) == 0
    }

    fn reset(&mut self) {
        self.last_click_beat = -1;
    }
}

enum MetronomeCommand {
    Start(MetronomeSettings),
    Stop,
    Shutdown,
}

pub(crate) struct Metronome {
    commands: Sender<MetronomeCommand>,
    handle: Option<JoinHandle<()>>,
}

impl Metronome {
    pub(crate) fn spawn(sink: Arc<dyn MidiSink>, clock: Arc<dyn WallClock>) -> std::io::Result<Self> {
        let (commands, receiver) = unbounded();
        let handle = thread::Builder::new()
            .name("metronome".to_string())
            .spawn(move || Self::metronome_thread(receiver, sink, clock))?;
        Ok(Self {
            commands,
            handle: Some(handle),
        })
    }

    pub(crate) fn start(&self, qpm: f64, start_time: f64, channel: u8) {
        let _ = self.commands.send(MetronomeCommand::Start(MetronomeSettings {
            qpm,
            start_time,
            channel,
        }));
    }

    pub(crate) fn stop(&self) {
        let _ = self.commands.send(MetronomeCommand::Stop);
    }

    fn metronome_thread(
        receiver: Receiver<MetronomeCommand>,
        sink: Arc<dyn MidiSink>,
        clock: Arc<dyn WallClock>,
    ) {
        let mut settings: Option<MetronomeSettings> = None;
        let mut tracker = ClickTracker::new(BEATS_PER_BAR);
        let mut last_click_time = f64::NEG_INFINITY;
        // (off time, channel, pitch)
        let mut pending_off: Option<(f64, u8, u8)> = None;

        loop {
            let now = clock.now();

            if let Some((off_time, channel, pitch)) = pending_off {
                if off_time <= now {
                    sink.send(&MidiOutputMessage::note_off(channel, pitch, 0));
                    pending_off = None;
                }
            }

            if let Some(current) = settings {
                let beat = (now - current.start_time) * current.qpm / 60.0;
                if beat >= 0.0 && tracker.update(beat) && now - last_click_time >= MIN_CLICK_GAP {
                    let pitch = if tracker.is_accent_beat(beat) {
                        ACCENT_PITCH
                    } else {
                        CLICK_PITCH
                    };
                    if let Some((_, channel, pitch)) = pending_off.take() {
                        sink.send(&MidiOutputMessage::note_off(channel, pitch, 0));
                    }
                    sink.send(&MidiOutputMessage::note_on(current.channel, pitch, CLICK_VELOCITY));
                    pending_off = Some((now + CLICK_DURATION, current.channel, pitch));
                    last_click_time = now;
                }
            }

            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(MetronomeCommand::Start(new_settings)) => {
                    if settings != Some(new_settings) {
                        debug!(
                            "Metronome at {:.1} qpm from {:.3}",
                            new_settings.qpm, new_settings.start_time
                        );
                        settings = Some(new_settings);
                        tracker.reset();
                    }
                }
                Ok(MetronomeCommand::Stop) => {
                    settings = None;
                    tracker.reset();
                }
                Ok(MetronomeCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        if let Some((_, channel, pitch)) = pending_off {
            sink.send(&MidiOutputMessage::note_off(channel, pitch, 0));
        }
    }
}

impl Drop for Metronome {
    fn drop(&mut self) {
        let _ = self.commands.send(MetronomeCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beat_detection() {
        let mut tracker = ClickTracker::new(4);

        // First beat should trigger
        assert!(tracker.update(0.0));

        // Same beat shouldn't retrigger
        assert!(!tracker.update(0.5));

        // Next beat should trigger
        assert!(tracker.update(1.0));

        tracker.reset();
        assert!(tracker.update(1.2));
    }

    #[test]
    fn test_accent_beats() {
        let tracker = ClickTracker::new(4);
        assert!(tracker.is_accent_beat(0.0));
        assert!(!tracker.is_accent_beat(1.0));
        assert!(!tracker.is_accent_beat(3.9));
        assert!(tracker.is_accent_beat(4.0));
        assert!(!ClickTracker::new(0).is_accent_beat(0.0));
    }
}
