//! Live capture: note buffering, signal dispatch and tick iteration.

use super::HubShared;
use antiphon_core::{
    CaptureSession, MidiSignal, NoteEvent, NoteSequence, SignalCallback, SignalFlag, TickSource,
};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Upper bound on one blocking wait, so stop requests are seen promptly.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

const DRUM_CHANNEL: u8 = 9;

#[derive(Debug, Default)]
struct CaptureBuffer {
    start_time: f64,
    notes: Vec<NoteEvent>,
    /// (channel, pitch) -> (velocity, start)
    open: HashMap<(u8, u8), (u8, f64)>,
}

impl CaptureBuffer {
    fn note_on(&mut self, channel: u8, pitch: u8, velocity: u8, time: f64) {
        // Retrigger closes the sounding note first.
        self.note_off(channel, pitch, time);
        self.open.insert((channel, pitch), (velocity, time));
    }

    fn note_off(&mut self, channel: u8, pitch: u8, time: f64) {
        if let Some((velocity, start)) = self.open.remove(&(channel, pitch)) {
            if start >= self.start_time {
                self.notes.push(captured_note(channel, pitch, velocity, start, time));
            }
        }
    }

    fn set_start_time(&mut self, time: f64) {
        self.start_time = time;
        self.notes.retain(|note| note.start_time >= time);
    }

    /// Everything started in `[start_time, tick_time)`; open notes end at the tick.
    fn snapshot(&self, tick_time: f64, qpm: f64) -> NoteSequence {
        let in_window = |start: f64| start >= self.start_time && start < tick_time;
        let closed = self
            .notes
            .iter()
            .filter(|note| in_window(note.start_time))
            .map(|note| {
                let mut note = *note;
                note.end_time = note.end_time.min(tick_time);
                note
            });
        let open = self
            .open
            .iter()
            .filter(|(_, (_, start))| in_window(*start))
            .map(|(&(channel, pitch), &(velocity, start))| {
                captured_note(channel, pitch, velocity, start, tick_time)
            });

        let mut sequence = NoteSequence::from_notes(closed.chain(open), qpm);
        sequence.total_time = tick_time;
        sequence
    }
}

fn captured_note(channel: u8, pitch: u8, velocity: u8, start: f64, end: f64) -> NoteEvent {
    let note = NoteEvent::new(pitch, velocity, start, end).with_channel(channel);
    if channel == DRUM_CHANNEL {
        note.drum()
    } else {
        note
    }
}

/// State shared between a capture session and the hub's input path.
pub(crate) struct CaptureShared {
    buffer: Mutex<CaptureBuffer>,
    callbacks: Mutex<Vec<(MidiSignal, SignalCallback)>>,
    clock_signal: Option<MidiSignal>,
    tick_sender: Sender<f64>,
    stop: Arc<SignalFlag>,
}

impl CaptureShared {
    pub(crate) fn note_on(&self, channel: u8, pitch: u8, velocity: u8, time: f64) {
        self.buffer.lock().note_on(channel, pitch, velocity, time);
    }

    pub(crate) fn note_off(&self, channel: u8, pitch: u8, time: f64) {
        self.buffer.lock().note_off(channel, pitch, time);
    }

    /// Fire matching callbacks and clock ticks for an incoming control change.
    pub(crate) fn dispatch_control(&self, control: u8, value: u8, time: f64) {
        let matching: Vec<SignalCallback> = self
            .callbacks
            .lock()
            .iter()
            .filter(|(signal, _)| signal.matches(control, value))
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in matching {
            callback();
        }

        if self
            .clock_signal
            .map_or(false, |signal| signal.matches(control, value))
        {
            trace!("Clock tick at {:.3}", time);
            let _ = self.tick_sender.try_send(time);
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stop.is_raised()
    }
}

enum TickMode {
    Signal(Receiver<f64>),
    Period(f64),
}

/// Capture session backed by the hardware hub.
pub struct HardwareCapture {
    shared: Arc<CaptureShared>,
    hub: Arc<HubShared>,
    mode: TickMode,
    qpm: f64,
    session_start: f64,
    last_tick: f64,
}

impl HardwareCapture {
    pub(crate) fn start(hub: Arc<HubShared>, qpm: f64, start_time: f64, tick: TickSource) -> Self {
        let (tick_sender, tick_receiver) = bounded(64);
        let (clock_signal, mode) = match tick {
            TickSource::Signal(signal) => (Some(signal), TickMode::Signal(tick_receiver)),
            TickSource::Period(period) => (None, TickMode::Period(period)),
        };

        let shared = Arc::new(CaptureShared {
            buffer: Mutex::new(CaptureBuffer {
                start_time,
                ..Default::default()
            }),
            callbacks: Mutex::new(Vec::new()),
            clock_signal,
            tick_sender,
            stop: Arc::new(SignalFlag::new()),
        });
        hub.add_capture(Arc::clone(&shared));
        debug!("Capture started at {:.3} ({} qpm)", start_time, qpm);

        Self {
            shared,
            hub,
            mode,
            qpm,
            session_start: start_time,
            last_tick: start_time,
        }
    }

    /// First period boundary after the last tick and not before now.
    /// Boundaries missed while the caller was busy are skipped.
    fn next_boundary(&self, period: f64) -> f64 {
        let after_last = ((self.last_tick - self.session_start) / period + 1e-9).floor() + 1.0;
        let not_before_now = ((self.hub.clock.now() - self.session_start) / period - 1e-9).ceil();
        self.session_start + period * after_last.max(not_before_now)
    }

    fn wait_for_period(&self, period: f64) -> Option<f64> {
        let boundary = self.next_boundary(period);
        loop {
            if self.shared.is_stopped() {
                return None;
            }
            let wait = boundary - self.hub.clock.now();
            if wait <= 0.0 {
                return Some(boundary);
            }
            std::thread::sleep(POLL_INTERVAL.min(Duration::from_secs_f64(wait)));
        }
    }

    fn wait_for_signal(&self, ticks: &Receiver<f64>) -> Option<f64> {
        loop {
            if self.shared.is_stopped() {
                return None;
            }
            match ticks.recv_timeout(POLL_INTERVAL) {
                Ok(time) if time > self.last_tick => return Some(time),
                Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

impl CaptureSession for HardwareCapture {
    fn next_tick(&mut self) -> Option<NoteSequence> {
        let tick_time = match &self.mode {
            TickMode::Signal(ticks) => self.wait_for_signal(ticks)?,
            TickMode::Period(period) => self.wait_for_period(*period)?,
        };
        self.last_tick = tick_time;
        Some(self.shared.buffer.lock().snapshot(tick_time, self.qpm))
    }

    fn start_time(&self) -> f64 {
        self.shared.buffer.lock().start_time
    }

    fn set_start_time(&mut self, time: f64) {
        self.shared.buffer.lock().set_start_time(time);
    }

    fn register_callback(&mut self, signal: MidiSignal, callback: SignalCallback) {
        self.shared.callbacks.lock().push((signal, callback));
    }

    fn stop_handle(&self) -> Arc<SignalFlag> {
        Arc::clone(&self.shared.stop)
    }

    fn stop(&mut self) {
        self.shared.stop.raise();
        self.hub.remove_capture(&self.shared);
    }
}

impl Drop for HardwareCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
