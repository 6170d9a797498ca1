//! Scripted collaborators for interaction tests.
//!
//! The hub never touches MIDI ports. Notes are queued with
//! [`ScriptedHub::play_note`], control changes with
//! [`ScriptedHub::set_control`], and each tick is delivered by
//! [`ScriptedHub::tick`], which blocks until the interaction has finished
//! processing it and asked for the next one. Time comes from a
//! [`ManualClock`], so every run is deterministic.

#![allow(dead_code)]

use antiphon::prelude::*;
use antiphon::{
    CaptureSession, ControlNumber, GeneratorError, GeneratorOptions, ManualClock, PlaybackSession,
    SignalFlag,
};
use antiphon::core::{Result as CoreResult, SignalCallback};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

/// Notes played so far and the capture window start.
#[derive(Default)]
struct ScriptedInput {
    notes: Vec<NoteEvent>,
    start_time: f64,
}

impl ScriptedInput {
    /// Notes starting in `[start_time, tick)`, open ends clamped to the tick.
    fn snapshot(&self, tick: f64) -> NoteSequence {
        let notes = self
            .notes
            .iter()
            .filter(|n| n.start_time >= self.start_time && n.start_time < tick)
            .map(|n| NoteEvent::new(n.pitch, n.velocity, n.start_time, n.end_time.min(tick)));
        let mut sequence = NoteSequence::from_notes(notes, 120.0);
        sequence.total_time = tick;
        sequence
    }
}

#[derive(Default)]
pub struct PlaybackLog {
    pub initial: Option<NoteSequence>,
    pub updates: Vec<(NoteSequence, Option<f64>)>,
    pub stopped: bool,
}

#[derive(Default)]
pub struct MetronomeLog {
    pub starts: Vec<(f64, f64, u8)>,
    pub stopped: bool,
}

pub struct ScriptedHub {
    pub clock: Arc<ManualClock>,
    input: Arc<Mutex<ScriptedInput>>,
    callbacks: Arc<Mutex<Vec<(MidiSignal, SignalCallback)>>>,
    control_values: Mutex<HashMap<ControlNumber, u8>>,
    sent: Mutex<Vec<(ControlNumber, u8)>>,
    playback: Arc<Mutex<PlaybackLog>>,
    metronome: Mutex<MetronomeLog>,
    capture_stopped: Arc<SignalFlag>,
    tick_tx: Sender<f64>,
    tick_rx: Receiver<f64>,
    ready_tx: Sender<()>,
    ready_rx: Receiver<()>,
}

impl ScriptedHub {
    pub fn new() -> Arc<Self> {
        let (tick_tx, tick_rx) = unbounded();
        let (ready_tx, ready_rx) = unbounded();
        Arc::new(Self {
            clock: Arc::new(ManualClock::new(0.0)),
            input: Arc::new(Mutex::new(ScriptedInput::default())),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            control_values: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            playback: Arc::new(Mutex::new(PlaybackLog::default())),
            metronome: Mutex::new(MetronomeLog::default()),
            capture_stopped: Arc::new(SignalFlag::new()),
            tick_tx,
            tick_rx,
            ready_tx,
            ready_rx,
        })
    }

    pub fn play_note(&self, pitch: u8, start: f64, end: f64) {
        self.input
            .lock()
            .notes
            .push(NoteEvent::new(pitch, 100, start, end));
    }

    /// Receive a control change: store its value and fire matching callbacks.
    pub fn set_control(&self, control: ControlNumber, value: u8) {
        self.control_values.lock().insert(control, value);
        let callbacks: Vec<SignalCallback> = self
            .callbacks
            .lock()
            .iter()
            .filter(|(signal, _)| signal.matches(control, value))
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback();
        }
    }

    /// Block until the interaction waits for a tick.
    pub fn wait_ready(&self) {
        self.ready_rx
            .recv_timeout(WAIT)
            .expect("interaction did not ask for a tick");
    }

    /// Deliver the tick at `time` and wait until it has been processed.
    pub fn tick(&self, time: f64) {
        self.clock.set(time);
        self.tick_tx.send(time).unwrap();
        self.wait_ready();
    }

    pub fn capture_start(&self) -> f64 {
        self.input.lock().start_time
    }

    pub fn updates(&self) -> Vec<(NoteSequence, Option<f64>)> {
        self.playback.lock().updates.clone()
    }

    pub fn last_update(&self) -> (NoteSequence, Option<f64>) {
        self.updates().pop().expect("no playback update")
    }

    pub fn playback_stopped(&self) -> bool {
        self.playback.lock().stopped
    }

    pub fn capture_stopped(&self) -> bool {
        self.capture_stopped.is_raised()
    }

    pub fn sent_controls(&self) -> Vec<(ControlNumber, u8)> {
        self.sent.lock().clone()
    }

    pub fn metronome_starts(&self) -> Vec<(f64, f64, u8)> {
        self.metronome.lock().starts.clone()
    }

    pub fn metronome_stopped(&self) -> bool {
        self.metronome.lock().stopped
    }
}

impl MidiHub for ScriptedHub {
    fn start_capture(
        &self,
        _qpm: f64,
        start_time: f64,
        _tick: TickSource,
    ) -> CoreResult<Box<dyn CaptureSession>> {
        self.input.lock().start_time = start_time;
        Ok(Box::new(ScriptedCapture {
            input: Arc::clone(&self.input),
            callbacks: Arc::clone(&self.callbacks),
            ticks: self.tick_rx.clone(),
            ready: self.ready_tx.clone(),
            stop: Arc::new(SignalFlag::new()),
            stopped: Arc::clone(&self.capture_stopped),
        }))
    }

    fn start_playback(&self, sequence: &NoteSequence) -> CoreResult<Box<dyn PlaybackSession>> {
        self.playback.lock().initial = Some(sequence.clone());
        Ok(Box::new(ScriptedPlayback {
            log: Arc::clone(&self.playback),
        }))
    }

    fn control_value(&self, control: ControlNumber) -> Option<u8> {
        self.control_values.lock().get(&control).copied()
    }

    fn send_control_change(&self, control: ControlNumber, value: u8) {
        self.sent.lock().push((control, value));
    }

    fn start_metronome(&self, qpm: f64, start_time: f64, channel: u8) {
        self.metronome.lock().starts.push((qpm, start_time, channel));
    }

    fn stop_metronome(&self) {
        self.metronome.lock().stopped = true;
    }
}

struct ScriptedCapture {
    input: Arc<Mutex<ScriptedInput>>,
    callbacks: Arc<Mutex<Vec<(MidiSignal, SignalCallback)>>>,
    ticks: Receiver<f64>,
    ready: Sender<()>,
    stop: Arc<SignalFlag>,
    stopped: Arc<SignalFlag>,
}

impl CaptureSession for ScriptedCapture {
    fn next_tick(&mut self) -> Option<NoteSequence> {
        let _ = self.ready.send(());
        loop {
            if self.stop.is_raised() {
                return None;
            }
            match self.ticks.recv_timeout(Duration::from_millis(5)) {
                Ok(tick) => return Some(self.input.lock().snapshot(tick)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn start_time(&self) -> f64 {
        self.input.lock().start_time
    }

    fn set_start_time(&mut self, time: f64) {
        self.input.lock().start_time = time;
    }

    fn register_callback(&mut self, signal: MidiSignal, callback: SignalCallback) {
        self.callbacks.lock().push((signal, callback));
    }

    fn stop_handle(&self) -> Arc<SignalFlag> {
        Arc::clone(&self.stop)
    }

    fn stop(&mut self) {
        self.stop.raise();
        self.stopped.raise();
    }
}

struct ScriptedPlayback {
    log: Arc<Mutex<PlaybackLog>>,
}

impl PlaybackSession for ScriptedPlayback {
    fn update_sequence(&mut self, sequence: &NoteSequence, start_time: Option<f64>) {
        self.log.lock().updates.push((sequence.clone(), start_time));
    }

    fn stop(&mut self) {
        self.log.lock().stopped = true;
    }
}

pub type GeneratorCalls = Arc<Mutex<Vec<(NoteSequence, GeneratorOptions)>>>;

enum Reply {
    Echo(EchoGenerator),
    Fixed(NoteSequence),
    Fail,
}

/// Generator that records its calls and can simulate latency or failure.
pub struct ScriptedGenerator {
    calls: GeneratorCalls,
    reply: Reply,
    latency: Option<(Arc<ManualClock>, f64)>,
    sleep: Duration,
}

impl ScriptedGenerator {
    /// Echoes the call phrase back.
    pub fn echo() -> (Self, GeneratorCalls) {
        Self::with_reply(Reply::Echo(EchoGenerator::new()))
    }

    /// Returns `sequence` (0-based) regardless of the request.
    pub fn fixed(sequence: NoteSequence) -> (Self, GeneratorCalls) {
        Self::with_reply(Reply::Fixed(sequence))
    }

    pub fn failing() -> (Self, GeneratorCalls) {
        Self::with_reply(Reply::Fail)
    }

    fn with_reply(reply: Reply) -> (Self, GeneratorCalls) {
        let calls = GeneratorCalls::default();
        (
            Self {
                calls: Arc::clone(&calls),
                reply,
                latency: None,
                sleep: Duration::ZERO,
            },
            calls,
        )
    }

    /// Advance `clock` by `seconds` during every call.
    pub fn with_latency(mut self, clock: Arc<ManualClock>, seconds: f64) -> Self {
        self.latency = Some((clock, seconds));
        self
    }

    /// Block for `duration` of real time during every call.
    pub fn sleeping(mut self, duration: Duration) -> Self {
        self.sleep = duration;
        self
    }
}

impl SequenceGenerator for ScriptedGenerator {
    fn id(&self) -> &str {
        "scripted"
    }

    fn generate(
        &mut self,
        input: &NoteSequence,
        options: &GeneratorOptions,
    ) -> Result<NoteSequence, GeneratorError> {
        self.calls.lock().push((input.clone(), *options));
        std::thread::sleep(self.sleep);
        if let Some((clock, seconds)) = &self.latency {
            clock.advance(*seconds);
        }
        match &mut self.reply {
            Reply::Echo(echo) => echo.generate(input, options),
            Reply::Fixed(sequence) => Ok(sequence.clone()),
            Reply::Fail => Err(GeneratorError::Failed("scripted failure".to_string())),
        }
    }
}
