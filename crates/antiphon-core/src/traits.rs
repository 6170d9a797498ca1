//! Contracts for the collaborators the interaction engine drives.
//!
//! The engine never talks to MIDI ports, models or clocks directly. A hub
//! supplies capture, playback, metronome and control lookup; a generator turns
//! a seed sequence into a response. Hardware and scripted implementations live
//! in other crates.

use crate::control::ControlNumber;
use crate::error::{GeneratorError, Result};
use crate::lockfree::SignalFlag;
use crate::sequence::NoteSequence;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Control-change trigger: a control number, optionally with an exact value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MidiSignal {
    pub control: ControlNumber,
    /// `None` matches any value.
    pub value: Option<u8>,
}

impl MidiSignal {
    /// Fires when `control` is sent with value 127.
    pub fn control(control: ControlNumber) -> Self {
        Self {
            control,
            value: Some(127),
        }
    }

    #[inline]
    pub fn matches(&self, control: ControlNumber, value: u8) -> bool {
        self.control == control && self.value.map_or(true, |v| v == value)
    }
}

/// Where tick boundaries come from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickSource {
    /// External clock control change.
    Signal(MidiSignal),
    /// Fixed wall-clock period in seconds.
    Period(f64),
}

/// Half-open time window `[start, end)` in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

impl TimeWindow {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Directives handed to a generator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneratorOptions {
    /// Section of the input used as the seed.
    pub input: TimeWindow,
    /// Section the generator must fill.
    pub generate: TimeWindow,
    /// Softmax temperature.
    pub temperature: f64,
}

/// Opaque sequence generator.
///
/// Latency is unbounded and non-deterministic. The output is not trusted to
/// respect `options.generate`; callers trim it.
pub trait SequenceGenerator: Send {
    fn id(&self) -> &str;

    fn generate(
        &mut self,
        input: &NoteSequence,
        options: &GeneratorOptions,
    ) -> std::result::Result<NoteSequence, GeneratorError>;
}

/// Edge-triggered callback registered on a capture session.
pub type SignalCallback = Arc<dyn Fn() + Send + Sync>;

/// Live input capture iterated one tick at a time.
pub trait CaptureSession: Send {
    /// Block until the next tick boundary and return everything captured
    /// since [`start_time`](Self::start_time). `total_time` of the result is
    /// the tick time. Returns `None` once the session is stopped.
    fn next_tick(&mut self) -> Option<NoteSequence>;

    fn start_time(&self) -> f64;

    /// Move the capture window start; notes starting earlier are dropped.
    fn set_start_time(&mut self, time: f64);

    fn register_callback(&mut self, signal: MidiSignal, callback: SignalCallback);

    /// Raising the returned flag makes a pending or future
    /// [`next_tick`](Self::next_tick) return `None`.
    fn stop_handle(&self) -> Arc<SignalFlag>;

    fn stop(&mut self);
}

/// Playback of a replaceable note sequence.
pub trait PlaybackSession: Send {
    /// Replace the in-flight sequence. Events before `start_time` (or now,
    /// when `None`) are not played.
    fn update_sequence(&mut self, sequence: &NoteSequence, start_time: Option<f64>);

    fn stop(&mut self);
}

/// MIDI transport: capture, playback, metronome and control values.
pub trait MidiHub: Send + Sync {
    fn start_capture(
        &self,
        qpm: f64,
        start_time: f64,
        tick: TickSource,
    ) -> Result<Box<dyn CaptureSession>>;

    /// Start playback with live updates enabled.
    fn start_playback(&self, sequence: &NoteSequence) -> Result<Box<dyn PlaybackSession>>;

    /// Last value received for `control`, if any.
    fn control_value(&self, control: ControlNumber) -> Option<u8>;

    fn send_control_change(&self, control: ControlNumber, value: u8);

    /// Start the metronome, or retune it if already running.
    fn start_metronome(&self, qpm: f64, start_time: f64, channel: u8);

    fn stop_metronome(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_matches_value() {
        let signal = MidiSignal::control(2);
        assert!(signal.matches(2, 127));
        assert!(!signal.matches(2, 0));
        assert!(!signal.matches(3, 127));
    }

    #[test]
    fn test_signal_any_value() {
        let signal = MidiSignal {
            control: 7,
            value: None,
        };
        assert!(signal.matches(7, 0));
        assert!(signal.matches(7, 64));
    }
}
