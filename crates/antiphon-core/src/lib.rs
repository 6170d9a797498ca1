//! Core types for the antiphon call-and-response engine.
//!
//! # Primary API
//!
//! - [`NoteEvent`] / [`NoteSequence`]: the data model shared by capture,
//!   generation and playback
//! - [`SignalFlag`]: one-shot flags raised by input callbacks
//! - [`WallClock`]: the timeline every collaborator agrees on
//! - [`MidiHub`], [`CaptureSession`], [`PlaybackSession`], [`SequenceGenerator`]:
//!   collaborator contracts
//! - [`InteractionConfig`] / [`ControlMap`]: configuration

pub mod error;
pub use error::{Error, GeneratorError, Result};

mod note;
pub use note::{NoteEvent, MAX_PITCH};

mod sequence;
pub use sequence::{NoteSequence, DEFAULT_QPM};

mod lockfree;
pub use lockfree::SignalFlag;

mod clock;
pub use clock::{ManualClock, SystemClock, WallClock};

mod control;
pub use control::{ControlMap, ControlNumber, ControlSignal};

mod state;
pub use state::InteractionState;

pub mod config;
pub use config::{GeneratorSpec, InteractionConfig};

pub mod traits;
pub use traits::{
    CaptureSession, GeneratorOptions, MidiHub, MidiSignal, PlaybackSession, SequenceGenerator,
    SignalCallback, TickSource, TimeWindow,
};
