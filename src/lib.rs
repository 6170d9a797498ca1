//! # Antiphon - Real-time MIDI call and response
//!
//! Listens to a live MIDI performance one tick at a time, decides when a
//! call phrase has ended, asks a sequence generator for a response and plays
//! it back in time, compensating for generation latency.
//!
//! ## Architecture
//!
//! Antiphon is an umbrella crate over:
//! - **antiphon-core** - Note sequences, signal flags, clocks, configuration and
//!   the collaborator traits (hub, capture, playback, generator)
//! - **antiphon-midi-io** - Hardware hub on midir, control learning, MIDI files
//!
//! This crate adds the interaction engine, the generator worker and the
//! bundled generators.
//!
//! ## Quick Start
//!
//! ```ignore
//! use antiphon::prelude::*;
//!
//! let config = InteractionConfig::load("antiphon.toml")?;
//! let clock: Arc<dyn WallClock> = Arc::new(SystemClock::new());
//! let mapper = Arc::new(ControlMapper::from_control_map(&config.controls));
//! let hub = Arc::new(HardwareHub::connect(&config, clock.clone(), mapper)?);
//!
//! let mut interaction = InteractionBuilder::from_config(&config)?
//!     .hub(hub)
//!     .clock(clock)
//!     .build()?;
//! interaction.start()?;
//! ```
//!
//! ## Feature Flags
//!
//! - `midi-io` (default) - Hardware MIDI ports and the `antiphon` binary

/// Re-export of antiphon-core for direct access
pub use antiphon_core as core;

/// Re-export of antiphon-midi-io for direct access
pub use antiphon_midi_io as midi;

pub use antiphon_core::{
    CaptureSession, ControlMap, ControlNumber, ControlSignal, GeneratorError, GeneratorOptions,
    GeneratorSpec, InteractionConfig, InteractionState, ManualClock, MidiHub, MidiSignal,
    NoteEvent, NoteSequence, PlaybackSession, SequenceGenerator, SignalFlag, SystemClock,
    TickSource, TimeWindow, WallClock,
};

pub use antiphon_midi_io::{ControlMapper, HardwareHub, HubOptions, LearnOutcome, MidiSink};

mod error;
pub use error::{Error, Result};

pub mod generation;
pub use generation::{generate_response, GenerationRequest, GenerationWorker};

pub mod generators;
pub use generators::{CommandGenerator, EchoGenerator};

mod notify;

mod tick;

mod engine;
pub use engine::Interaction;

mod builder;
pub use builder::InteractionBuilder;

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        CommandGenerator, ControlMap, ControlSignal, EchoGenerator, Interaction,
        InteractionBuilder, InteractionConfig, InteractionState, MidiHub, MidiSignal, NoteEvent,
        NoteSequence, SequenceGenerator, SystemClock, TickSource, WallClock,
    };
    pub use crate::{ControlMapper, HardwareHub};
    pub use std::sync::Arc;
}
