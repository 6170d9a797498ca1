//! MIDI I/O for the antiphon interaction engine.
//!
//! Provides the hardware hub (capture, playback, metronome, control values),
//! control mapping with MIDI learn, raw message parsing and Standard MIDI File
//! conversion.
//!
//! Feature gates: `midi-io` (hardware ports via midir).

pub mod error;
pub use error::{Error, Result};

pub mod event;
pub use event::{MidiChannel, MidiMessage, MidiOutputMessage};

pub mod cc;
pub use cc::{ControlBinding, ControlMapper, LearnOutcome, ProcessResult};

pub mod file;
pub use file::{encode_sequence, parse_sequence, read_sequence, write_sequence, TICKS_PER_QUARTER};

pub mod hub;
pub use hub::{HardwareCapture, HardwareHub, HardwarePlayback, HubOptions, MidiSink};

#[cfg(feature = "midi-io")]
pub use hub::{list_input_ports, list_output_ports};

#[cfg(feature = "midi-io")]
pub(crate) mod io;

#[cfg(feature = "midi-io")]
pub use io::{MidiInputDevice, MidiInputManager, MidiOutputDevice, MidiOutputManager};
