//! Hardware MIDI I/O.
//!
//! Device enumeration, connection, and real-time I/O via midir.
//! Requires the `midi-io` feature.

mod input;
mod output;

pub use input::{InputHandler, MidiInputDevice, MidiInputManager};
pub use output::{MidiOutputDevice, MidiOutputManager};

/// Case-insensitive partial match used for port selection.
pub(crate) fn port_matches(port_name: &str, wanted: &str) -> bool {
    port_name.to_lowercase().contains(&wanted.to_lowercase())
}
