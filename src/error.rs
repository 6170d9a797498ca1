//! Centralized error type for the antiphon crate.
//!
//! Wraps the subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] antiphon_core::Error),

    #[error("MIDI: {0}")]
    Midi(#[from] antiphon_midi_io::Error),

    #[error("Engine: {0}")]
    Engine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
