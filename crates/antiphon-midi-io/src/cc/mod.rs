//! Control-change mapping for interaction signals.
//!
//! Binds logical signals to control numbers and supports MIDI learn.

pub mod manager;
pub mod mapping;

pub use manager::{ControlMapper, ProcessResult};
pub use mapping::{ControlBinding, LearnOutcome};
