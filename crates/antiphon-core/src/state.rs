//! Interaction states.

use std::fmt;

/// State of the call-and-response interaction.
///
/// The numeric values are what gets sent on the state control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum InteractionState {
    #[default]
    Idle = 0,
    Listening = 1,
    Responding = 2,
    /// Simultaneous listen and respond. Reserved; no transition enters it.
    Augment = 3,
}

impl InteractionState {
    pub fn name(&self) -> &'static str {
        match self {
            InteractionState::Idle => "Idle",
            InteractionState::Listening => "Listening",
            InteractionState::Responding => "Responding",
            InteractionState::Augment => "Augment",
        }
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for InteractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<u8> for InteractionState {
    fn from(value: u8) -> Self {
        match value {
            1 => InteractionState::Listening,
            2 => InteractionState::Responding,
            3 => InteractionState::Augment,
            _ => InteractionState::Idle,
        }
    }
}
