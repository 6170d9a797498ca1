//! Control binding types.

use antiphon_core::{ControlNumber, ControlSignal};
use std::fmt;

/// A control number bound to a logical signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlBinding {
    pub control: ControlNumber,
    pub signal: ControlSignal,
}

impl ControlBinding {
    pub fn new(control: ControlNumber, signal: ControlSignal) -> Self {
        Self { control, signal }
    }
}

/// Result of one learn request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnOutcome {
    Assigned(ControlBinding),
    /// The incoming control is already bound to another signal; nothing changed.
    AlreadyAssigned {
        control: ControlNumber,
        bound_to: ControlSignal,
    },
    /// Replaced by a newer request or cancelled.
    Cancelled,
}

impl fmt::Display for LearnOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LearnOutcome::Assigned(binding) => write!(
                f,
                "Assigned control {} to `{}`",
                binding.control, binding.signal
            ),
            LearnOutcome::AlreadyAssigned { control, bound_to } => write!(
                f,
                "Control {} is already assigned to `{}`",
                control, bound_to
            ),
            LearnOutcome::Cancelled => write!(f, "Learning cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_display() {
        let outcome = LearnOutcome::Assigned(ControlBinding::new(4, ControlSignal::Panic));
        assert_eq!(outcome.to_string(), "Assigned control 4 to `panic`");

        let outcome = LearnOutcome::AlreadyAssigned {
            control: 4,
            bound_to: ControlSignal::Mutate,
        };
        assert_eq!(outcome.to_string(), "Control 4 is already assigned to `mutate`");
    }
}
