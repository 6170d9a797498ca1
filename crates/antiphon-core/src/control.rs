//! Named logical controls and their control-change numbers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Control change number (0-127).
pub type ControlNumber = u8;

/// Logical signal that can be bound to a control change number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignal {
    Clock,
    EndCall,
    Panic,
    Mutate,
    MinListenTicks,
    MaxListenTicks,
    ResponseTicks,
    Temperature,
    Tempo,
    Loop,
    GeneratorSelect,
    State,
}

impl ControlSignal {
    pub const ALL: [ControlSignal; 12] = [
        ControlSignal::Clock,
        ControlSignal::EndCall,
        ControlSignal::Panic,
        ControlSignal::Mutate,
        ControlSignal::MinListenTicks,
        ControlSignal::MaxListenTicks,
        ControlSignal::ResponseTicks,
        ControlSignal::Temperature,
        ControlSignal::Tempo,
        ControlSignal::Loop,
        ControlSignal::GeneratorSelect,
        ControlSignal::State,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ControlSignal::Clock => "clock",
            ControlSignal::EndCall => "end_call",
            ControlSignal::Panic => "panic",
            ControlSignal::Mutate => "mutate",
            ControlSignal::MinListenTicks => "min_listen_ticks",
            ControlSignal::MaxListenTicks => "max_listen_ticks",
            ControlSignal::ResponseTicks => "response_ticks",
            ControlSignal::Temperature => "temperature",
            ControlSignal::Tempo => "tempo",
            ControlSignal::Loop => "loop",
            ControlSignal::GeneratorSelect => "generator_select",
            ControlSignal::State => "state",
        }
    }
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static control-number assignment for every logical signal.
///
/// An absent entry means the signal is not controllable and its default applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlMap {
    pub clock: Option<ControlNumber>,
    pub end_call: Option<ControlNumber>,
    pub panic: Option<ControlNumber>,
    pub mutate: Option<ControlNumber>,
    pub min_listen_ticks: Option<ControlNumber>,
    pub max_listen_ticks: Option<ControlNumber>,
    pub response_ticks: Option<ControlNumber>,
    pub temperature: Option<ControlNumber>,
    pub tempo: Option<ControlNumber>,
    #[serde(rename = "loop")]
    pub loop_: Option<ControlNumber>,
    pub generator_select: Option<ControlNumber>,
    pub state: Option<ControlNumber>,
}

impl ControlMap {
    pub fn get(&self, signal: ControlSignal) -> Option<ControlNumber> {
        match signal {
            ControlSignal::Clock => self.clock,
            ControlSignal::EndCall => self.end_call,
            ControlSignal::Panic => self.panic,
            ControlSignal::Mutate => self.mutate,
            ControlSignal::MinListenTicks => self.min_listen_ticks,
            ControlSignal::MaxListenTicks => self.max_listen_ticks,
            ControlSignal::ResponseTicks => self.response_ticks,
            ControlSignal::Temperature => self.temperature,
            ControlSignal::Tempo => self.tempo,
            ControlSignal::Loop => self.loop_,
            ControlSignal::GeneratorSelect => self.generator_select,
            ControlSignal::State => self.state,
        }
    }

    pub fn set(&mut self, signal: ControlSignal, control: Option<ControlNumber>) {
        let slot = match signal {
            ControlSignal::Clock => &mut self.clock,
            ControlSignal::EndCall => &mut self.end_call,
            ControlSignal::Panic => &mut self.panic,
            ControlSignal::Mutate => &mut self.mutate,
            ControlSignal::MinListenTicks => &mut self.min_listen_ticks,
            ControlSignal::MaxListenTicks => &mut self.max_listen_ticks,
            ControlSignal::ResponseTicks => &mut self.response_ticks,
            ControlSignal::Temperature => &mut self.temperature,
            ControlSignal::Tempo => &mut self.tempo,
            ControlSignal::Loop => &mut self.loop_,
            ControlSignal::GeneratorSelect => &mut self.generator_select,
            ControlSignal::State => &mut self.state,
        };
        *slot = control;
    }

    /// All signals with their current assignment, in display order.
    pub fn entries(&self) -> impl Iterator<Item = (ControlSignal, Option<ControlNumber>)> + '_ {
        ControlSignal::ALL.into_iter().map(|s| (s, self.get(s)))
    }

    /// The first control number bound to more than one signal, if any.
    pub fn find_duplicate(&self) -> Option<(ControlNumber, ControlSignal, ControlSignal)> {
        let bound: Vec<(ControlSignal, ControlNumber)> =
            self.entries().filter_map(|(s, c)| c.map(|c| (s, c))).collect();
        for (i, (a, ca)) in bound.iter().enumerate() {
            if let Some((b, _)) = bound[i + 1..].iter().find(|(_, cb)| cb == ca) {
                return Some((*ca, *a, *b));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_roundtrip() {
        let mut map = ControlMap::default();
        for (i, signal) in ControlSignal::ALL.into_iter().enumerate() {
            map.set(signal, Some(i as u8 + 1));
        }
        assert_eq!(map.get(ControlSignal::Clock), Some(1));
        assert_eq!(map.get(ControlSignal::State), Some(12));
        assert!(map.find_duplicate().is_none());
    }

    #[test]
    fn test_find_duplicate() {
        let map = ControlMap {
            panic: Some(11),
            mutate: Some(11),
            ..Default::default()
        };
        assert_eq!(
            map.find_duplicate(),
            Some((11, ControlSignal::Panic, ControlSignal::Mutate))
        );
    }

    #[test]
    fn test_loop_key_in_toml() {
        let map: ControlMap = toml::from_str("loop = 10\nclock = 1").unwrap();
        assert_eq!(map.loop_, Some(10));
        assert_eq!(map.clock, Some(1));
        assert_eq!(map.tempo, None);
    }
}
