//! Interaction configuration loaded from TOML.

use crate::control::{ControlMap, ControlSignal};
use crate::error::{Error, Result};
use crate::traits::{MidiSignal, TickSource};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which bundled generator to install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneratorSpec {
    /// Replays the call phrase, optionally transposed.
    Echo {
        #[serde(default)]
        transpose: i16,
    },
    /// External generator program exchanging Standard MIDI Files.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        id: Option<String>,
    },
}

impl Default for GeneratorSpec {
    fn default() -> Self {
        Self::Echo { transpose: 0 }
    }
}

/// Complete interaction configuration. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionConfig {
    /// Comma-separated input port names (partial match).
    #[serde(default = "InteractionConfig::default_input_ports")]
    pub input_ports: String,
    /// Comma-separated output port names (partial match).
    #[serde(default = "InteractionConfig::default_output_ports")]
    pub output_ports: String,
    /// Forward live input to the outputs.
    #[serde(default = "InteractionConfig::default_true")]
    pub passthrough: bool,
    #[serde(default = "InteractionConfig::default_qpm")]
    pub qpm: f64,
    /// Keep listening while a response plays.
    #[serde(default)]
    pub allow_overlap: bool,
    #[serde(default = "InteractionConfig::default_true")]
    pub enable_metronome: bool,
    #[serde(default = "InteractionConfig::default_metronome_channel")]
    pub metronome_channel: u8,
    #[serde(default)]
    pub playback_channel: u8,
    /// Seconds added to every playback event time.
    #[serde(default)]
    pub playback_offset: f64,
    /// Run the interactive control learning loop before starting.
    #[serde(default)]
    pub learn_controls: bool,
    #[serde(default = "InteractionConfig::default_log")]
    pub log: String,
    /// Fixed tick period in seconds. Ignored when a clock control is mapped.
    #[serde(default)]
    pub tick_duration: Option<f64>,
    /// Upper bound on one generation call, in seconds.
    #[serde(default)]
    pub generation_timeout: Option<f64>,
    #[serde(default = "InteractionConfig::default_generators")]
    pub generators: Vec<GeneratorSpec>,
    #[serde(default)]
    pub controls: ControlMap,
}

impl InteractionConfig {
    fn default_input_ports() -> String {
        "antiphon_in".to_string()
    }
    fn default_output_ports() -> String {
        "antiphon_out".to_string()
    }
    fn default_true() -> bool {
        true
    }
    fn default_qpm() -> f64 {
        120.0
    }
    fn default_metronome_channel() -> u8 {
        1
    }
    fn default_log() -> String {
        "warn".to_string()
    }
    fn default_generators() -> Vec<GeneratorSpec> {
        vec![GeneratorSpec::default()]
    }
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            input_ports: Self::default_input_ports(),
            output_ports: Self::default_output_ports(),
            passthrough: true,
            qpm: Self::default_qpm(),
            allow_overlap: false,
            enable_metronome: true,
            metronome_channel: Self::default_metronome_channel(),
            playback_channel: 0,
            playback_offset: 0.0,
            learn_controls: false,
            log: Self::default_log(),
            tick_duration: None,
            generation_timeout: None,
            generators: Self::default_generators(),
            controls: ControlMap::default(),
        }
    }
}

impl InteractionConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.qpm > 0.0) {
            return Err(Error::InvalidConfig(format!("qpm {} must be positive", self.qpm)));
        }
        if self.metronome_channel > 15 || self.playback_channel > 15 {
            return Err(Error::InvalidConfig(
                "MIDI channels must be in 0-15".to_string(),
            ));
        }
        if let Some(d) = self.tick_duration {
            if !(d > 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "tick_duration {} must be positive",
                    d
                )));
            }
        }
        if let Some(t) = self.generation_timeout {
            if !(t > 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "generation_timeout {} must be positive",
                    t
                )));
            }
        }
        if let Some((control, a, b)) = self.controls.find_duplicate() {
            return Err(Error::InvalidConfig(format!(
                "control number {} assigned to both `{}` and `{}`",
                control, a, b
            )));
        }
        if self.generators.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one generator is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Clock control if mapped, else the fixed tick duration, else one 4/4 bar.
    pub fn tick_source(&self) -> TickSource {
        match (self.controls.clock, self.tick_duration) {
            (Some(control), _) => TickSource::Signal(MidiSignal::control(control)),
            (None, Some(duration)) => TickSource::Period(duration),
            (None, None) => TickSource::Period(4.0 * (60.0 / self.qpm)),
        }
    }

    /// Trigger signal for `signal`, if a control number is mapped.
    pub fn signal(&self, signal: ControlSignal) -> Option<MidiSignal> {
        self.controls.get(signal).map(MidiSignal::control)
    }

    pub fn metronome(&self) -> Option<u8> {
        self.enable_metronome.then_some(self.metronome_channel)
    }

    pub fn generation_timeout(&self) -> Option<Duration> {
        self.generation_timeout.map(Duration::from_secs_f64)
    }

    pub fn input_port_names(&self) -> Vec<String> {
        split_ports(&self.input_ports)
    }

    pub fn output_port_names(&self) -> Vec<String> {
        split_ports(&self.output_ports)
    }
}

fn split_ports(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = InteractionConfig::default();
        assert_eq!(config.qpm, 120.0);
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_source(), TickSource::Period(2.0));
        assert_eq!(config.metronome(), Some(1));
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = InteractionConfig::from_toml_str("").unwrap();
        assert_eq!(config, InteractionConfig::default());
    }

    #[test]
    fn test_clock_control_wins() {
        let config = InteractionConfig::from_toml_str(
            "tick_duration = 1.5\n[controls]\nclock = 1\n",
        )
        .unwrap();
        assert_eq!(
            config.tick_source(),
            TickSource::Signal(MidiSignal::control(1))
        );
    }

    #[test]
    fn test_rejects_duplicate_controls() {
        let err = InteractionConfig::from_toml_str("[controls]\npanic = 3\nmutate = 3\n");
        assert!(matches!(err, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_bad_qpm() {
        let config = InteractionConfig {
            qpm: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_generator_specs() {
        let config = InteractionConfig::from_toml_str(
            r#"
            [[generators]]
            kind = "echo"
            transpose = 7

            [[generators]]
            kind = "command"
            program = "./generate.sh"
            args = ["{input}", "{output}"]
            "#,
        )
        .unwrap();
        assert_eq!(config.generators.len(), 2);
        assert_eq!(config.generators[0], GeneratorSpec::Echo { transpose: 7 });
    }

    #[test]
    fn test_port_lists() {
        let config = InteractionConfig {
            input_ports: "IAC Bus 1, IAC Bus 3".to_string(),
            ..Default::default()
        };
        assert_eq!(config.input_port_names(), vec!["IAC Bus 1", "IAC Bus 3"]);
    }

    #[test]
    fn test_toml_roundtrip_through_file() {
        let config = InteractionConfig {
            allow_overlap: true,
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("antiphon.toml");
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        assert_eq!(InteractionConfig::load(&path).unwrap(), config);
    }
}
