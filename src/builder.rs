//! Builder for configuring and constructing an [`Interaction`].

use crate::engine::Interaction;
use crate::generation::GenerationWorker;
use crate::generators::from_specs;
use crate::tick::InteractionSettings;
use crate::Result;
use antiphon_core::{
    ControlMap, ControlSignal, Error as CoreError, InteractionConfig, MidiHub, MidiSignal,
    SequenceGenerator, SystemClock, TickSource, WallClock, DEFAULT_QPM,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Exactly one tick source must be chosen: an external clock control
/// ([`clock_signal`](Self::clock_signal)) or a fixed period
/// ([`tick_duration`](Self::tick_duration)).
///
/// # Example
///
/// ```ignore
/// use antiphon::prelude::*;
///
/// let interaction = Interaction::builder()
///     .hub(hub)
///     .generator(EchoGenerator::new())
///     .tick_duration(2.0)
///     .controls(controls)
///     .build()?;
/// ```
pub struct InteractionBuilder {
    hub: Option<Arc<dyn MidiHub>>,
    clock: Option<Arc<dyn WallClock>>,
    generators: Vec<Box<dyn SequenceGenerator>>,
    clock_signal: Option<MidiSignal>,
    tick_duration: Option<f64>,
    controls: ControlMap,
    qpm: f64,
    allow_overlap: bool,
    metronome_channel: Option<u8>,
    generation_timeout: Option<Duration>,
}

impl Default for InteractionBuilder {
    fn default() -> Self {
        Self {
            hub: None,
            clock: None,
            generators: Vec::new(),
            clock_signal: None,
            tick_duration: None,
            controls: ControlMap::default(),
            qpm: DEFAULT_QPM,
            allow_overlap: false,
            metronome_channel: None,
            generation_timeout: None,
        }
    }
}

impl InteractionBuilder {
    /// Start from a loaded configuration. The hub still has to be supplied.
    pub fn from_config(config: &InteractionConfig) -> Result<Self> {
        let mut builder = Self::default()
            .generators(from_specs(&config.generators)?)
            .controls(config.controls.clone())
            .qpm(config.qpm)
            .allow_overlap(config.allow_overlap);

        builder = match config.tick_source() {
            TickSource::Signal(signal) => builder.clock_signal(signal),
            TickSource::Period(period) => builder.tick_duration(period),
        };
        if let Some(channel) = config.metronome() {
            builder = builder.metronome_channel(channel);
        }
        if let Some(timeout) = config.generation_timeout() {
            builder = builder.generation_timeout(timeout);
        }
        Ok(builder)
    }

    pub fn hub(mut self, hub: Arc<dyn MidiHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Default: [`SystemClock`] created at build time
    pub fn clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn generator(mut self, generator: impl SequenceGenerator + 'static) -> Self {
        self.generators.push(Box::new(generator));
        self
    }

    pub fn generators(mut self, generators: Vec<Box<dyn SequenceGenerator>>) -> Self {
        self.generators.extend(generators);
        self
    }

    /// Tick on an external clock control change.
    pub fn clock_signal(mut self, signal: MidiSignal) -> Self {
        self.clock_signal = Some(signal);
        self
    }

    /// Tick on a fixed wall-clock period, in seconds.
    pub fn tick_duration(mut self, seconds: f64) -> Self {
        self.tick_duration = Some(seconds);
        self
    }

    pub fn controls(mut self, controls: ControlMap) -> Self {
        self.controls = controls;
        self
    }

    /// Default: 120. Overridden each tick by the tempo control when it has a value.
    pub fn qpm(mut self, qpm: f64) -> Self {
        self.qpm = qpm;
        self
    }

    /// Keep listening while the response plays. Default: false
    pub fn allow_overlap(mut self, allow: bool) -> Self {
        self.allow_overlap = allow;
        self
    }

    /// Drive the hub metronome on `channel`. Only applies to a fixed tick period.
    pub fn metronome_channel(mut self, channel: u8) -> Self {
        self.metronome_channel = Some(channel);
        self
    }

    /// Abandon a generation call after `timeout`. Default: unbounded
    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Interaction> {
        let tick_source = match (self.clock_signal, self.tick_duration) {
            (Some(signal), None) => TickSource::Signal(signal),
            (None, Some(period)) if period > 0.0 => TickSource::Period(period),
            (None, Some(period)) => {
                return Err(invalid(format!("tick duration {} must be positive", period)))
            }
            (Some(_), Some(_)) => {
                return Err(invalid(
                    "both a clock signal and a tick duration were given".to_string(),
                ))
            }
            (None, None) => {
                return Err(invalid(
                    "either a clock signal or a tick duration is required".to_string(),
                ))
            }
        };

        let hub = self
            .hub
            .ok_or_else(|| invalid("a MIDI hub is required".to_string()))?;
        if self.generators.is_empty() {
            return Err(invalid("at least one generator is required".to_string()));
        }
        if !(self.qpm > 0.0) {
            return Err(invalid(format!("qpm {} must be positive", self.qpm)));
        }
        if let Some((control, a, b)) = self.controls.find_duplicate() {
            return Err(invalid(format!(
                "control number {} assigned to both `{}` and `{}`",
                control, a, b
            )));
        }
        if self.generators.len() > 1 && self.controls.get(ControlSignal::GeneratorSelect).is_none()
        {
            warn!(
                "{} generators installed but no generator_select control; only the first is used",
                self.generators.len()
            );
        }

        let clock: Arc<dyn WallClock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock::new()),
        };
        let settings = InteractionSettings {
            tick_source,
            qpm: self.qpm,
            allow_overlap: self.allow_overlap,
            metronome_channel: self.metronome_channel,
            generation_timeout: self.generation_timeout,
            controls: self.controls,
        };
        let worker = GenerationWorker::spawn(self.generators)?;

        Ok(Interaction::new(hub, clock, settings, worker))
    }
}

fn invalid(message: String) -> crate::Error {
    CoreError::InvalidConfig(message).into()
}
