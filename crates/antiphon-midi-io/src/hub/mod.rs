//! MIDI hub: the capture, playback, metronome and control-value collaborator
//! the interaction engine drives.
//!
//! Incoming bytes enter through [`HardwareHub::handle_input`], either from
//! midir input ports (`midi-io` feature) or from any other source. Outgoing
//! messages go to a [`MidiSink`].

mod capture;
mod metronome;
mod playback;

pub use capture::HardwareCapture;
pub use playback::HardwarePlayback;

use crate::cc::{ControlMapper, ProcessResult};
use crate::event::{MidiMessage, MidiOutputMessage};
use antiphon_core::{
    CaptureSession, ControlNumber, InteractionConfig, MidiHub, NoteSequence, PlaybackSession,
    Result, TickSource, WallClock,
};
use capture::CaptureShared;
use dashmap::DashMap;
use metronome::Metronome;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Destination for outgoing MIDI.
pub trait MidiSink: Send + Sync {
    fn send(&self, message: &MidiOutputMessage);
}

/// Channel for control-change output such as the state control.
const CONTROL_CHANNEL: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HubOptions {
    /// Forward incoming notes to the outputs.
    pub passthrough: bool,
    pub playback_channel: u8,
    /// Seconds added to every playback event.
    pub playback_offset: f64,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            passthrough: true,
            playback_channel: 0,
            playback_offset: 0.0,
        }
    }
}

impl From<&InteractionConfig> for HubOptions {
    fn from(config: &InteractionConfig) -> Self {
        Self {
            passthrough: config.passthrough,
            playback_channel: config.playback_channel,
            playback_offset: config.playback_offset,
        }
    }
}

pub(crate) struct HubShared {
    pub(crate) clock: Arc<dyn WallClock>,
    sink: Arc<dyn MidiSink>,
    options: HubOptions,
    mapper: Arc<ControlMapper>,
    control_values: DashMap<ControlNumber, u8>,
    captures: Mutex<Vec<Arc<CaptureShared>>>,
}

impl HubShared {
    pub(crate) fn add_capture(&self, capture: Arc<CaptureShared>) {
        self.captures.lock().push(capture);
    }

    pub(crate) fn remove_capture(&self, capture: &Arc<CaptureShared>) {
        self.captures.lock().retain(|c| !Arc::ptr_eq(c, capture));
    }

    fn active_captures(&self) -> Vec<Arc<CaptureShared>> {
        self.captures.lock().clone()
    }

    fn handle_input(&self, bytes: &[u8]) {
        let Some(message) = MidiMessage::parse(bytes) else {
            debug!("Ignoring malformed MIDI message {:02X?}", bytes);
            return;
        };
        let time = self.clock.now();

        match message {
            MidiMessage::NoteOn {
                channel,
                pitch,
                velocity,
            } => {
                for capture in self.active_captures() {
                    capture.note_on(channel, pitch, velocity, time);
                }
            }
            MidiMessage::NoteOff { channel, pitch } => {
                for capture in self.active_captures() {
                    capture.note_off(channel, pitch, time);
                }
            }
            MidiMessage::ControlChange {
                channel,
                control,
                value,
            } => {
                // A message that completes learning is consumed by it.
                if let ProcessResult::Learned(_) = self.mapper.process_cc(channel, control, value) {
                    return;
                }
                self.control_values.insert(control, value);
                for capture in self.active_captures() {
                    capture.dispatch_control(control, value, time);
                }
            }
            MidiMessage::Other => {}
        }

        if self.options.passthrough && message.is_note() {
            self.sink.send(&MidiOutputMessage::raw(bytes));
        }
    }
}

/// MIDI hub over a sink and a wall clock.
pub struct HardwareHub {
    shared: Arc<HubShared>,
    metronome: Mutex<Option<Metronome>>,
    #[cfg(feature = "midi-io")]
    inputs: Option<crate::io::MidiInputManager>,
}

impl HardwareHub {
    pub fn new(sink: Arc<dyn MidiSink>, clock: Arc<dyn WallClock>, options: HubOptions) -> Self {
        Self::with_mapper(sink, clock, options, Arc::new(ControlMapper::new()))
    }

    pub fn with_mapper(
        sink: Arc<dyn MidiSink>,
        clock: Arc<dyn WallClock>,
        options: HubOptions,
        mapper: Arc<ControlMapper>,
    ) -> Self {
        Self {
            shared: Arc::new(HubShared {
                clock,
                sink,
                options,
                mapper,
                control_values: DashMap::new(),
                captures: Mutex::new(Vec::new()),
            }),
            metronome: Mutex::new(None),
            #[cfg(feature = "midi-io")]
            inputs: None,
        }
    }

    /// Open the configured input and output ports. Unmatched names become
    /// virtual ports where the platform supports them.
    #[cfg(feature = "midi-io")]
    pub fn connect(
        config: &InteractionConfig,
        clock: Arc<dyn WallClock>,
        mapper: Arc<ControlMapper>,
    ) -> crate::error::Result<Self> {
        use crate::io::{MidiInputManager, MidiOutputManager};

        let outputs = MidiOutputManager::new();
        for name in config.output_port_names() {
            outputs.connect_by_name(&name)?;
        }

        let mut hub = Self::with_mapper(
            Arc::new(outputs),
            clock,
            HubOptions::from(config),
            mapper,
        );

        let inputs = MidiInputManager::new();
        for name in config.input_port_names() {
            let shared = Arc::clone(&hub.shared);
            inputs.connect_by_name(&name, Arc::new(move |bytes: &[u8]| shared.handle_input(bytes)))?;
        }
        hub.inputs = Some(inputs);
        Ok(hub)
    }

    /// Feed one incoming MIDI message, stamped with the hub clock.
    pub fn handle_input(&self, bytes: &[u8]) {
        self.shared.handle_input(bytes);
    }

    pub fn mapper(&self) -> &Arc<ControlMapper> {
        &self.shared.mapper
    }

    pub fn clock(&self) -> &Arc<dyn WallClock> {
        &self.shared.clock
    }

    pub fn options(&self) -> HubOptions {
        self.shared.options
    }
}

#[cfg(feature = "midi-io")]
pub fn list_input_ports() -> Vec<String> {
    crate::io::MidiInputManager::list_devices()
        .into_iter()
        .map(|device| device.name)
        .collect()
}

#[cfg(feature = "midi-io")]
pub fn list_output_ports() -> Vec<String> {
    crate::io::MidiOutputManager::list_devices()
        .into_iter()
        .map(|device| device.name)
        .collect()
}

impl MidiHub for HardwareHub {
    fn start_capture(
        &self,
        qpm: f64,
        start_time: f64,
        tick: TickSource,
    ) -> Result<Box<dyn CaptureSession>> {
        if let TickSource::Period(period) = tick {
            if !(period > 0.0) {
                return Err(antiphon_core::Error::InvalidConfig(format!(
                    "tick period {} must be positive",
                    period
                )));
            }
        }
        Ok(Box::new(HardwareCapture::start(
            Arc::clone(&self.shared),
            qpm,
            start_time,
            tick,
        )))
    }

    fn start_playback(&self, sequence: &NoteSequence) -> Result<Box<dyn PlaybackSession>> {
        let playback = HardwarePlayback::start(
            Arc::clone(&self.shared.sink),
            Arc::clone(&self.shared.clock),
            self.shared.options.playback_channel,
            self.shared.options.playback_offset,
            sequence,
        )?;
        Ok(Box::new(playback))
    }

    fn control_value(&self, control: ControlNumber) -> Option<u8> {
        self.shared.control_values.get(&control).map(|v| *v)
    }

    fn send_control_change(&self, control: ControlNumber, value: u8) {
        self.shared
            .sink
            .send(&MidiOutputMessage::control_change(CONTROL_CHANNEL, control, value));
    }

    fn start_metronome(&self, qpm: f64, start_time: f64, channel: u8) {
        let mut metronome = self.metronome.lock();
        if metronome.is_none() {
            match Metronome::spawn(Arc::clone(&self.shared.sink), Arc::clone(&self.shared.clock)) {
                Ok(spawned) => *metronome = Some(spawned),
                Err(e) => {
                    warn!("Failed to start metronome: {}", e);
                    return;
                }
            }
        }
        if let Some(metronome) = metronome.as_ref() {
            metronome.start(qpm, start_time, channel);
        }
    }

    fn stop_metronome(&self) {
        if let Some(metronome) = self.metronome.lock().as_ref() {
            metronome.stop();
        }
    }
}
