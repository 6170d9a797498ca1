//! MIDI output: device enumeration, connection, and message sending via a dedicated thread.

use super::port_matches;
use crate::error::{Error, Result};
use crate::event::MidiOutputMessage;
use crate::hub::MidiSink;
use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, Receiver, Sender};
use midir::{MidiOutput, MidiOutputConnection};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct MidiOutputDevice {
    pub index: usize,
    pub name: String,
}

enum MidiOutputCommand {
    Connect(String, Sender<Result<String>>),
    Disconnect,
    SendMessage(MidiOutputMessage),
    Shutdown,
}

/// Fans every message out to all connected output ports.
pub struct MidiOutputManager {
    command_sender: Sender<MidiOutputCommand>,
    connected_devices: Arc<ArcSwap<Vec<String>>>,
}

impl MidiOutputManager {
    pub fn new() -> Self {
        let (command_sender, command_receiver) = bounded(1024);
        let connected_devices = Arc::new(ArcSwap::new(Arc::new(Vec::new())));

        let connected_devices_clone = Arc::clone(&connected_devices);

        thread::Builder::new()
            .name("midi-output-thread".to_string())
            .spawn(move || {
                Self::midi_output_thread(command_receiver, connected_devices_clone);
            })
            .expect("Failed to spawn MIDI output thread");

        Self {
            command_sender,
            connected_devices,
        }
    }

    fn midi_output_thread(
        command_receiver: Receiver<MidiOutputCommand>,
        connected_devices: Arc<ArcSwap<Vec<String>>>,
    ) {
        let mut connections: Vec<(String, MidiOutputConnection)> = Vec::new();

        loop {
            match command_receiver.recv_timeout(std::time::Duration::from_millis(100)) {
                Ok(MidiOutputCommand::Connect(name, reply)) => {
                    let result = Self::connect_to_device(&name).map(|(conn, port_name)| {
                        connections.push((port_name.clone(), conn));
                        port_name
                    });
                    connected_devices.store(Arc::new(
                        connections.iter().map(|(name, _)| name.clone()).collect(),
                    ));
                    let _ = reply.send(result);
                }
                Ok(MidiOutputCommand::Disconnect) => {
                    connections.clear();
                    connected_devices.store(Arc::new(Vec::new()));
                }
                Ok(MidiOutputCommand::SendMessage(msg)) => {
                    if connections.is_empty() {
                        debug!("Cannot send MIDI message: no device connected");
                    }
                    for (_, conn) in connections.iter_mut() {
                        let _ = conn.send(&msg.bytes);
                    }
                }
                Ok(MidiOutputCommand::Shutdown) => {
                    connections.clear();
                    break;
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    break;
                }
            }
        }
    }

    /// Connect to the first port whose name contains `wanted`, or create a
    /// virtual port with that name where the platform supports it.
    fn connect_to_device(wanted: &str) -> Result<(MidiOutputConnection, String)> {
        let midi_output = MidiOutput::new("antiphon-midi-output")?;

        let ports = midi_output.ports();
        let found = ports.iter().find_map(|port| {
            let name = midi_output.port_name(port).ok()?;
            port_matches(&name, wanted).then(|| (port.clone(), name))
        });

        match found {
            Some((port, port_name)) => {
                let connection = midi_output.connect(&port, "antiphon-output")?;
                info!("Connected MIDI output '{}'", port_name);
                Ok((connection, port_name))
            }
            None => Self::create_virtual(midi_output, wanted),
        }
    }

    #[cfg(unix)]
    fn create_virtual(
        midi_output: MidiOutput,
        name: &str,
    ) -> Result<(MidiOutputConnection, String)> {
        use midir::os::unix::VirtualOutput;
        let connection = midi_output.create_virtual(name)?;
        info!("Created virtual MIDI output '{}'", name);
        Ok((connection, name.to_string()))
    }

    #[cfg(not(unix))]
    fn create_virtual(
        _midi_output: MidiOutput,
        name: &str,
    ) -> Result<(MidiOutputConnection, String)> {
        Err(Error::MidiDevice(format!(
            "No MIDI output device found matching '{}'",
            name
        )))
    }

    pub fn list_devices() -> Vec<MidiOutputDevice> {
        let mut devices = Vec::new();
        if let Ok(midi_output) = MidiOutput::new("antiphon-device-list") {
            let ports = midi_output.ports();
            for (index, port) in ports.iter().enumerate() {
                let name = midi_output
                    .port_name(port)
                    .unwrap_or_else(|_| format!("Unknown Device {}", index));
                devices.push(MidiOutputDevice { index, name });
            }
        }
        devices
    }

    /// Blocks until the output thread has opened the port.
    pub fn connect_by_name(&self, name: &str) -> Result<String> {
        let (reply, result) = bounded(1);
        self.command_sender
            .send(MidiOutputCommand::Connect(name.to_string(), reply))
            .map_err(|_| Error::MidiDevice("MIDI output thread not running".to_string()))?;
        result
            .recv()
            .map_err(|_| Error::MidiDevice("MIDI output thread not running".to_string()))?
    }

    pub fn disconnect(&self) {
        let _ = self.command_sender.send(MidiOutputCommand::Disconnect);
    }

    pub fn send_message(&self, message: MidiOutputMessage) {
        if let Err(e) = self
            .command_sender
            .try_send(MidiOutputCommand::SendMessage(message))
        {
            debug!("MIDI output command channel full or disconnected: {}", e);
        }
    }

    pub fn connected_device_names(&self) -> Vec<String> {
        self.connected_devices.load().as_ref().clone()
    }
}

impl Default for MidiOutputManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiSink for MidiOutputManager {
    fn send(&self, message: &MidiOutputMessage) {
        self.send_message(message.clone());
    }
}

impl Drop for MidiOutputManager {
    fn drop(&mut self) {
        let _ = self.command_sender.send(MidiOutputCommand::Shutdown);
    }
}
