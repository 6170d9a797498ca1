//! MIDI input manager.
//!
//! Connections are opened and held on a dedicated thread for platform
//! thread-safety; incoming bytes go straight to the registered handler.

use super::port_matches;
use crate::error::{Error, Result};
use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, Receiver, Sender};
use midir::{MidiInput, MidiInputConnection};
use std::sync::Arc;
use std::thread;
use tracing::info;

/// Receives raw message bytes from an input port.
pub type InputHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Information about an available MIDI input device
#[derive(Debug, Clone)]
pub struct MidiInputDevice {
    /// Device index
    pub index: usize,
    /// Device name
    pub name: String,
}

/// Commands sent to the MIDI thread
enum MidiCommand {
    Connect(String, InputHandler, Sender<Result<String>>),
    Disconnect,
    Shutdown,
}

/// MIDI input manager holding any number of open input ports.
pub struct MidiInputManager {
    command_sender: Sender<MidiCommand>,
    connected_devices: Arc<ArcSwap<Vec<String>>>,
}

impl MidiInputManager {
    pub fn new() -> Self {
        let (command_sender, command_receiver) = bounded(16);
        let connected_devices = Arc::new(ArcSwap::new(Arc::new(Vec::new())));

        let connected_devices_clone = Arc::clone(&connected_devices);

        thread::Builder::new()
            .name("midi-input-thread".to_string())
            .spawn(move || {
                Self::midi_thread(command_receiver, connected_devices_clone);
            })
            .expect("Failed to spawn MIDI input thread");

        Self {
            command_sender,
            connected_devices,
        }
    }

    fn midi_thread(
        command_receiver: Receiver<MidiCommand>,
        connected_devices: Arc<ArcSwap<Vec<String>>>,
    ) {
        let mut connections: Vec<(String, MidiInputConnection<()>)> = Vec::new();

        loop {
            match command_receiver.recv_timeout(std::time::Duration::from_millis(100)) {
                Ok(MidiCommand::Connect(name, handler, reply)) => {
                    let result = Self::connect_to_device(&name, handler).map(|(conn, port_name)| {
                        connections.push((port_name.clone(), conn));
                        port_name
                    });
                    connected_devices.store(Arc::new(
                        connections.iter().map(|(name, _)| name.clone()).collect(),
                    ));
                    let _ = reply.send(result);
                }
                Ok(MidiCommand::Disconnect) => {
                    connections.clear();
                    connected_devices.store(Arc::new(Vec::new()));
                }
                Ok(MidiCommand::Shutdown) => {
                    // Closing the connections drops their handlers.
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

    fn connect_to_device(
        wanted: &str,
        handler: InputHandler,
    ) -> Result<(MidiInputConnection<()>, String)> {
        let mut midi_input = MidiInput::new("antiphon-midi-input")?;
        midi_input.ignore(midir::Ignore::None);

        let ports = midi_input.ports();
        let found = ports.iter().find_map(|port| {
            let name = midi_input.port_name(port).ok()?;
            port_matches(&name, wanted).then(|| (port.clone(), name))
        });

        match found {
            Some((port, port_name)) => {
                let connection = midi_input.connect(
                    &port,
                    "antiphon-input",
                    move |_timestamp, message, _| handler(message),
                    (),
                )?;
                info!("Connected MIDI input '{}'", port_name);
                Ok((connection, port_name))
            }
            None => Self::create_virtual(midi_input, wanted, handler),
        }
    }

    #[cfg(unix)]
    fn create_virtual(
        midi_input: MidiInput,
        name: &str,
        handler: InputHandler,
    ) -> Result<(MidiInputConnection<()>, String)> {
        use midir::os::unix::VirtualInput;
        let connection =
            midi_input.create_virtual(name, move |_timestamp, message, _| handler(message), ())?;
        info!("Created virtual MIDI input '{}'", name);
        Ok((connection, name.to_string()))
    }

    #[cfg(not(unix))]
    fn create_virtual(
        _midi_input: MidiInput,
        name: &str,
        _handler: InputHandler,
    ) -> Result<(MidiInputConnection<()>, String)> {
        Err(Error::MidiDevice(format!(
            "No MIDI input device found matching '{}'",
            name
        )))
    }

    pub fn list_devices() -> Vec<MidiInputDevice> {
        let mut devices = Vec::new();
        if let Ok(midi_input) = MidiInput::new("antiphon-device-list") {
            let ports = midi_input.ports();
            for (index, port) in ports.iter().enumerate() {
                let name = midi_input
                    .port_name(port)
                    .unwrap_or_else(|_| format!("Unknown Device {}", index));
                devices.push(MidiInputDevice { index, name });
            }
        }
        devices
    }

    /// Blocks until the input thread has opened the port.
    pub fn connect_by_name(&self, name: &str, handler: InputHandler) -> Result<String> {
        let (reply, result) = bounded(1);
        self.command_sender
            .send(MidiCommand::Connect(name.to_string(), handler, reply))
            .map_err(|_| Error::MidiDevice("MIDI input thread not running".to_string()))?;
        result
            .recv()
            .map_err(|_| Error::MidiDevice("MIDI input thread not running".to_string()))?
    }

    pub fn disconnect(&self) {
        let _ = self.command_sender.send(MidiCommand::Disconnect);
    }

    pub fn connected_device_names(&self) -> Vec<String> {
        self.connected_devices.load().as_ref().clone()
    }
}

impl Default for MidiInputManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MidiInputManager {
    fn drop(&mut self) {
        let _ = self.command_sender.send(MidiCommand::Shutdown);
    }
}
