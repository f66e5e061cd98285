//! Hardware backend on top of midir

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use std::sync::Arc;
use tracing::{debug, info};

use super::{DeviceError, DeviceHandle, EndpointInfo, InputLink, MidiBackend, MidiReceiver, OutputLink};
use crate::midi::format_hex;

/// midir exposes input and output ports separately and names them by port
/// name only, so a device's identity is its port name.
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn input_client(&self, suffix: &str) -> Result<MidiInput, DeviceError> {
        MidiInput::new(&format!("{}-{}", self.client_name, suffix))
            .map_err(|e| DeviceError::Backend(format!("failed to create MIDI input: {}", e)))
    }

    fn output_client(&self, suffix: &str) -> Result<MidiOutput, DeviceError> {
        MidiOutput::new(&format!("{}-{}", self.client_name, suffix))
            .map_err(|e| DeviceError::Backend(format!("failed to create MIDI output: {}", e)))
    }
}

impl Default for MidirBackend {
    fn default() -> Self {
        Self::new("midi-remote")
    }
}

impl MidiBackend for MidirBackend {
    fn endpoints(&self) -> Vec<Result<EndpointInfo, DeviceError>> {
        let mut entries = Vec::new();

        match self.input_client("scanner") {
            Ok(midi_in) => {
                for (index, port) in midi_in.ports().iter().enumerate() {
                    entries.push(
                        midi_in
                            .port_name(port)
                            .map(|name| EndpointInfo {
                                name,
                                vendor: None,
                                version: None,
                                transmitters: 1,
                                receivers: 0,
                            })
                            .map_err(|e| DeviceError::Unavailable {
                                identity: format!("input port #{}", index),
                                reason: e.to_string(),
                            }),
                    );
                }
            }
            Err(e) => entries.push(Err(e)),
        }

        match self.output_client("scanner") {
            Ok(midi_out) => {
                for (index, port) in midi_out.ports().iter().enumerate() {
                    entries.push(
                        midi_out
                            .port_name(port)
                            .map(|name| EndpointInfo {
                                name,
                                vendor: None,
                                version: None,
                                transmitters: 0,
                                receivers: 1,
                            })
                            .map_err(|e| DeviceError::Unavailable {
                                identity: format!("output port #{}", index),
                                reason: e.to_string(),
                            }),
                    );
                }
            }
            Err(e) => entries.push(Err(e)),
        }

        entries
    }

    fn open_input(
        &self,
        device: &DeviceHandle,
        receiver: Arc<dyn MidiReceiver>,
    ) -> Result<Box<dyn InputLink>, DeviceError> {
        let mut midi_in = self.input_client("in")?;
        // Real-time and sysex messages are valid binding sources too
        midi_in.ignore(Ignore::None);

        let port = midi_in
            .ports()
            .into_iter()
            .find(|p| midi_in.port_name(p).ok().as_deref() == Some(device.identity()))
            .ok_or_else(|| DeviceError::NotFound(device.identity().to_string()))?;

        let connection = midi_in
            .connect(
                &port,
                &format!("{}-in", self.client_name),
                move |_timestamp, data, _| receiver.on_message(data),
                (),
            )
            .map_err(|e| DeviceError::Unavailable {
                identity: device.identity().to_string(),
                reason: e.to_string(),
            })?;

        info!("MIDI input port opened: '{}'", device.identity());
        Ok(Box::new(MidirInputLink {
            identity: device.identity().to_string(),
            connection,
        }))
    }

    fn open_output(&self, device: &DeviceHandle) -> Result<Box<dyn OutputLink>, DeviceError> {
        let midi_out = self.output_client("out")?;

        let port = midi_out
            .ports()
            .into_iter()
            .find(|p| midi_out.port_name(p).ok().as_deref() == Some(device.identity()))
            .ok_or_else(|| DeviceError::NotFound(device.identity().to_string()))?;

        let connection = midi_out
            .connect(&port, &format!("{}-out", self.client_name))
            .map_err(|e| DeviceError::Unavailable {
                identity: device.identity().to_string(),
                reason: e.to_string(),
            })?;

        info!("MIDI output port opened: '{}'", device.identity());
        Ok(Box::new(MidirOutputLink {
            identity: device.identity().to_string(),
            connection,
        }))
    }
}

struct MidirInputLink {
    identity: String,
    connection: MidiInputConnection<()>,
}

// SAFETY: the connection is only moved between threads, never shared; it is
// touched again solely by `close`, which consumes it.
unsafe impl Send for MidirInputLink {}

impl InputLink for MidirInputLink {
    fn close(self: Box<Self>) {
        let MidirInputLink {
            identity,
            connection,
        } = *self;
        let _ = connection.close();
        debug!("MIDI input port closed: '{}'", identity);
    }
}

struct MidirOutputLink {
    identity: String,
    connection: MidiOutputConnection,
}

// SAFETY: all access goes through `&mut self` behind the session's mutex.
unsafe impl Send for MidirOutputLink {}

impl OutputLink for MidirOutputLink {
    fn transmit(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        self.connection
            .send(data)
            .map_err(|e| DeviceError::Unavailable {
                identity: self.identity.clone(),
                reason: e.to_string(),
            })?;
        debug!("MIDI out -> '{}': {}", self.identity, format_hex(data));
        Ok(())
    }

    fn close(self: Box<Self>) {
        let MidirOutputLink {
            identity,
            connection,
        } = *self;
        let _ = connection.close();
        debug!("MIDI output port closed: '{}'", identity);
    }
}
