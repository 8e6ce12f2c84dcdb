//! midir-based MIDI transport implementation.

use std::sync::mpsc::Sender;

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tracing::{debug, info, instrument, warn};

use super::traits::{LinkEvent, MidiBackend, MidiLink, TransportError};
use crate::ports::Port;

/// Native MIDI access (ALSA, CoreMIDI, WinMM) through midir.
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn input_client(&self) -> Result<MidiInput, TransportError> {
        let mut input = MidiInput::new(&self.client_name)
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        // SysEx carries all structured replies.
        input.ignore(Ignore::None);
        Ok(input)
    }

    fn output_client(&self) -> Result<MidiOutput, TransportError> {
        MidiOutput::new(&self.client_name).map_err(|e| TransportError::Unavailable(e.to_string()))
    }
}

impl MidiBackend for MidirBackend {
    fn ports(&mut self) -> Result<Vec<Port>, TransportError> {
        let mut ports = Vec::new();

        let input = self.input_client()?;
        for port in input.ports() {
            let name = input
                .port_name(&port)
                .map_err(|e| TransportError::EnumerationFailed(e.to_string()))?;
            ports.push(Port::input(port.id(), name));
        }

        let output = self.output_client()?;
        for port in output.ports() {
            let name = output
                .port_name(&port)
                .map_err(|e| TransportError::EnumerationFailed(e.to_string()))?;
            ports.push(Port::output(port.id(), name));
        }

        debug!(count = ports.len(), "Enumerated MIDI ports");
        Ok(ports)
    }

    #[instrument(level = "info", skip(self, events), fields(input = %input.name, output = %output.name))]
    fn open(
        &mut self,
        input: &Port,
        output: &Port,
        events: Sender<LinkEvent>,
    ) -> Result<Box<dyn MidiLink>, TransportError> {
        let midi_in = self.input_client()?;
        let in_port = midi_in
            .ports()
            .into_iter()
            .find(|p| p.id() == input.id)
            .ok_or_else(|| TransportError::PortNotFound {
                id: input.id.clone(),
            })?;

        let midi_out = self.output_client()?;
        let out_port = midi_out
            .ports()
            .into_iter()
            .find(|p| p.id() == output.id)
            .ok_or_else(|| TransportError::PortNotFound {
                id: output.id.clone(),
            })?;

        let inbound = events.clone();
        let input_conn = midi_in
            .connect(
                &in_port,
                &format!("{}-in", self.client_name),
                move |_stamp, bytes, _| {
                    // The receiver is gone once the attempt is superseded.
                    let _ = inbound.send(LinkEvent::Message(bytes.to_vec()));
                },
                (),
            )
            .map_err(|e| TransportError::OpenFailed {
                name: input.name.clone(),
                message: e.to_string(),
            })?;

        let output_conn = midi_out
            .connect(&out_port, &format!("{}-out", self.client_name))
            .map_err(|e| TransportError::OpenFailed {
                name: output.name.clone(),
                message: e.to_string(),
            })?;

        info!("MIDI ports opened");
        if events.send(LinkEvent::Opened).is_err() {
            warn!("Link opened without a listener");
        }

        Ok(Box::new(MidirLink {
            _input: input_conn,
            output: output_conn,
        }))
    }
}

/// An open midir input/output pair. Dropping it closes both ports.
pub struct MidirLink {
    _input: MidiInputConnection<()>,
    output: MidiOutputConnection,
}

impl MidiLink for MidirLink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.output
            .send(bytes)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}
