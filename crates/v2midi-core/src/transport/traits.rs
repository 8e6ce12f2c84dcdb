//! MIDI transport layer abstraction.
//!
//! Defines the `MidiBackend` trait for port discovery and opening links,
//! allowing different implementations (midir, mock, etc.).

use std::sync::mpsc::Sender;

use thiserror::Error;

use crate::ports::Port;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Port not found: {id}")]
    PortNotFound { id: String },

    #[error("Failed to open port {name}: {message}")]
    OpenFailed { name: String, message: String },

    #[error("Failed to enumerate ports: {0}")]
    EnumerationFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Port closed")]
    Closed,

    #[error("No MIDI backend available: {0}")]
    Unavailable(String),
}

/// Events delivered by an open link to its connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Both ports are open and the link accepts sends.
    Opened,
    /// One complete inbound wire message.
    Message(Vec<u8>),
    /// The platform closed the link.
    Closed(String),
}

/// An open input/output port pair.
///
/// Dropping the link closes both ports and stops event delivery.
pub trait MidiLink {
    /// Send one complete wire message on the output port.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Platform MIDI access.
///
/// This trait enables:
/// - Production implementation using midir
/// - Mock implementation for unit testing
pub trait MidiBackend {
    /// List all currently present ports, inputs and outputs.
    fn ports(&mut self) -> Result<Vec<Port>, TransportError>;

    /// Start opening `input` and `output`.
    ///
    /// Completion is reported as `LinkEvent::Opened` on `events`; inbound
    /// messages follow on the same channel. The link must not be used to
    /// send before `Opened` arrives.
    fn open(
        &mut self,
        input: &Port,
        output: &Port,
        events: Sender<LinkEvent>,
    ) -> Result<Box<dyn MidiLink>, TransportError>;
}
