//! v2midi-core: device communication and firmware update over MIDI.
//!
//! Configures and updates instruments which speak JSON over SysEx: the
//! host sends `{"com.versioduo.device": {"method": ...}}` requests and the
//! device answers with full state snapshots.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: channel messages, JSON-over-SysEx codec, request/reply envelopes
//! - **Ports**: input/output pairing heuristic and port registry
//! - **Transport**: MIDI backend abstraction (midir, mock)
//! - **State**: connection state, token discipline and reply routing
//! - **Firmware**: image metadata, update index, chunked transfer
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use v2midi_core::ports::DeviceFilter;
//! use v2midi_core::session::{DeviceSession, SessionConfig};
//! use v2midi_core::transport::MockBackend;
//!
//! let mut session = DeviceSession::new(MockBackend::new(), SessionConfig::default());
//! session.refresh_ports().expect("enumeration failed");
//! if let Some(device) = session.devices(DeviceFilter::Paired).first() {
//!     session.connect(device).expect("connect failed");
//!     session.run_until(Duration::from_secs(2), |s| s.snapshot().is_some());
//! }
//! ```

pub mod events;
pub mod firmware;
pub mod ports;
pub mod protocol;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use events::{DeviceEvent, DeviceObserver, LogLevel, NullObserver, Severity, TracingObserver};
pub use firmware::{FirmwareImage, FirmwareIndex, FirmwareTransfer, UpdateAssessment};
pub use ports::{DeviceDescriptor, DeviceFilter, Port, PortRegistry};
pub use protocol::{ChannelMessage, CodecError, Reply, Request};
pub use session::{DeviceSession, SessionConfig, SessionError};
pub use snapshot::DeviceSnapshot;
pub use state::ConnectionState;
#[cfg(feature = "midir")]
pub use transport::MidirBackend;
pub use transport::{MidiBackend, MidiLink, MockBackend, TransportError};
