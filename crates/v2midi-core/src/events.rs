//! Event system for UI decoupling.
//!
//! Allows CLI/GUI frontends to subscribe to device events without
//! tight coupling to the session logic.

use std::fmt;

use crate::ports::Port;
use crate::protocol::ChannelMessage;
use crate::snapshot::DeviceSnapshot;
use crate::state::ConnectionState;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Severity of a human-readable notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Success => write!(f, "success"),
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Wire message direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Events emitted by the device session.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A port appeared or vanished.
    PortChanged { port: Port },
    /// Connection state changed.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Every accepted full reply.
    Snapshot(DeviceSnapshot),
    /// The session was torn down (disconnect, reboot, error).
    Reset,
    /// Firmware transfer progress, emitted before each block is sent.
    Progress { offset: usize, total: usize },
    /// Human-readable status for the user.
    Notice { severity: Severity, message: String },
    /// Inbound channel message.
    Midi(ChannelMessage),
    /// Wire message sent/received.
    Packet {
        direction: PacketDirection,
        length: usize,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
}

/// Observer trait for receiving device events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait DeviceObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &DeviceEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DeviceObserver for NullObserver {
    fn on_event(&self, _event: &DeviceEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DeviceObserver for TracingObserver {
    fn on_event(&self, event: &DeviceEvent) {
        match event {
            DeviceEvent::PortChanged { port } => {
                tracing::info!(id = %port.id, name = %port.name, state = %port.state, "Port changed");
            }
            DeviceEvent::StateChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "State changed");
            }
            DeviceEvent::Snapshot(snapshot) => {
                tracing::info!(product = %snapshot.product(), "Device snapshot");
            }
            DeviceEvent::Reset => {
                tracing::info!("Session reset");
            }
            DeviceEvent::Progress { offset, total } => {
                let pct = if *total > 0 { (*offset * 100) / *total } else { 0 };
                tracing::debug!(offset, total, progress = %format!("{}%", pct), "Firmware progress");
            }
            DeviceEvent::Notice { severity, message } => match severity {
                Severity::Success | Severity::Info => tracing::info!("{}", message),
                Severity::Warning => tracing::warn!("{}", message),
                Severity::Error => tracing::error!("{}", message),
            },
            DeviceEvent::Midi(message) => {
                tracing::debug!(message = %message, "MIDI in");
            }
            DeviceEvent::Packet { direction, length } => {
                tracing::trace!(dir = %direction, len = length, "MIDI packet");
            }
            DeviceEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}
