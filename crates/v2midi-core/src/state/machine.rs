//! Connection state and per-session bookkeeping.

use std::fmt;
use std::time::Instant;

use serde_json::Value;

/// Connection lifecycle of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Ports are opening or the first reply is outstanding.
    Connecting,
    /// A full reply was accepted.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
        }
    }
}

/// Pending timers of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// No accepted reply since `connect`.
    Connect,
    /// No snapshot since a configuration write.
    WriteConfirmation,
}

/// Runtime state of one device session.
#[derive(Debug, Default)]
pub struct SessionContext {
    pub state: ConnectionState,
    /// Last assigned attempt sequence. Never reset.
    pub sequence: u64,
    /// Token of the device boot we are talking to.
    pub token: Option<Value>,
    pub connect_deadline: Option<Instant>,
    pub write_deadline: Option<Instant>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to a new state. Returns the previous state if it changed.
    pub fn goto_state(&mut self, new_state: ConnectionState) -> Option<ConnectionState> {
        if self.state == new_state {
            return None;
        }
        tracing::debug!(from = %self.state, to = %new_state, "State transition");
        Some(std::mem::replace(&mut self.state, new_state))
    }

    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Token discipline for an inbound reply.
    ///
    /// The first token seen is adopted; afterwards only replies carrying
    /// the same token are accepted.
    pub fn accept_token(&mut self, token: Option<&Value>) -> bool {
        match &self.token {
            None => {
                self.token = token.cloned();
                true
            }
            Some(established) => token == Some(established),
        }
    }

    /// Drop everything tied to the current connection.
    pub fn reset(&mut self) {
        self.token = None;
        self.connect_deadline = None;
        self.write_deadline = None;
        self.state = ConnectionState::Disconnected;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.connect_deadline, self.write_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Disarm and return a timer that expired at `now`.
    pub fn take_expired(&mut self, now: Instant) -> Option<Timer> {
        if self.connect_deadline.is_some_and(|d| d <= now) {
            self.connect_deadline = None;
            return Some(Timer::Connect);
        }
        if self.write_deadline.is_some_and(|d| d <= now) {
            self.write_deadline = None;
            return Some(Timer::WriteConfirmation);
        }
        None
    }
}
