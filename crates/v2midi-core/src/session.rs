//! Device session - connection lifecycle, requests and reply routing.
//!
//! The session is driven from a single thread: `process` drains pending
//! link events and fires due timers, `wait` blocks for the next event or
//! deadline. Backends deliver bytes through a channel owned by the current
//! connection attempt; a superseded attempt's channel is dropped, so its
//! late events can never reach the session.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::events::{
    DeviceEvent, DeviceObserver, LogLevel, PacketDirection, Severity, TracingObserver,
};
use crate::firmware::{FirmwareImage, FirmwareTransfer, TransferError, TransferState, TransferStep};
use crate::ports::{DeviceDescriptor, DeviceFilter, Direction, Port, PortRegistry, PortState, find_by_name};
use crate::protocol::{
    self, ChannelMessage, CodecError, Inbound, MAX_CHANNEL, Reply, Request, sysex,
};
use crate::snapshot::DeviceSnapshot;
use crate::state::{ConnectionState, ReplyOutcome, SessionContext, Timer, classify_reply};
use crate::transport::{LinkEvent, MidiBackend, MidiLink, TransportError};

/// Configuration for a device session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Client name registered with the platform MIDI service.
    pub client_name: String,
    /// Time allowed from `connect` until the first accepted reply.
    pub connect_timeout_ms: u64,
    /// Time allowed for a configuration write to be confirmed.
    pub write_timeout_ms: u64,
    /// Port enumeration interval for frontends that poll.
    pub port_poll_interval_ms: u64,
    /// Device name to connect to when it appears.
    pub auto_connect: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_name: "v2midi".to_string(),
            connect_timeout_ms: 2000,
            write_timeout_ms: 1000,
            port_poll_interval_ms: 1000,
            auto_connect: None,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn port_poll_interval(&self) -> Duration {
        Duration::from_millis(self.port_poll_interval_ms)
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Not connected")]
    NotConnected,

    #[error("Device {0} has no input/output port pair")]
    Unpaired(String),

    #[error("Device does not support {0}")]
    Unsupported(&'static str),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Firmware transfer error: {0}")]
    Transfer(#[from] TransferError),
}

/// One connection attempt. Owns the open link and its event channel.
struct Attempt {
    sequence: u64,
    device: DeviceDescriptor,
    link: Box<dyn MidiLink>,
    events: Receiver<LinkEvent>,
    opened: bool,
}

/// Device session - connects to one device at a time.
pub struct DeviceSession<B: MidiBackend, O: DeviceObserver> {
    backend: B,
    observer: Arc<O>,
    config: SessionConfig,
    registry: PortRegistry,
    ctx: SessionContext,
    attempt: Option<Attempt>,
    transfer: Option<FirmwareTransfer>,
    snapshot: Option<DeviceSnapshot>,
}

impl<B: MidiBackend> DeviceSession<B, TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(backend: B, config: SessionConfig) -> Self {
        Self::with_observer(backend, config, Arc::new(TracingObserver))
    }
}

impl<B: MidiBackend, O: DeviceObserver> DeviceSession<B, O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(backend: B, config: SessionConfig, observer: Arc<O>) -> Self {
        Self {
            backend,
            observer,
            config,
            registry: PortRegistry::new(),
            ctx: SessionContext::new(),
            attempt: None,
            transfer: None,
            snapshot: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn state(&self) -> ConnectionState {
        self.ctx.state
    }

    /// Sequence number of the current attempt.
    pub fn sequence(&self) -> Option<u64> {
        self.attempt.as_ref().map(|a| a.sequence)
    }

    pub fn token(&self) -> Option<&Value> {
        self.ctx.token.as_ref()
    }

    /// Last accepted snapshot of the connected device.
    pub fn snapshot(&self) -> Option<&DeviceSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.attempt.as_ref().map(|a| &a.device)
    }

    /// State of the current or last finished firmware transfer.
    pub fn transfer_state(&self) -> Option<TransferState> {
        self.transfer.as_ref().map(FirmwareTransfer::state)
    }

    /// A configuration write waits for its confirming snapshot.
    pub fn is_write_pending(&self) -> bool {
        self.ctx.write_deadline.is_some()
    }

    fn emit(&self, event: DeviceEvent) {
        self.observer.on_event(&event);
    }

    fn notice(&self, severity: Severity, message: impl Into<String>) {
        self.emit(DeviceEvent::Notice {
            severity,
            message: message.into(),
        });
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(DeviceEvent::Log {
            level,
            message: message.into(),
        });
    }

    fn goto_state(&mut self, to: ConnectionState) {
        if let Some(from) = self.ctx.goto_state(to) {
            self.emit(DeviceEvent::StateChanged { from, to });
        }
    }

    // Ports

    /// Enumerate the platform ports and apply the changes since the last call.
    pub fn refresh_ports(&mut self) -> Result<Vec<Port>, SessionError> {
        let ports = self.backend.ports()?;
        let changes = self.registry.update(ports);
        for port in &changes {
            self.handle_port_change(port);
        }
        Ok(changes)
    }

    /// React to a port appearing or vanishing.
    pub fn handle_port_change(&mut self, port: &Port) {
        self.emit(DeviceEvent::PortChanged { port: port.clone() });
        if port.state != PortState::Disconnected {
            return;
        }

        let ours = self.attempt.as_ref().is_some_and(|a| {
            let side = match port.direction {
                Direction::Input => &a.device.input,
                Direction::Output => &a.device.output,
            };
            side.as_ref().is_some_and(|p| p.id == port.id)
        });
        if ours {
            self.log(LogLevel::Info, format!("Device port removed: {}", port.name));
            self.notice(Severity::Info, format!("{} was disconnected.", port.name));
            self.disconnect();
        }
    }

    /// Devices assembled from the known ports.
    pub fn devices(&self, filter: DeviceFilter) -> Vec<DeviceDescriptor> {
        self.registry.devices(filter)
    }

    /// Connect to the configured auto-connect device if it is present.
    /// Returns whether a connection attempt was started.
    pub fn auto_connect(&mut self) -> Result<bool, SessionError> {
        if self.attempt.is_some() {
            return Ok(false);
        }
        let Some(name) = self.config.auto_connect.clone() else {
            return Ok(false);
        };

        let devices = self.devices(DeviceFilter::Paired);
        let Some(device) = find_by_name(&devices, &name) else {
            return Ok(false);
        };
        self.connect(device)?;
        Ok(true)
    }

    // Lifecycle

    /// Open `device` and request its state. Supersedes any current attempt.
    #[instrument(skip(self, device), fields(device = %device.name))]
    pub fn connect(&mut self, device: &DeviceDescriptor) -> Result<u64, SessionError> {
        self.disconnect();

        let (Some(input), Some(output)) = (&device.input, &device.output) else {
            return Err(SessionError::Unpaired(device.id.clone()));
        };

        let sequence = self.ctx.next_sequence();
        self.goto_state(ConnectionState::Connecting);

        let (tx, rx) = mpsc::channel();
        let link = match self.backend.open(input, output, tx) {
            Ok(link) => link,
            Err(e) => {
                warn!(error = %e, "Unable to open device");
                self.notice(Severity::Error, format!("Unable to connect to {}: {}", device.name, e));
                self.goto_state(ConnectionState::Disconnected);
                self.emit(DeviceEvent::Reset);
                return Err(e.into());
            }
        };

        info!(sequence, id = %device.id, "Connecting");
        self.ctx.connect_deadline = Some(Instant::now() + self.config.connect_timeout());
        self.attempt = Some(Attempt {
            sequence,
            device: device.clone(),
            link,
            events: rx,
            opened: false,
        });
        Ok(sequence)
    }

    /// Close the current connection. Does nothing when disconnected.
    pub fn disconnect(&mut self) {
        let attempt = self.attempt.take();
        let was = self.ctx.state;

        // Finished transfers stay readable through `transfer_state`.
        if self.transfer.as_ref().is_some_and(FirmwareTransfer::is_active) {
            if let Some(transfer) = self.transfer.take() {
                self.notice(
                    Severity::Error,
                    format!("Firmware update interrupted at offset {}.", transfer.cursor()),
                );
            }
        }
        self.snapshot = None;
        self.ctx.reset();

        if attempt.is_none() && was == ConnectionState::Disconnected {
            return;
        }

        if let Some(attempt) = attempt {
            debug!(sequence = attempt.sequence, "Closing connection");
        }
        if was != ConnectionState::Disconnected {
            self.emit(DeviceEvent::StateChanged {
                from: was,
                to: ConnectionState::Disconnected,
            });
        }
        self.emit(DeviceEvent::Reset);
    }

    // Requests

    fn send_raw(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let attempt = match self.attempt.as_mut() {
            Some(attempt) if attempt.opened => attempt,
            _ => return Err(SessionError::NotConnected),
        };

        if let Err(e) = attempt.link.send(bytes) {
            warn!(error = %e, "Send failed");
            self.notice(Severity::Error, format!("Unable to send to device: {}", e));
            self.disconnect();
            return Err(e.into());
        }

        self.emit(DeviceEvent::Packet {
            direction: PacketDirection::Tx,
            length: bytes.len(),
        });
        Ok(())
    }

    /// Send a structured request, tagged with the session token.
    pub fn send_request(&mut self, request: &Request) -> Result<(), SessionError> {
        let envelope = request.to_envelope(self.ctx.token.as_ref());
        let bytes = sysex::encode_json(&envelope)?;
        debug!(method = request.method(), len = bytes.len(), "Sending request");
        self.send_raw(&bytes)
    }

    pub fn send_get_all(&mut self) -> Result<(), SessionError> {
        self.send_request(&Request::GetAll)
    }

    /// Reboot the device. The connection is closed right away.
    pub fn send_reboot(&mut self) -> Result<(), SessionError> {
        self.send_request(&Request::Reboot { ports: None })?;
        self.disconnect();
        Ok(())
    }

    /// Reboot announcing the number of ports the device asked for.
    pub fn send_reboot_with_ports(&mut self) -> Result<(), SessionError> {
        let ports = self
            .snapshot
            .as_ref()
            .and_then(DeviceSnapshot::announced_ports)
            .ok_or(SessionError::Unsupported("port announcement"))?;
        self.send_request(&Request::Reboot { ports: Some(ports) })?;
        self.disconnect();
        Ok(())
    }

    /// Write configuration values; the device answers with a new snapshot.
    pub fn write_configuration(&mut self, configuration: Value) -> Result<(), SessionError> {
        self.send_request(&Request::WriteConfiguration { configuration })?;
        self.ctx.write_deadline = Some(Instant::now() + self.config.write_timeout());
        Ok(())
    }

    /// Factory reset. The device reboots, so the connection is closed.
    pub fn erase_configuration(&mut self) -> Result<(), SessionError> {
        self.send_request(&Request::EraseConfiguration)?;
        self.disconnect();
        Ok(())
    }

    pub fn switch_channel(&mut self, channel: u8) -> Result<(), SessionError> {
        if channel > MAX_CHANNEL {
            return Err(CodecError::InvalidChannel(channel).into());
        }
        self.send_request(&Request::SwitchChannel { channel })
    }

    /// System reset message followed by a state refresh.
    pub fn send_system_reset_and_refresh(&mut self) -> Result<(), SessionError> {
        self.send_raw(&protocol::encode_system_reset())?;
        self.send_get_all()
    }

    /// Send arbitrary JSON text as SysEx, unchanged.
    pub fn send_json(&mut self, text: &str) -> Result<(), SessionError> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                self.notice(Severity::Error, format!("Invalid JSON: {}", e));
                return Err(SessionError::InvalidJson(e.to_string()));
            }
        };
        let bytes = sysex::encode_json(&value)?;
        self.send_raw(&bytes)
    }

    pub fn send_message(&mut self, message: &ChannelMessage) -> Result<(), SessionError> {
        let bytes = message.encode()?;
        self.send_raw(&bytes)
    }

    // Firmware

    /// Start sending `image` to the connected device.
    pub fn start_firmware_update(&mut self, image: FirmwareImage) -> Result<(), SessionError> {
        if self.ctx.state != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        if self.transfer.as_ref().is_some_and(FirmwareTransfer::is_active) {
            return Err(TransferError::Busy.into());
        }

        let mut transfer = FirmwareTransfer::new(image);
        let step = transfer.start()?;
        self.transfer = Some(transfer);
        self.apply_step(step)
    }

    fn apply_step(&mut self, step: TransferStep) -> Result<(), SessionError> {
        match step {
            TransferStep::Send {
                request,
                offset,
                total,
            } => {
                self.emit(DeviceEvent::Progress { offset, total });
                self.send_request(&request)
            }
            TransferStep::Complete => {
                self.notice(Severity::Success, "Firmware update complete. The device reboots.");
                self.disconnect();
                Ok(())
            }
        }
    }

    fn handle_firmware_ack(&mut self, status: protocol::FirmwareStatus) {
        let Some(transfer) = self.transfer.as_mut() else {
            debug!(status = %status, "Firmware acknowledgment without transfer");
            return;
        };

        match transfer.on_ack(&status) {
            Ok(step) => {
                // Send failures already disconnected and reported.
                let _ = self.apply_step(step);
            }
            Err(TransferError::UnexpectedAck { state }) => {
                debug!(state = %state, "Ignoring firmware acknowledgment");
            }
            Err(e) => self.notice(Severity::Error, e.to_string()),
        }
    }

    // Event loop

    /// Handle all pending link events and expired timers.
    /// Returns the number of link events handled.
    pub fn process(&mut self, now: Instant) -> usize {
        let mut handled = 0;
        loop {
            let Some(attempt) = self.attempt.as_ref() else {
                break;
            };
            match attempt.events.try_recv() {
                Ok(event) => {
                    handled += 1;
                    self.handle_link_event(event);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.handle_link_event(LinkEvent::Closed("link dropped".into()));
                    break;
                }
            }
        }

        while let Some(timer) = self.ctx.take_expired(now) {
            self.handle_timer(timer);
        }
        handled
    }

    /// Block until a link event arrives, a timer is due, or `timeout` passes.
    pub fn wait(&mut self, timeout: Duration) -> usize {
        let now = Instant::now();
        let deadline = match self.ctx.next_deadline() {
            Some(due) => due.min(now + timeout),
            None => now + timeout,
        };
        let remaining = deadline.saturating_duration_since(now);

        let mut handled = 0;
        match self.attempt.as_ref() {
            Some(attempt) => match attempt.events.recv_timeout(remaining) {
                Ok(event) => {
                    handled += 1;
                    self.handle_link_event(event);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.handle_link_event(LinkEvent::Closed("link dropped".into()));
                }
            },
            None => thread::sleep(remaining),
        }

        handled + self.process(Instant::now())
    }

    /// Drive the session until `done` holds or `timeout` passes.
    pub fn run_until<F>(&mut self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut(&Self) -> bool,
    {
        let end = Instant::now() + timeout;
        loop {
            if done(self) {
                return true;
            }
            let now = Instant::now();
            if now >= end {
                return false;
            }
            self.wait(end - now);
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened => {
                let Some(attempt) = self.attempt.as_mut() else {
                    return;
                };
                attempt.opened = true;
                info!(sequence = attempt.sequence, "Ports open, requesting device state");
                // A failed send disconnects and reports.
                let _ = self.send_get_all();
            }
            LinkEvent::Message(bytes) => {
                self.emit(DeviceEvent::Packet {
                    direction: PacketDirection::Rx,
                    length: bytes.len(),
                });
                self.handle_message(&bytes);
            }
            LinkEvent::Closed(reason) => {
                warn!(reason = %reason, "Link closed");
                self.notice(Severity::Error, format!("Connection closed: {}", reason));
                self.disconnect();
            }
        }
    }

    fn handle_message(&mut self, bytes: &[u8]) {
        match protocol::decode(bytes) {
            Ok(Some(Inbound::Json(value))) => {
                if let Some(reply) = Reply::from_envelope(&value) {
                    self.handle_reply(reply);
                }
            }
            Ok(Some(Inbound::Channel(message))) => self.emit(DeviceEvent::Midi(message)),
            Ok(Some(Inbound::System(_))) | Ok(None) => {}
            Err(e) => self.log(LogLevel::Warn, format!("Dropping malformed message: {}", e)),
        }
    }

    fn handle_reply(&mut self, reply: Reply) {
        match classify_reply(&mut self.ctx, reply) {
            ReplyOutcome::Ignored => {}
            ReplyOutcome::FirmwareAck(status) => self.handle_firmware_ack(status),
            ReplyOutcome::Snapshot(snapshot) => {
                self.ctx.connect_deadline = None;
                if self.ctx.state != ConnectionState::Connected {
                    info!(product = %snapshot.product(), "Connected");
                }
                self.goto_state(ConnectionState::Connected);
                if self.ctx.write_deadline.take().is_some() {
                    self.notice(Severity::Success, "Configuration updated.");
                }
                self.snapshot = Some(snapshot.clone());
                self.emit(DeviceEvent::Snapshot(snapshot));
            }
            ReplyOutcome::MissingMetadata => {
                self.notice(Severity::Error, "Unknown device response: missing metadata.");
                self.disconnect();
            }
        }
    }

    fn handle_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Connect => {
                warn!("Connect timeout");
                self.notice(Severity::Error, "No response from device.");
                self.disconnect();
            }
            Timer::WriteConfirmation => {
                self.notice(
                    Severity::Warning,
                    "No reply from device. Changes might not be saved.",
                );
            }
        }
    }
}

impl<B: MidiBackend, O: DeviceObserver> Drop for DeviceSession<B, O> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockBackend;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<DeviceEvent>>,
    }

    impl DeviceObserver for Recorder {
        fn on_event(&self, event: &DeviceEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    impl Recorder {
        fn notices(&self) -> Vec<(Severity, String)> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    DeviceEvent::Notice { severity, message } => Some((*severity, message.clone())),
                    _ => None,
                })
                .collect()
        }

        fn snapshots(&self) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| matches!(e, DeviceEvent::Snapshot(_)))
                .count()
        }

        fn resets(&self) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| matches!(e, DeviceEvent::Reset))
                .count()
        }
    }

    fn widget_ports() -> Vec<Port> {
        vec![Port::input("in-1", "Widget"), Port::output("out-1", "Widget")]
    }

    fn setup() -> (MockBackend, Arc<Recorder>, DeviceSession<MockBackend, Recorder>) {
        let mock = MockBackend::with_ports(widget_ports());
        let recorder = Arc::new(Recorder::default());
        let session =
            DeviceSession::with_observer(mock.clone(), SessionConfig::default(), recorder.clone());
        (mock, recorder, session)
    }

    fn connected() -> (MockBackend, Arc<Recorder>, DeviceSession<MockBackend, Recorder>) {
        let (mock, recorder, mut session) = setup();
        session.refresh_ports().unwrap();
        let device = session.devices(DeviceFilter::Paired)[0].clone();
        session.connect(&device).unwrap();
        session.process(Instant::now());
        mock.inject_reply(
            0,
            json!({"token": 5, "metadata": {"product": "Widget"}, "system": {"ports": {"announce": 1}}}),
        );
        session.process(Instant::now());
        assert_eq!(session.state(), ConnectionState::Connected);
        (mock, recorder, session)
    }

    #[test]
    fn test_connect_requests_state() {
        let (mock, recorder, mut session) = setup();
        session.refresh_ports().unwrap();
        let device = session.devices(DeviceFilter::Paired)[0].clone();

        assert_eq!(session.connect(&device).unwrap(), 1);
        assert_eq!(session.state(), ConnectionState::Connecting);
        session.process(Instant::now());

        assert_eq!(mock.requests(0), vec![json!({"method": "getAll"})]);
        mock.inject_reply(0, json!({"token": 5, "metadata": {}}));
        session.process(Instant::now());

        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.token(), Some(&json!(5)));
        assert_eq!(recorder.snapshots(), 1);
    }

    #[test]
    fn test_requests_carry_token() {
        let (mock, _recorder, mut session) = connected();
        session.switch_channel(3).unwrap();
        let requests = mock.requests(0);
        assert_eq!(
            requests.last().unwrap(),
            &json!({"method": "switchChannel", "channel": 3, "token": 5})
        );
        assert!(session.switch_channel(16).is_err());
    }

    #[test]
    fn test_send_before_open_fails() {
        let (mock, _recorder, mut session) = setup();
        mock.set_auto_open(false);
        session.refresh_ports().unwrap();
        let device = session.devices(DeviceFilter::Paired)[0].clone();
        session.connect(&device).unwrap();

        assert!(matches!(session.send_get_all(), Err(SessionError::NotConnected)));
        assert!(mock.writes(0).is_empty());
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (mock, recorder, mut session) = connected();
        session.disconnect();
        session.disconnect();
        assert_eq!(recorder.resets(), 1);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.token().is_none());
        assert!(mock.is_closed(0));
    }

    #[test]
    fn test_reboot_disconnects() {
        let (mock, _recorder, mut session) = connected();
        session.send_reboot().unwrap();
        assert_eq!(mock.requests(0).last().unwrap()["method"], "reboot");
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(mock.is_closed(0));
    }

    #[test]
    fn test_reboot_with_announced_ports() {
        let (mock, _recorder, mut session) = connected();
        session.send_reboot_with_ports().unwrap();
        assert_eq!(
            mock.requests(0).last().unwrap(),
            &json!({"method": "reboot", "reboot": {"ports": 16}, "token": 5})
        );
    }

    #[test]
    fn test_connect_timeout() {
        let (mock, recorder, mut session) = setup();
        session.refresh_ports().unwrap();
        let device = session.devices(DeviceFilter::Paired)[0].clone();
        session.connect(&device).unwrap();
        session.process(Instant::now());

        session.process(Instant::now() + Duration::from_secs(3));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(mock.is_closed(0));
        assert_eq!(
            recorder.notices(),
            vec![(Severity::Error, "No response from device.".to_string())]
        );
    }

    #[test]
    fn test_foreign_token_keeps_connect_deadline() {
        let (mock, _recorder, mut session) = setup();
        session.refresh_ports().unwrap();
        let device = session.devices(DeviceFilter::Paired)[0].clone();
        session.connect(&device).unwrap();
        session.process(Instant::now());

        // Accepted reply without metadata would disconnect, so establish
        // the token through a firmware status first.
        mock.inject_reply(0, json!({"token": 1, "firmware": {"status": "success"}}));
        mock.inject_reply(0, json!({"token": 2, "metadata": {}}));
        session.process(Instant::now());
        assert_eq!(session.state(), ConnectionState::Connecting);

        session.process(Instant::now() + Duration::from_secs(3));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_missing_metadata_disconnects() {
        let (mock, recorder, mut session) = setup();
        session.refresh_ports().unwrap();
        let device = session.devices(DeviceFilter::Paired)[0].clone();
        session.connect(&device).unwrap();
        session.process(Instant::now());

        mock.inject_reply(0, json!({"system": {}}));
        session.process(Instant::now());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(recorder.notices()[0].0, Severity::Error);
    }

    #[test]
    fn test_malformed_json_changes_nothing() {
        let (mock, recorder, mut session) = connected();
        let mut bytes = vec![0xf0, 0x7d];
        bytes.extend_from_slice(b"{broken}");
        bytes.push(0xf7);
        mock.inject(0, &bytes);
        session.process(Instant::now());

        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(recorder.snapshots(), 1);
        assert!(recorder.notices().is_empty());

        let events = recorder.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            DeviceEvent::Log { level: LogLevel::Warn, message } if message.contains("malformed")
        )));
    }

    #[test]
    fn test_write_configuration_confirmed() {
        let (mock, recorder, mut session) = connected();
        session
            .write_configuration(json!({"midi": {"channel": 2}}))
            .unwrap();
        mock.inject_reply(0, json!({"token": 5, "metadata": {}}));
        session.process(Instant::now());

        assert_eq!(
            recorder.notices(),
            vec![(Severity::Success, "Configuration updated.".to_string())]
        );
        assert!(!session.is_write_pending());
    }

    #[test]
    fn test_write_configuration_timeout() {
        let (_mock, recorder, mut session) = connected();
        session.write_configuration(json!({})).unwrap();
        session.process(Instant::now() + Duration::from_secs(2));

        assert_eq!(
            recorder.notices(),
            vec![(
                Severity::Warning,
                "No reply from device. Changes might not be saved.".to_string()
            )]
        );
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_erase_configuration_disconnects() {
        let (mock, _recorder, mut session) = connected();
        session.erase_configuration().unwrap();
        assert_eq!(mock.requests(0).last().unwrap()["method"], "eraseConfiguration");
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_system_reset_and_refresh() {
        let (mock, _recorder, mut session) = connected();
        session.send_system_reset_and_refresh().unwrap();
        let writes = mock.writes(0);
        assert_eq!(writes[writes.len() - 2], vec![0xff]);
        assert_eq!(mock.requests(0).last().unwrap()["method"], "getAll");
    }

    #[test]
    fn test_send_json_passthrough() {
        let (mock, recorder, mut session) = connected();
        let before = mock.writes(0).len();

        assert!(matches!(
            session.send_json("{not json"),
            Err(SessionError::InvalidJson(_))
        ));
        assert_eq!(mock.writes(0).len(), before);
        assert_eq!(recorder.notices().len(), 1);

        session.send_json(r#"{"com.versioduo.device": {"method": "hello"}}"#).unwrap();
        assert_eq!(mock.requests(0).last().unwrap(), &json!({"method": "hello"}));
    }

    #[test]
    fn test_channel_messages() {
        let (mock, recorder, mut session) = connected();
        session
            .send_message(&ChannelMessage::NoteOn {
                channel: 2,
                note: 60,
                velocity: 100,
            })
            .unwrap();
        assert_eq!(mock.writes(0).last().unwrap(), &vec![0x92, 60, 100]);

        mock.inject(0, &[0xb1, 7, 90]);
        session.process(Instant::now());
        let events = recorder.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            DeviceEvent::Midi(ChannelMessage::ControlChange {
                channel: 1,
                controller: 7,
                value: 90
            })
        )));
    }

    #[test]
    fn test_unplug_disconnects() {
        let (mock, recorder, mut session) = connected();
        mock.set_ports(vec![Port::output("out-1", "Widget")]);
        session.refresh_ports().unwrap();

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(recorder.resets(), 1);
        assert!(mock.is_closed(0));
    }

    #[test]
    fn test_link_closed_by_platform() {
        let (mock, _recorder, mut session) = connected();
        mock.emit(0, LinkEvent::Closed("device gone".into()));
        session.process(Instant::now());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_open_failure() {
        let (mock, recorder, mut session) = setup();
        mock.set_fail_open(true);
        session.refresh_ports().unwrap();
        let device = session.devices(DeviceFilter::Paired)[0].clone();

        assert!(matches!(
            session.connect(&device),
            Err(SessionError::Transport(TransportError::OpenFailed { .. }))
        ));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(recorder.notices().len(), 1);
        assert_eq!(recorder.resets(), 1);
    }

    #[test]
    fn test_auto_connect_by_name() {
        let mock = MockBackend::with_ports(vec![
            Port::input("1", "Widget MIDI 1"),
            Port::output("2", "Widget MIDI 1"),
        ]);
        let config = SessionConfig {
            auto_connect: Some("Widget".into()),
            ..Default::default()
        };
        let mut session =
            DeviceSession::with_observer(mock.clone(), config, Arc::new(Recorder::default()));
        session.refresh_ports().unwrap();

        assert!(session.auto_connect().unwrap());
        assert_eq!(session.device().unwrap().id, "12");
        assert!(!session.auto_connect().unwrap());
    }

    #[test]
    fn test_firmware_requires_connection() {
        let (_mock, _recorder, mut session) = setup();
        let mut data = vec![1u8; 32];
        data.push(0);
        data.extend_from_slice(br#"{"com.versioduo.firmware":{"id":"fw","version":1}}"#);
        data.push(0);
        let image = FirmwareImage::from_bytes(data).unwrap();
        assert!(matches!(
            session.start_firmware_update(image),
            Err(SessionError::NotConnected)
        ));
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = SessionConfig {
            auto_connect: Some("Widget".into()),
            ..Default::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: SessionConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.auto_connect.as_deref(), Some("Widget"));
        assert_eq!(parsed.connect_timeout_ms, 2000);

        let partial: SessionConfig = toml::from_str("write_timeout_ms = 500").unwrap();
        assert_eq!(partial.write_timeout_ms, 500);
        assert_eq!(partial.client_name, "v2midi");
    }
}
