//! Mock MIDI backend for testing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use super::traits::{LinkEvent, MidiBackend, MidiLink, TransportError};
use crate::ports::Port;
use crate::protocol::{DEVICE_NAMESPACE, sysex};

/// One link handed out by the mock.
struct LinkRecord {
    input: String,
    output: String,
    events: Sender<LinkEvent>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicBool>,
}

#[derive(Default)]
struct MockState {
    ports: Vec<Port>,
    links: Vec<LinkRecord>,
    /// Deliver `Opened` right away from `open`.
    auto_open: bool,
    fail_open: bool,
}

/// Mock backend for unit testing session logic.
///
/// Clones share state, so a test keeps one clone to script the device
/// while the session owns the other.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        let state = MockState {
            auto_open: true,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_ports(ports: Vec<Port>) -> Self {
        let mock = Self::new();
        mock.set_ports(ports);
        mock
    }

    pub fn set_ports(&self, ports: Vec<Port>) {
        self.state.lock().unwrap().ports = ports;
    }

    /// Hold `Opened` back until `complete_open` is called.
    pub fn set_auto_open(&self, auto_open: bool) {
        self.state.lock().unwrap().auto_open = auto_open;
    }

    /// Make the next `open` calls fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().unwrap().fail_open = fail;
    }

    /// Number of links opened so far.
    pub fn link_count(&self) -> usize {
        self.state.lock().unwrap().links.len()
    }

    /// Input and output port ids of a link.
    pub fn link_ports(&self, link: usize) -> (String, String) {
        let state = self.state.lock().unwrap();
        (state.links[link].input.clone(), state.links[link].output.clone())
    }

    /// Deliver an event on a link. Returns false if nobody listens anymore.
    pub fn emit(&self, link: usize, event: LinkEvent) -> bool {
        self.state.lock().unwrap().links[link].events.send(event).is_ok()
    }

    pub fn complete_open(&self, link: usize) -> bool {
        self.emit(link, LinkEvent::Opened)
    }

    pub fn inject(&self, link: usize, bytes: &[u8]) -> bool {
        self.emit(link, LinkEvent::Message(bytes.to_vec()))
    }

    /// Deliver a reply body wrapped in the device namespace.
    pub fn inject_reply(&self, link: usize, body: Value) -> bool {
        let mut envelope = Map::new();
        envelope.insert(DEVICE_NAMESPACE.into(), body);
        let bytes = sysex::encode_json(&Value::Object(envelope)).unwrap();
        self.inject(link, &bytes)
    }

    /// All messages written to a link.
    pub fn writes(&self, link: usize) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().links[link]
            .writes
            .lock()
            .unwrap()
            .clone()
    }

    /// Request bodies (below the namespace key) written to a link.
    pub fn requests(&self, link: usize) -> Vec<Value> {
        self.writes(link)
            .iter()
            .filter_map(|bytes| sysex::decode_json(bytes).ok().flatten())
            .filter_map(|value| value.get(DEVICE_NAMESPACE).cloned())
            .collect()
    }

    pub fn is_closed(&self, link: usize) -> bool {
        self.state.lock().unwrap().links[link]
            .closed
            .load(Ordering::SeqCst)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiBackend for MockBackend {
    fn ports(&mut self) -> Result<Vec<Port>, TransportError> {
        Ok(self.state.lock().unwrap().ports.clone())
    }

    fn open(
        &mut self,
        input: &Port,
        output: &Port,
        events: Sender<LinkEvent>,
    ) -> Result<Box<dyn MidiLink>, TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_open {
            return Err(TransportError::OpenFailed {
                name: input.name.clone(),
                message: "mock open failure".into(),
            });
        }

        let writes = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        if state.auto_open {
            let _ = events.send(LinkEvent::Opened);
        }
        state.links.push(LinkRecord {
            input: input.id.clone(),
            output: output.id.clone(),
            events,
            writes: writes.clone(),
            closed: closed.clone(),
        });

        Ok(Box::new(MockLink { writes, closed }))
    }
}

/// Link half handed to the session.
pub struct MockLink {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicBool>,
}

impl MidiLink for MockLink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.writes.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
