//! End-to-end session scenarios against the mock backend.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use v2midi_core::firmware::TransferState;
use v2midi_core::ports::{DeviceFilter, Port};
use v2midi_core::{
    ConnectionState, DeviceEvent, DeviceObserver, DeviceSession, FirmwareImage, MockBackend,
    SessionConfig, Severity,
};

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
    fn progress(&self) -> Vec<(usize, usize)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::Progress { offset, total } => Some((*offset, *total)),
                _ => None,
            })
            .collect()
    }

    fn products(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::Snapshot(s) => Some(s.product().to_string()),
                _ => None,
            })
            .collect()
    }
}

fn session_with(
    ports: Vec<Port>,
) -> (MockBackend, Arc<Recorder>, DeviceSession<MockBackend, Recorder>) {
    let mock = MockBackend::with_ports(ports);
    let recorder = Arc::new(Recorder::default());
    let mut session =
        DeviceSession::with_observer(mock.clone(), SessionConfig::default(), recorder.clone());
    session.refresh_ports().unwrap();
    (mock, recorder, session)
}

fn device_reply(token: u64, product: &str) -> Value {
    json!({
        "token": token,
        "metadata": {"product": product},
        "system": {
            "board": "widget-b",
            "firmware": {"id": "com.example.widget", "version": 3, "hash": "0000"}
        }
    })
}

/// Image of exactly `len` bytes with a metadata trailer.
fn image_of_len(len: usize) -> FirmwareImage {
    let trailer =
        br#"{"com.versioduo.firmware":{"id":"com.example.widget","board":"widget-b","version":4}}"#;
    let mut data = vec![0xa5; len - trailer.len() - 2];
    data.push(0);
    data.extend_from_slice(trailer);
    data.push(0);
    assert_eq!(data.len(), len);
    FirmwareImage::from_bytes(data).unwrap()
}

fn firmware_ack(token: u64, status: &str) -> Value {
    json!({"token": token, "firmware": {"status": status}})
}

#[test]
fn test_firmware_update_20000_bytes() {
    let (mock, recorder, mut session) =
        session_with(vec![Port::input("i", "Widget"), Port::output("o", "Widget")]);
    let device = session.devices(DeviceFilter::Paired)[0].clone();

    session.connect(&device).unwrap();
    session.process(Instant::now());
    mock.inject_reply(0, device_reply(77, "Widget"));
    session.process(Instant::now());
    assert_eq!(session.state(), ConnectionState::Connected);

    let image = image_of_len(20000);
    let hash = image.hash().to_string();
    let bytes = image.bytes().to_vec();
    session.start_firmware_update(image).unwrap();

    for _ in 0..4 {
        mock.inject_reply(0, firmware_ack(77, "success"));
        session.process(Instant::now());
    }

    let requests = mock.requests(0);
    assert_eq!(requests.len(), 5);
    assert_eq!(requests[0]["method"], "getAll");

    let blocks: Vec<&Value> = requests[1..].iter().map(|r| &r["firmware"]).collect();
    let offsets: Vec<u64> = blocks.iter().map(|b| b["offset"].as_u64().unwrap()).collect();
    assert_eq!(offsets, vec![0, 8192, 16384, 20000]);

    let last_block = STANDARD.decode(blocks[2]["data"].as_str().unwrap()).unwrap();
    assert_eq!(last_block.len(), 3616);
    assert_eq!(last_block, bytes[16384..]);

    // Exactly one request carries the hash: the empty finalize.
    assert!(blocks[..3].iter().all(|b| b.get("hash").is_none()));
    assert_eq!(blocks[3]["data"], "");
    assert_eq!(blocks[3]["hash"], json!(hash));
    assert!(requests[1..].iter().all(|r| r["token"] == 77));

    assert_eq!(
        recorder.progress(),
        vec![(0, 20000), (8192, 20000), (16384, 20000), (20000, 20000)]
    );
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.transfer_state(), Some(TransferState::Done));
    assert!(mock.is_closed(0));
}

#[test]
fn test_hash_mismatch_aborts_transfer() {
    let (mock, recorder, mut session) =
        session_with(vec![Port::input("i", "Widget"), Port::output("o", "Widget")]);
    let device = session.devices(DeviceFilter::Paired)[0].clone();
    session.connect(&device).unwrap();
    session.process(Instant::now());
    mock.inject_reply(0, device_reply(1, "Widget"));
    session.process(Instant::now());

    session.start_firmware_update(image_of_len(20000)).unwrap();
    mock.inject_reply(0, firmware_ack(1, "success"));
    mock.inject_reply(0, firmware_ack(1, "hashMismatch"));
    session.process(Instant::now());

    assert_eq!(
        session.transfer_state(),
        Some(TransferState::Failed { offset: 8192 })
    );
    // getAll plus two blocks; nothing after the failure.
    assert_eq!(mock.requests(0).len(), 3);
    assert_eq!(session.state(), ConnectionState::Connected);

    let events = recorder.events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        DeviceEvent::Notice { severity: Severity::Error, message } if message.contains("verifying")
    )));
}

#[test]
fn test_superseded_attempt_is_inert() {
    let (mock, recorder, mut session) = session_with(vec![
        Port::input("a-in", "Alpha"),
        Port::input("b-in", "Beta"),
        Port::output("a-out", "Alpha"),
        Port::output("b-out", "Beta"),
    ]);
    mock.set_auto_open(false);
    let devices = session.devices(DeviceFilter::Paired);
    assert_eq!(devices.len(), 2);

    assert_eq!(session.connect(&devices[0]).unwrap(), 1);
    assert_eq!(session.connect(&devices[1]).unwrap(), 2);
    assert_eq!(session.sequence(), Some(2));

    // The first attempt's channel is gone; its completion cannot land.
    assert!(!mock.complete_open(0));
    assert!(!mock.inject_reply(0, device_reply(9, "Alpha")));
    assert!(mock.is_closed(0));

    assert!(mock.complete_open(1));
    session.process(Instant::now());
    assert!(mock.writes(0).is_empty());
    assert_eq!(mock.requests(1), vec![json!({"method": "getAll"})]);

    mock.inject_reply(1, device_reply(3, "Beta"));
    session.process(Instant::now());
    assert_eq!(recorder.products(), vec!["Beta".to_string()]);
    assert_eq!(session.device().unwrap().name, "Beta");
}

#[test]
fn test_foreign_token_reply_discarded() {
    let (mock, recorder, mut session) =
        session_with(vec![Port::input("i", "Widget"), Port::output("o", "Widget")]);
    let device = session.devices(DeviceFilter::Paired)[0].clone();
    session.connect(&device).unwrap();
    session.process(Instant::now());

    mock.inject_reply(0, device_reply(10, "First"));
    mock.inject_reply(0, device_reply(11, "Rebooted"));
    mock.inject_reply(0, device_reply(10, "Again"));
    session.process(Instant::now());

    assert_eq!(
        recorder.products(),
        vec!["First".to_string(), "Again".to_string()]
    );
    assert_eq!(session.snapshot().unwrap().product(), "Again");
    assert_eq!(session.token(), Some(&json!(10)));
}

#[test]
fn test_interrupted_transfer_reported() {
    let (mock, recorder, mut session) =
        session_with(vec![Port::input("i", "Widget"), Port::output("o", "Widget")]);
    let device = session.devices(DeviceFilter::Paired)[0].clone();
    session.connect(&device).unwrap();
    session.process(Instant::now());
    mock.inject_reply(0, device_reply(1, "Widget"));
    session.process(Instant::now());

    session.start_firmware_update(image_of_len(20000)).unwrap();
    mock.inject_reply(0, firmware_ack(1, "success"));
    session.process(Instant::now());
    session.disconnect();

    let events = recorder.events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        DeviceEvent::Notice { message, .. } if message.contains("interrupted at offset 8192")
    )));
}
