//! Device snapshots and nested-path access.
//!
//! A snapshot is the full device state carried by an accepted `getAll`
//! style reply. Its schema is owned by the device; only a few well-known
//! paths are read here.

use serde_json::{Map, Value};

use crate::protocol::MAX_ANNOUNCED_PORTS;

/// Full device state from an accepted reply.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    body: Map<String, Value>,
}

impl DeviceSnapshot {
    /// Wrap a reply body. Returns `None` unless `metadata` is an object.
    pub fn new(body: Map<String, Value>) -> Option<Self> {
        if !body.get("metadata").is_some_and(Value::is_object) {
            return None;
        }
        Some(Self { body })
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.body.clone())
    }

    /// Value at a dot separated path, e.g. `system.firmware.id`.
    /// Numeric segments index into arrays.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = self.body.get(segments.next()?)?;
        segments.try_fold(first, step)
    }

    pub fn str_at(&self, path: &str) -> Option<&str> {
        self.lookup(path)?.as_str()
    }

    pub fn u64_at(&self, path: &str) -> Option<u64> {
        self.lookup(path)?.as_u64()
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        // Checked in `new`.
        match self.body.get("metadata") {
            Some(Value::Object(metadata)) => metadata,
            _ => unreachable!("snapshot without metadata object"),
        }
    }

    /// Product name for log lines.
    pub fn product(&self) -> &str {
        self.str_at("metadata.product").unwrap_or("device")
    }

    pub fn firmware_id(&self) -> Option<&str> {
        self.str_at("system.firmware.id")
    }

    pub fn firmware_hash(&self) -> Option<&str> {
        self.str_at("system.firmware.hash")
    }

    pub fn firmware_version(&self) -> Option<u64> {
        self.u64_at("system.firmware.version")
    }

    /// Version the device reports in its metadata, else the firmware version.
    pub fn installed_version(&self) -> Option<u64> {
        self.u64_at("metadata.version").or_else(|| self.firmware_version())
    }

    pub fn board(&self) -> Option<&str> {
        self.str_at("system.board")
    }

    /// Number of ports to request on reboot. A device announcing `1`
    /// only signals support and gets the maximum.
    pub fn announced_ports(&self) -> Option<u64> {
        match self.u64_at("system.ports.announce")? {
            0 => None,
            1 => Some(MAX_ANNOUNCED_PORTS),
            n => Some(n),
        }
    }

    /// Whether the device stores a configuration worth backing up.
    pub fn has_stored_configuration(&self) -> bool {
        self.u64_at("system.eeprom.used").is_some_and(|used| used > 0)
    }
}

fn step<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
        _ => None,
    }
}

/// Value at a dot separated path inside any JSON value.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, step)
}

/// Write `new` at a dot separated path, creating intermediate objects.
/// Non-object values in the way are replaced.
pub fn set_path(value: &mut Value, path: &str, new: Value) {
    let mut current = value;
    for segment in path.split('.') {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            unreachable!()
        };
        current = map.entry(segment.to_string()).or_insert(Value::Null);
    }
    *current = new;
}
