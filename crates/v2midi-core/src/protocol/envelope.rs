//! Request and reply envelopes.
//!
//! Requests are a closed set of known methods plus a `Custom` passthrough;
//! replies are kept as JSON but only read through checked accessors.

use std::fmt;

use serde_json::{Map, Value, json};

use super::constants::*;

/// A structured request to the device.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Describe yourself; the reply is a full device snapshot.
    GetAll,
    /// Reboot, optionally announcing `ports` virtual cables for children devices.
    Reboot { ports: Option<u64> },
    WriteConfiguration { configuration: Value },
    /// Factory reset; the device reboots.
    EraseConfiguration,
    /// Refresh the snapshot with the values of another input channel.
    SwitchChannel { channel: u8 },
    WriteFirmware(FirmwareBlock),
    /// Any other method; `fields` are merged into the request body.
    Custom {
        method: String,
        fields: Map<String, Value>,
    },
}

/// One firmware block request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareBlock {
    pub offset: usize,
    /// Base64 encoded block bytes.
    pub data: String,
    /// Lowercase hex content hash; present only on the finalize request.
    pub hash: Option<String>,
}

impl Request {
    pub fn method(&self) -> &str {
        match self {
            Request::GetAll => METHOD_GET_ALL,
            Request::Reboot { .. } => METHOD_REBOOT,
            Request::WriteConfiguration { .. } => METHOD_WRITE_CONFIGURATION,
            Request::EraseConfiguration => METHOD_ERASE_CONFIGURATION,
            Request::SwitchChannel { .. } => METHOD_SWITCH_CHANNEL,
            Request::WriteFirmware(_) => METHOD_WRITE_FIRMWARE,
            Request::Custom { method, .. } => method,
        }
    }

    /// Request body: `method`, the optional session token, method fields.
    pub fn to_body(&self, token: Option<&Value>) -> Value {
        let mut body = Map::new();

        match self {
            Request::GetAll | Request::EraseConfiguration => {}
            Request::Reboot { ports } => {
                if let Some(ports) = ports {
                    body.insert("reboot".into(), json!({ "ports": ports }));
                }
            }
            Request::WriteConfiguration { configuration } => {
                body.insert("configuration".into(), configuration.clone());
            }
            Request::SwitchChannel { channel } => {
                body.insert("channel".into(), json!(channel));
            }
            Request::WriteFirmware(block) => {
                let mut firmware = Map::new();
                firmware.insert("offset".into(), json!(block.offset));
                firmware.insert("data".into(), json!(block.data));
                if let Some(hash) = &block.hash {
                    firmware.insert("hash".into(), json!(hash));
                }
                body.insert("firmware".into(), Value::Object(firmware));
            }
            Request::Custom { fields, .. } => {
                body.extend(fields.clone());
            }
        }

        body.insert("method".into(), json!(self.method()));
        if let Some(token) = token {
            body.insert("token".into(), token.clone());
        }
        Value::Object(body)
    }

    /// Full envelope: `{ "com.versioduo.device": body }`.
    pub fn to_envelope(&self, token: Option<&Value>) -> Value {
        let mut envelope = Map::new();
        envelope.insert(DEVICE_NAMESPACE.into(), self.to_body(token));
        Value::Object(envelope)
    }
}

/// Status of a firmware block acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareStatus {
    Success,
    /// The device computed a different hash over the received image.
    HashMismatch,
    /// The block offset did not match the device's write position.
    InvalidOffset,
    /// Any other device-defined error.
    Other(String),
}

impl FirmwareStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "success" => FirmwareStatus::Success,
            "hashMismatch" => FirmwareStatus::HashMismatch,
            "invalidOffset" => FirmwareStatus::InvalidOffset,
            other => FirmwareStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FirmwareStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwareStatus::Success => write!(f, "success"),
            FirmwareStatus::HashMismatch => write!(f, "hashMismatch"),
            FirmwareStatus::InvalidOffset => write!(f, "invalidOffset"),
            FirmwareStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// A reply from the device, the object below the namespace key.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    body: Map<String, Value>,
}

impl Reply {
    /// Unwrap a decoded message. `None` if it is not addressed to our
    /// namespace or the namespace value is not an object.
    pub fn from_envelope(value: &Value) -> Option<Self> {
        match value.get(DEVICE_NAMESPACE)? {
            Value::Object(body) => Some(Self { body: body.clone() }),
            _ => None,
        }
    }

    pub fn token(&self) -> Option<&Value> {
        self.body.get("token").filter(|t| !t.is_null())
    }

    /// Status of a firmware acknowledgment, if this reply is one.
    pub fn firmware_status(&self) -> Option<FirmwareStatus> {
        let status = self.body.get("firmware")?.get("status")?.as_str()?;
        if status.is_empty() {
            return None;
        }
        Some(FirmwareStatus::parse(status))
    }

    /// Whether the reply carries the descriptive fields of a full snapshot.
    pub fn has_metadata(&self) -> bool {
        self.body.get("metadata").is_some_and(Value::is_object)
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn into_body(self) -> Map<String, Value> {
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_all_envelope() {
        let env = Request::GetAll.to_envelope(None);
        assert_eq!(env, json!({"com.versioduo.device": {"method": "getAll"}}));
    }

    #[test]
    fn test_token_attached() {
        let token = json!(12345);
        let body = Request::SwitchChannel { channel: 3 }.to_body(Some(&token));
        assert_eq!(
            body,
            json!({"method": "switchChannel", "channel": 3, "token": 12345})
        );
    }

    #[test]
    fn test_reboot_with_ports() {
        let body = Request::Reboot { ports: Some(16) }.to_body(None);
        assert_eq!(body, json!({"method": "reboot", "reboot": {"ports": 16}}));
        let plain = Request::Reboot { ports: None }.to_body(None);
        assert_eq!(plain, json!({"method": "reboot"}));
    }

    #[test]
    fn test_firmware_block_body() {
        let block = FirmwareBlock {
            offset: 8192,
            data: "AAEC".into(),
            hash: Some("abc".into()),
        };
        let body = Request::WriteFirmware(block).to_body(None);
        assert_eq!(body["method"], "writeFirmware");
        assert_eq!(body["firmware"]["offset"], 8192);
        assert_eq!(body["firmware"]["data"], "AAEC");
        assert_eq!(body["firmware"]["hash"], "abc");
    }

    #[test]
    fn test_custom_method_wins_over_fields() {
        let mut fields = Map::new();
        fields.insert("method".into(), json!("bogus"));
        fields.insert("x".into(), json!(1));
        let body = Request::Custom {
            method: "hello".into(),
            fields,
        }
        .to_body(None);
        assert_eq!(body, json!({"method": "hello", "x": 1}));
    }

    #[test]
    fn test_reply_accessors() {
        let reply = Reply::from_envelope(&json!({
            "com.versioduo.device": {
                "token": "boot-1",
                "firmware": {"status": "hashMismatch"}
            }
        }))
        .unwrap();
        assert_eq!(reply.token(), Some(&json!("boot-1")));
        assert_eq!(reply.firmware_status(), Some(FirmwareStatus::HashMismatch));
        assert!(!reply.has_metadata());

        assert!(Reply::from_envelope(&json!({"other": {}})).is_none());
        assert!(Reply::from_envelope(&json!({"com.versioduo.device": 1})).is_none());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(FirmwareStatus::parse("success"), FirmwareStatus::Success);
        assert_eq!(
            FirmwareStatus::parse("invalidOffset"),
            FirmwareStatus::InvalidOffset
        );
        assert_eq!(
            FirmwareStatus::parse("flashFailed"),
            FirmwareStatus::Other("flashFailed".into())
        );
    }
}
