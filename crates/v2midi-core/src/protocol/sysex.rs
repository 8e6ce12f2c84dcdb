//! JSON over SysEx.
//!
//! A structured message travels as `F0 7D <json> F7`. The JSON text is
//! plain ASCII: every character at or above 0x7F is written as a `\uXXXX`
//! escape, so no payload byte ever has the high bit set.

use serde_json::Value;

use super::constants::{STATUS_SYSTEM_EXCLUSIVE, STATUS_SYSTEM_EXCLUSIVE_END, SYSEX_RESEARCH_ID};
use super::message::CodecError;

/// Encode a JSON value as a SysEx message.
pub fn encode_json(value: &Value) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_string(value).map_err(|e| CodecError::Serialize(e.to_string()))?;
    let escaped = escape_7bit(&json);

    let mut sysex = Vec::with_capacity(escaped.len() + 3);
    sysex.push(STATUS_SYSTEM_EXCLUSIVE);
    sysex.push(SYSEX_RESEARCH_ID);
    sysex.extend_from_slice(escaped.as_bytes());
    sysex.push(STATUS_SYSTEM_EXCLUSIVE_END);
    Ok(sysex)
}

/// Replace every character >= 0x7F with its UTF-16 `\uXXXX` escape(s).
pub fn escape_7bit(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut units = [0u16; 2];
    for c in json.chars() {
        if (c as u32) < 0x7f {
            out.push(c);
            continue;
        }
        for unit in c.encode_utf16(&mut units) {
            out.push_str(&format!("\\u{:04x}", unit));
        }
    }
    out
}

/// Extract the JSON payload of a SysEx message.
///
/// Foreign traffic (another manufacturer ID, a payload that is not a JSON
/// object) yields `Ok(None)`. A payload that looks like ours but does not
/// parse is reported as `CodecError::MalformedJson`.
pub fn decode_json(bytes: &[u8]) -> Result<Option<Value>, CodecError> {
    let Some(payload) = json_payload(bytes) else {
        return Ok(None);
    };

    let text = std::str::from_utf8(payload).map_err(|e| CodecError::MalformedJson(e.to_string()))?;
    let value = serde_json::from_str(text).map_err(|e| CodecError::MalformedJson(e.to_string()))?;
    Ok(Some(value))
}

fn json_payload(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.len() < 5 {
        return None;
    }
    if bytes[0] != STATUS_SYSTEM_EXCLUSIVE || bytes[1] != SYSEX_RESEARCH_ID {
        return None;
    }
    if bytes[bytes.len() - 1] != STATUS_SYSTEM_EXCLUSIVE_END {
        return None;
    }

    let payload = &bytes[2..bytes.len() - 1];
    if payload.first() != Some(&b'{') || payload.last() != Some(&b'}') {
        return None;
    }
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sysex_framing() {
        let bytes = encode_json(&json!({"a": 1})).unwrap();
        assert_eq!(bytes[0], 0xf0);
        assert_eq!(bytes[1], 0x7d);
        assert_eq!(&bytes[2..bytes.len() - 1], br#"{"a":1}"#);
        assert_eq!(*bytes.last().unwrap(), 0xf7);
    }

    #[test]
    fn test_unicode_is_escaped_and_roundtrips() {
        let value = json!({
            "com.versioduo.device": {
                "method": "writeConfiguration",
                "configuration": {
                    "name": "Grüße ♯ 🎹",
                    "del": "\u{7f}",
                    "nested": [1, 2.5, null, true, {"k": "ö"}]
                }
            }
        });

        let bytes = encode_json(&value).unwrap();
        for &b in &bytes[2..bytes.len() - 1] {
            assert!(b < 0x80, "payload byte 0x{:02x} has the high bit set", b);
        }
        assert!(!bytes[2..bytes.len() - 1].contains(&0x7f));

        let decoded = decode_json(&bytes).unwrap().unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_astral_escape_uses_surrogates() {
        assert_eq!(escape_7bit("🎹"), "\\ud83c\\udfb9");
        assert_eq!(escape_7bit("é"), "\\u00e9");
        assert_eq!(escape_7bit("plain"), "plain");
    }

    #[test]
    fn test_foreign_sysex_ignored() {
        // Other manufacturer.
        assert_eq!(decode_json(&[0xf0, 0x41, b'{', b'}', 0xf7]).unwrap(), None);
        // Not a JSON object.
        assert_eq!(decode_json(&[0xf0, 0x7d, b'[', b']', 0xf7]).unwrap(), None);
        // Not SysEx at all.
        assert_eq!(decode_json(&[0x90, 60, 100]).unwrap(), None);
    }

    #[test]
    fn test_malformed_json_reported() {
        let bytes = [0xf0, 0x7d, b'{', b'x', b'}', 0xf7];
        assert!(matches!(
            decode_json(&bytes),
            Err(CodecError::MalformedJson(_))
        ));
    }
}
