//! Protocol module - wire format of the device link.

pub mod constants;
pub mod envelope;
pub mod message;
pub mod sysex;

pub use constants::*;
pub use envelope::{FirmwareBlock, FirmwareStatus, Reply, Request};
pub use message::{
    ChannelMessage, CodecError, MessageKind, controller_name, is_black_key, message_channel,
    message_type, note_name,
};

use serde_json::Value;

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Channel(ChannelMessage),
    /// JSON object carried in one of our SysEx messages.
    Json(Value),
    /// Any other system message (clock, reset, ...), by status byte.
    System(u8),
}

/// Decode one complete wire message.
///
/// `Ok(None)` means the message is not for us (foreign SysEx, stray data
/// bytes) and should be dropped silently.
pub fn decode(bytes: &[u8]) -> Result<Option<Inbound>, CodecError> {
    let Some(&status) = bytes.first() else {
        return Ok(None);
    };

    match message_type(status) {
        STATUS_SYSTEM_EXCLUSIVE => Ok(sysex::decode_json(bytes)?.map(Inbound::Json)),
        t if t & 0xf0 == STATUS_SYSTEM => Ok(Some(Inbound::System(status))),
        _ => Ok(ChannelMessage::decode(bytes)?.map(Inbound::Channel)),
    }
}

/// The single-byte system reset message.
pub fn encode_system_reset() -> Vec<u8> {
    vec![STATUS_SYSTEM_RESET]
}
