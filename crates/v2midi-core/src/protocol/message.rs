//! Channel voice message encoding and decoding.
//!
//! Every channel message is a status byte (`0x80 | kind << 4 | channel`)
//! followed by one or two 7-bit data bytes.

use std::fmt;

use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Channel {0} out of range (0-15)")]
    InvalidChannel(u8),

    #[error("Data byte {field}={value} exceeds 7 bits")]
    InvalidData { field: &'static str, value: u8 },

    #[error("Pitch bend {0} out of range (-8192..=8191)")]
    InvalidPitchBend(i16),

    #[error("Truncated message: status 0x{status:02X}, {len} bytes")]
    Truncated { status: u8, len: usize },

    #[error("Malformed JSON payload: {0}")]
    MalformedJson(String),

    #[error("Unable to serialize JSON: {0}")]
    Serialize(String),
}

/// Kind of a channel voice message, the high nibble of the status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    NoteOff,
    NoteOn,
    Aftertouch,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
}

impl MessageKind {
    pub const ALL: [MessageKind; 7] = [
        MessageKind::NoteOff,
        MessageKind::NoteOn,
        MessageKind::Aftertouch,
        MessageKind::ControlChange,
        MessageKind::ProgramChange,
        MessageKind::ChannelPressure,
        MessageKind::PitchBend,
    ];

    pub fn status(&self) -> u8 {
        match self {
            MessageKind::NoteOff => STATUS_NOTE_OFF,
            MessageKind::NoteOn => STATUS_NOTE_ON,
            MessageKind::Aftertouch => STATUS_AFTERTOUCH,
            MessageKind::ControlChange => STATUS_CONTROL_CHANGE,
            MessageKind::ProgramChange => STATUS_PROGRAM_CHANGE,
            MessageKind::ChannelPressure => STATUS_CHANNEL_PRESSURE,
            MessageKind::PitchBend => STATUS_PITCH_BEND,
        }
    }

    /// Map a status byte to its kind. System messages (0xFn) have no kind.
    pub fn from_status(status: u8) -> Option<Self> {
        match message_type(status) {
            STATUS_NOTE_OFF => Some(MessageKind::NoteOff),
            STATUS_NOTE_ON => Some(MessageKind::NoteOn),
            STATUS_AFTERTOUCH => Some(MessageKind::Aftertouch),
            STATUS_CONTROL_CHANGE => Some(MessageKind::ControlChange),
            STATUS_PROGRAM_CHANGE => Some(MessageKind::ProgramChange),
            STATUS_CHANNEL_PRESSURE => Some(MessageKind::ChannelPressure),
            STATUS_PITCH_BEND => Some(MessageKind::PitchBend),
            _ => None,
        }
    }

    /// Total wire length including the status byte.
    pub fn wire_len(&self) -> usize {
        match self {
            MessageKind::ProgramChange | MessageKind::ChannelPressure => 2,
            _ => 3,
        }
    }
}

/// Message type of a status byte: the channel bits are removed, except
/// for system messages where the full byte is the type.
pub fn message_type(status: u8) -> u8 {
    if status & 0xf0 != STATUS_SYSTEM {
        return status & 0xf0;
    }
    status
}

/// Channel number carried in a status byte.
pub fn message_channel(status: u8) -> u8 {
    status & 0x0f
}

/// A decoded channel voice message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMessage {
    NoteOff { channel: u8, note: u8, velocity: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    Aftertouch { channel: u8, note: u8, pressure: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, pressure: u8 },
    /// Signed bend, zero is the neutral center.
    PitchBend { channel: u8, value: i16 },
}

impl ChannelMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ChannelMessage::NoteOff { .. } => MessageKind::NoteOff,
            ChannelMessage::NoteOn { .. } => MessageKind::NoteOn,
            ChannelMessage::Aftertouch { .. } => MessageKind::Aftertouch,
            ChannelMessage::ControlChange { .. } => MessageKind::ControlChange,
            ChannelMessage::ProgramChange { .. } => MessageKind::ProgramChange,
            ChannelMessage::ChannelPressure { .. } => MessageKind::ChannelPressure,
            ChannelMessage::PitchBend { .. } => MessageKind::PitchBend,
        }
    }

    pub fn channel(&self) -> u8 {
        match *self {
            ChannelMessage::NoteOff { channel, .. }
            | ChannelMessage::NoteOn { channel, .. }
            | ChannelMessage::Aftertouch { channel, .. }
            | ChannelMessage::ControlChange { channel, .. }
            | ChannelMessage::ProgramChange { channel, .. }
            | ChannelMessage::ChannelPressure { channel, .. }
            | ChannelMessage::PitchBend { channel, .. } => channel,
        }
    }

    /// Encode into wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let channel = self.channel();
        if channel > MAX_CHANNEL {
            return Err(CodecError::InvalidChannel(channel));
        }
        let status = self.kind().status() | channel;

        let bytes = match *self {
            ChannelMessage::NoteOff { note, velocity, .. }
            | ChannelMessage::NoteOn { note, velocity, .. } => {
                vec![status, data("note", note)?, data("velocity", velocity)?]
            }
            ChannelMessage::Aftertouch { note, pressure, .. } => {
                vec![status, data("note", note)?, data("pressure", pressure)?]
            }
            ChannelMessage::ControlChange {
                controller, value, ..
            } => vec![
                status,
                data("controller", controller)?,
                data("value", value)?,
            ],
            ChannelMessage::ProgramChange { program, .. } => {
                vec![status, data("program", program)?]
            }
            ChannelMessage::ChannelPressure { pressure, .. } => {
                vec![status, data("pressure", pressure)?]
            }
            ChannelMessage::PitchBend { value, .. } => {
                if !(PITCH_BEND_MIN..=PITCH_BEND_MAX).contains(&value) {
                    return Err(CodecError::InvalidPitchBend(value));
                }
                let bits = (value as i32 + PITCH_BEND_CENTER) as u16;
                let lsb = (bits & 0x7f) as u8;
                let msb = ((bits >> 7) & 0x7f) as u8;
                vec![status, lsb, msb]
            }
        };

        Ok(bytes)
    }

    /// Decode a channel message. Returns `Ok(None)` for anything that is
    /// not a channel voice message (data bytes, system messages).
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>, CodecError> {
        let Some(&status) = bytes.first() else {
            return Ok(None);
        };
        if status & 0x80 == 0 {
            return Ok(None);
        }
        let Some(kind) = MessageKind::from_status(status) else {
            return Ok(None);
        };
        if bytes.len() < kind.wire_len() {
            return Err(CodecError::Truncated {
                status,
                len: bytes.len(),
            });
        }

        let channel = message_channel(status);
        let d1 = data("data1", bytes[1])?;
        let message = match kind {
            MessageKind::NoteOff => ChannelMessage::NoteOff {
                channel,
                note: d1,
                velocity: data("velocity", bytes[2])?,
            },
            MessageKind::NoteOn => ChannelMessage::NoteOn {
                channel,
                note: d1,
                velocity: data("velocity", bytes[2])?,
            },
            MessageKind::Aftertouch => ChannelMessage::Aftertouch {
                channel,
                note: d1,
                pressure: data("pressure", bytes[2])?,
            },
            MessageKind::ControlChange => ChannelMessage::ControlChange {
                channel,
                controller: d1,
                value: data("value", bytes[2])?,
            },
            MessageKind::ProgramChange => ChannelMessage::ProgramChange {
                channel,
                program: d1,
            },
            MessageKind::ChannelPressure => ChannelMessage::ChannelPressure {
                channel,
                pressure: d1,
            },
            MessageKind::PitchBend => {
                let msb = data("msb", bytes[2])?;
                let bits = (d1 as i32) | ((msb as i32) << 7);
                ChannelMessage::PitchBend {
                    channel,
                    value: (bits - PITCH_BEND_CENTER) as i16,
                }
            }
        };

        Ok(Some(message))
    }
}

impl fmt::Display for ChannelMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Channels are shown 1-based, like every instrument does.
        match *self {
            ChannelMessage::NoteOn {
                channel,
                note,
                velocity,
            } if velocity > 0 => write!(
                f,
                "Note {}({}) velocity {} on channel #{}",
                note_name(note),
                note,
                velocity,
                channel + 1
            ),
            ChannelMessage::NoteOn { channel, note, .. } => write!(
                f,
                "NoteOff {}({}) on channel #{}",
                note_name(note),
                note,
                channel + 1
            ),
            ChannelMessage::NoteOff {
                channel,
                note,
                velocity,
            } => write!(
                f,
                "NoteOff {}({}) velocity {} on channel #{}",
                note_name(note),
                note,
                velocity,
                channel + 1
            ),
            ChannelMessage::Aftertouch {
                channel,
                note,
                pressure,
            } => write!(
                f,
                "Aftertouch {}({}) pressure {} on channel #{}",
                note_name(note),
                note,
                pressure,
                channel + 1
            ),
            ChannelMessage::ControlChange {
                channel,
                controller,
                value,
            } => write!(
                f,
                "ControlChange #{} value {} on channel #{}",
                controller,
                value,
                channel + 1
            ),
            ChannelMessage::ProgramChange { channel, program } => write!(
                f,
                "ProgramChange #{} on channel #{}",
                program as u16 + 1,
                channel + 1
            ),
            ChannelMessage::ChannelPressure { channel, pressure } => write!(
                f,
                "Aftertouch Channel {} on channel #{}",
                pressure,
                channel + 1
            ),
            ChannelMessage::PitchBend { channel, value } => {
                write!(f, "PitchBend {} on channel #{}", value, channel + 1)
            }
        }
    }
}

fn data(field: &'static str, value: u8) -> Result<u8, CodecError> {
    if value > MAX_DATA {
        return Err(CodecError::InvalidData { field, value });
    }
    Ok(value)
}

const NOTE_NAMES: [&str; 12] = [
    "C", "C♯", "D", "D♯", "E", "F", "F♯", "G", "G♯", "A", "A♯", "B",
];

/// Display name of a note number. Middle C (60) is `C3`; octave numbering
/// is a vendor convention, not part of MIDI.
pub fn note_name(note: u8) -> String {
    let octave = (note / 12) as i32 - 2;
    format!("{}{}", NOTE_NAMES[(note % 12) as usize], octave)
}

pub fn is_black_key(note: u8) -> bool {
    NOTE_NAMES[(note % 12) as usize].contains('♯')
}

/// Common name of a control change number, if it has one.
pub fn controller_name(controller: u8) -> Option<&'static str> {
    let name = match controller {
        0 => "Bank Select",
        1 => "Modulation",
        2 => "Breath",
        4 => "Foot Control",
        5 => "Portamento Time",
        7 => "Volume",
        8 => "Balance",
        10 => "Pan",
        11 => "Expression",
        12 => "Effect 1",
        13 => "Effect 2",
        16 => "General 1",
        17 => "General 2",
        18 => "General 3",
        19 => "General 4",
        64 => "Sustain",
        65 => "Portamento",
        66 => "Sostenuto",
        67 => "Soft Pedal",
        68 => "Legato",
        69 => "Hold 2",
        70 => "Sound 1",
        71 => "Sound 2",
        72 => "Sound 3",
        73 => "Sound 4",
        74 => "Slide",
        75 => "Sound 6",
        76 => "Sound 7",
        77 => "Sound 8",
        78 => "Sound 9",
        79 => "Sound 10",
        80 => "General 5",
        81 => "General 6",
        82 => "General 7",
        83 => "General 8",
        84 => "Portamento Control",
        88 => "Velocity Prefix",
        91 => "Reverb",
        92 => "Tremolo",
        93 => "Chorus",
        94 => "Celeste Depth",
        95 => "Phaser Depth",
        120 => "Sound Off",
        121 => "Reset",
        122 => "Local",
        123 => "Notes Off",
        _ => return None,
    };
    Some(name)
}
