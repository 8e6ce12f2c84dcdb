// Status bytes. The high nibble selects the message kind, the low nibble
// carries the channel (or the system message type for 0xFn).
pub const STATUS_NOTE_OFF: u8 = 0x80 | (0 << 4);
pub const STATUS_NOTE_ON: u8 = 0x80 | (1 << 4);
pub const STATUS_AFTERTOUCH: u8 = 0x80 | (2 << 4);
pub const STATUS_CONTROL_CHANGE: u8 = 0x80 | (3 << 4);
pub const STATUS_PROGRAM_CHANGE: u8 = 0x80 | (4 << 4);
pub const STATUS_CHANNEL_PRESSURE: u8 = 0x80 | (5 << 4);
pub const STATUS_PITCH_BEND: u8 = 0x80 | (6 << 4);
pub const STATUS_SYSTEM: u8 = 0x80 | (7 << 4);

// System messages, device global.
pub const STATUS_SYSTEM_EXCLUSIVE: u8 = STATUS_SYSTEM;
pub const STATUS_TIME_CODE_QUARTER_FRAME: u8 = STATUS_SYSTEM | 1;
pub const STATUS_SONG_POSITION: u8 = STATUS_SYSTEM | 2;
pub const STATUS_SONG_SELECT: u8 = STATUS_SYSTEM | 3;
pub const STATUS_TUNE_REQUEST: u8 = STATUS_SYSTEM | 6;
pub const STATUS_SYSTEM_EXCLUSIVE_END: u8 = STATUS_SYSTEM | 7;
pub const STATUS_CLOCK: u8 = STATUS_SYSTEM | 8;
pub const STATUS_START: u8 = STATUS_SYSTEM | 10;
pub const STATUS_CONTINUE: u8 = STATUS_SYSTEM | 11;
pub const STATUS_STOP: u8 = STATUS_SYSTEM | 12;
pub const STATUS_ACTIVE_SENSING: u8 = STATUS_SYSTEM | 14;
pub const STATUS_SYSTEM_RESET: u8 = STATUS_SYSTEM | 15;

/// MIDI private/research manufacturer ID.
pub const SYSEX_RESEARCH_ID: u8 = 0x7d;

/// Top-level key of every device request and reply.
pub const DEVICE_NAMESPACE: &str = "com.versioduo.device";

/// Top-level key of the metadata record appended to firmware images.
pub const FIRMWARE_NAMESPACE: &str = "com.versioduo.firmware";

/// Firmware block size. Daisy-chained devices might not forward larger packets.
pub const FIRMWARE_BLOCK_SIZE: usize = 0x2000;

/// Neutral center of the 14-bit pitch bend range.
pub const PITCH_BEND_CENTER: i32 = 8192;

pub const PITCH_BEND_MIN: i16 = -8192;
pub const PITCH_BEND_MAX: i16 = 8191;

pub const MAX_CHANNEL: u8 = 15;
pub const MAX_DATA: u8 = 0x7f;

/// Velocity used for note-off when the caller does not provide one.
pub const DEFAULT_NOTE_OFF_VELOCITY: u8 = 64;

// Request methods understood by the device.
pub const METHOD_GET_ALL: &str = "getAll";
pub const METHOD_REBOOT: &str = "reboot";
pub const METHOD_WRITE_CONFIGURATION: &str = "writeConfiguration";
pub const METHOD_ERASE_CONFIGURATION: &str = "eraseConfiguration";
pub const METHOD_SWITCH_CHANNEL: &str = "switchChannel";
pub const METHOD_WRITE_FIRMWARE: &str = "writeFirmware";

/// Number of ports requested by a reboot when the device announces "enabled"
/// without a count.
pub const MAX_ANNOUNCED_PORTS: u64 = 16;
