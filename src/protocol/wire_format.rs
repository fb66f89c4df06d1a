//! Wire format definitions and checksum.
//!
//! Every terminal family shares one frame shape:
//! ```text
//! ┌────────┬──────┬─────────────┬──────────────────┬──────────┐
//! │ Magic  │ Type │ Device code │ Fields           │ Checksum │
//! │ 2 bytes│1 byte│ N bytes     │ u32 LE / u8 ...  │ u16 LE   │
//! └────────┴──────┴─────────────┴──────────────────┴──────────┘
//! ```
//!
//! The checksum is the unsigned sum, modulo 0x10000, of every byte in
//! `[2, len - 2)`: it excludes the magic and the checksum itself. Field
//! devices compute it over exactly this window.

/// Header magic size in bytes.
pub const MAGIC_SIZE: usize = 2;

/// Message-type code size in bytes.
pub const TYPE_SIZE: usize = 1;

/// Trailing checksum size in bytes.
pub const CHECKSUM_SIZE: usize = 2;

/// Protocol type served by access-control terminals.
pub const ACCESS_ENTROPY_V4_8: &str = "ACCESS_ENTROPY_V4_8";

/// Protocol type served by attendance terminals.
pub const ATTENDANCE_ENTROPY_V4_0: &str = "ATTENDANCE_ENTROPY_V4_0";

/// Protocol type served by canteen consumption terminals.
pub const CONSUME_ZKTECO_V1_0: &str = "CONSUME_ZKTECO_V1_0";

/// Message-type codes shared by the built-in families.
pub mod message_types {
    /// Access event / attendance punch / consumption transaction.
    pub const EVENT: u8 = 0x01;
    /// Periodic terminal status report (every family).
    pub const DEVICE_STATUS: u8 = 0x02;
    /// Door alarm raised by an access terminal.
    pub const ALARM_EVENT: u8 = 0x03;
    /// Balance lookup from a consumption terminal.
    pub const BALANCE_QUERY: u8 = 0x03;
    /// Acknowledgement emitted back to the terminal.
    pub const ACK: u8 = 0x81;
    /// Balance reply to a [`BALANCE_QUERY`].
    pub const BALANCE_ACK: u8 = 0x83;

    /// Result byte for a successful acknowledgement.
    pub const ACK_OK: u8 = 0x00;
    /// Result byte for a rejected acknowledgement.
    pub const ACK_REJECTED: u8 = 0x01;
}

/// Encoded width of a single payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// 1-byte enum/flag.
    U8,
    /// 2-byte little-endian integer.
    U16,
    /// 4-byte little-endian integer (ids, timestamps, amounts).
    U32,
}

impl FieldKind {
    /// Encoded size in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            FieldKind::U8 => 1,
            FieldKind::U16 => 2,
            FieldKind::U32 => 4,
        }
    }
}

/// Name and width of one payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name, stable across protocol versions.
    pub name: &'static str,
    /// Encoded width.
    pub kind: FieldKind,
}

impl FieldSpec {
    /// Create a field spec.
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Layout of one message type within a family.
#[derive(Debug, Clone, Copy)]
pub struct MessageLayout {
    /// Message-type code (byte 2 of the frame).
    pub code: u8,
    /// Human-readable name used in logs and result data.
    pub name: &'static str,
    /// Payload fields in wire order.
    pub fields: &'static [FieldSpec],
}

impl MessageLayout {
    /// Total payload width of the fields.
    pub fn fields_size(&self) -> usize {
        self.fields.iter().map(|f| f.kind.size()).sum()
    }
}

/// Static description of one protocol family's frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameSchema {
    /// Protocol type identifier (upper-case).
    pub protocol_type: &'static str,
    /// Header magic.
    pub magic: [u8; MAGIC_SIZE],
    /// Width of the space-padded device-code field.
    pub device_code_width: usize,
    /// Fixed minimum frame length; shorter input is rejected before anything else.
    pub min_length: usize,
    /// Message layouts by type code.
    pub messages: &'static [MessageLayout],
}

impl FrameSchema {
    /// Find the layout for a message-type code.
    pub fn layout(&self, code: u8) -> Option<&'static MessageLayout> {
        self.messages.iter().find(|m| m.code == code)
    }

    /// Exact frame length for a message layout.
    pub fn frame_length(&self, layout: &MessageLayout) -> usize {
        MAGIC_SIZE + TYPE_SIZE + self.device_code_width + layout.fields_size() + CHECKSUM_SIZE
    }

    /// Offset of the first payload field.
    #[inline]
    pub fn fields_offset(&self) -> usize {
        MAGIC_SIZE + TYPE_SIZE + self.device_code_width
    }
}

use FieldKind::{U16, U32, U8};

/// Access terminals (entropy PUSH V4.8). 24-byte frames.
pub const ACCESS_SCHEMA: FrameSchema = FrameSchema {
    protocol_type: ACCESS_ENTROPY_V4_8,
    magic: [0xAA, 0x55],
    device_code_width: 8,
    min_length: 24,
    messages: &[
        MessageLayout {
            code: message_types::EVENT,
            name: "ACCESS_EVENT",
            fields: &[
                FieldSpec::new("user_id", U32),
                FieldSpec::new("timestamp", U32),
                FieldSpec::new("event_type", U8),
                FieldSpec::new("door", U8),
                FieldSpec::new("mode", U8),
            ],
        },
        MessageLayout {
            code: message_types::DEVICE_STATUS,
            name: "DEVICE_STATUS",
            fields: &[
                FieldSpec::new("timestamp", U32),
                FieldSpec::new("status_code", U8),
                FieldSpec::new("door_state", U8),
                FieldSpec::new("relay_state", U8),
                FieldSpec::new("sensor_flags", U8),
                FieldSpec::new("alarm_flags", U8),
                FieldSpec::new("reserved", U16),
            ],
        },
        MessageLayout {
            code: message_types::ALARM_EVENT,
            name: "ALARM_EVENT",
            fields: &[
                FieldSpec::new("user_id", U32),
                FieldSpec::new("timestamp", U32),
                FieldSpec::new("alarm_type", U8),
                FieldSpec::new("alarm_level", U8),
                FieldSpec::new("door", U8),
            ],
        },
        MessageLayout {
            code: message_types::ACK,
            name: "ACCESS_ACK",
            fields: &[
                FieldSpec::new("user_id", U32),
                FieldSpec::new("timestamp", U32),
                FieldSpec::new("result", U8),
                FieldSpec::new("door", U8),
                FieldSpec::new("reserved", U8),
            ],
        },
    ],
};

/// Attendance terminals (entropy V4.0). 20-byte frames.
pub const ATTENDANCE_SCHEMA: FrameSchema = FrameSchema {
    protocol_type: ATTENDANCE_ENTROPY_V4_0,
    magic: [0x55, 0xAA],
    device_code_width: 6,
    min_length: 20,
    messages: &[
        MessageLayout {
            code: message_types::EVENT,
            name: "PUNCH",
            fields: &[
                FieldSpec::new("user_id", U32),
                FieldSpec::new("timestamp", U32),
                FieldSpec::new("verify_mode", U8),
            ],
        },
        MessageLayout {
            code: message_types::DEVICE_STATUS,
            name: "DEVICE_STATUS",
            fields: &[
                FieldSpec::new("timestamp", U32),
                FieldSpec::new("status_code", U8),
                FieldSpec::new("record_count", U32),
            ],
        },
        MessageLayout {
            code: message_types::ACK,
            name: "PUNCH_ACK",
            fields: &[
                FieldSpec::new("user_id", U32),
                FieldSpec::new("timestamp", U32),
                FieldSpec::new("result", U8),
            ],
        },
    ],
};

/// Canteen consumption terminals (ZKTeco V1.0). 28-byte frames.
pub const CONSUME_SCHEMA: FrameSchema = FrameSchema {
    protocol_type: CONSUME_ZKTECO_V1_0,
    magic: [0x7E, 0x81],
    device_code_width: 8,
    min_length: 28,
    messages: &[
        MessageLayout {
            code: message_types::EVENT,
            name: "TRANSACTION",
            fields: &[
                FieldSpec::new("user_id", U32),
                FieldSpec::new("amount", U32),
                FieldSpec::new("timestamp", U32),
                FieldSpec::new("consume_mode", U8),
                FieldSpec::new("payment_method", U8),
                FieldSpec::new("meal_type", U8),
            ],
        },
        MessageLayout {
            code: message_types::DEVICE_STATUS,
            name: "DEVICE_STATUS",
            fields: &[
                FieldSpec::new("timestamp", U32),
                FieldSpec::new("pending_records", U32),
                FieldSpec::new("reserved", U32),
                FieldSpec::new("status_code", U8),
                FieldSpec::new("online_status", U8),
                FieldSpec::new("reserved2", U8),
            ],
        },
        MessageLayout {
            code: message_types::BALANCE_QUERY,
            name: "BALANCE_QUERY",
            fields: &[
                FieldSpec::new("user_id", U32),
                FieldSpec::new("timestamp", U32),
                FieldSpec::new("card_no", U32),
                FieldSpec::new("query_mode", U8),
                FieldSpec::new("reserved", U8),
                FieldSpec::new("reserved2", U8),
            ],
        },
        MessageLayout {
            code: message_types::ACK,
            name: "TRANSACTION_ACK",
            fields: &[
                FieldSpec::new("user_id", U32),
                FieldSpec::new("balance", U32),
                FieldSpec::new("timestamp", U32),
                FieldSpec::new("result", U8),
                FieldSpec::new("reserved", U8),
                FieldSpec::new("reserved2", U8),
            ],
        },
        MessageLayout {
            code: message_types::BALANCE_ACK,
            name: "BALANCE_ACK",
            fields: &[
                FieldSpec::new("user_id", U32),
                FieldSpec::new("balance", U32),
                FieldSpec::new("timestamp", U32),
                FieldSpec::new("result", U8),
                FieldSpec::new("reserved", U8),
                FieldSpec::new("reserved2", U8),
            ],
        },
    ],
};

/// Compute the frame checksum over `[2, len - 2)`.
///
/// Returns 0 for input too short to have a window.
///
/// # Example
///
/// ```
/// use campus_devicecomm::protocol::checksum;
///
/// // magic, type 0x01, one payload byte 0x02, checksum placeholder
/// let frame = [0xAA, 0x55, 0x01, 0x02, 0x00, 0x00];
/// assert_eq!(checksum(&frame), 0x0003);
/// ```
pub fn checksum(frame: &[u8]) -> u16 {
    if frame.len() < MAGIC_SIZE + CHECKSUM_SIZE {
        return 0;
    }
    frame[MAGIC_SIZE..frame.len() - CHECKSUM_SIZE]
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// Read the trailing little-endian checksum field.
///
/// Returns `None` if the frame cannot hold one.
pub fn trailing_checksum(frame: &[u8]) -> Option<u16> {
    let len = frame.len();
    if len < CHECKSUM_SIZE {
        return None;
    }
    Some(u16::from_le_bytes([frame[len - 2], frame[len - 1]]))
}
