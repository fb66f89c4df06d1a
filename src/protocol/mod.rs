//! Protocol module - wire format, decoded messages, and stream framing.
//!
//! This module implements the terminal wire protocol:
//! - Per-family frame schemas and the checksum window
//! - [`ProtocolMessage`] with typed field accessors
//! - [`FrameBuffer`] for reassembling frames out of a byte stream

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{Field, FieldValue, ProtocolMessage};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    checksum, message_types, trailing_checksum, FieldKind, FieldSpec, FrameSchema, MessageLayout,
    ACCESS_ENTROPY_V4_8, ACCESS_SCHEMA, ATTENDANCE_ENTROPY_V4_0, ATTENDANCE_SCHEMA, CHECKSUM_SIZE,
    CONSUME_SCHEMA, CONSUME_ZKTECO_V1_0, MAGIC_SIZE, TYPE_SIZE,
};
