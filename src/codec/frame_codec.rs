//! Frame codec for one terminal family.
//!
//! Validation order on parse is fixed: minimum length, header magic,
//! checksum. Only then is the message type looked up and the payload read,
//! so a [`ProtocolMessage`] never exists for a frame that failed its checksum.
//!
//! # Example
//!
//! ```
//! use campus_devicecomm::codec::FrameCodec;
//! use campus_devicecomm::protocol::{FieldValue, ACCESS_SCHEMA};
//!
//! let codec = FrameCodec::new(&ACCESS_SCHEMA);
//! let bytes = codec
//!     .serialize(
//!         0x01,
//!         "DEV001",
//!         &[
//!             FieldValue::U32(1001),
//!             FieldValue::U32(1_700_000_000),
//!             FieldValue::U8(0),
//!             FieldValue::U8(1),
//!             FieldValue::U8(1),
//!         ],
//!     )
//!     .unwrap();
//! assert_eq!(bytes.len(), 24);
//!
//! let msg = codec.parse(&bytes).unwrap();
//! assert_eq!(msg.device_code(), "DEV001");
//! assert_eq!(msg.field_u32("user_id"), Some(1001));
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{DeviceCommError, Result};
use crate::protocol::{
    checksum, trailing_checksum, Field, FieldKind, FieldValue, FrameSchema, MessageLayout,
    ProtocolMessage, CHECKSUM_SIZE, MAGIC_SIZE, TYPE_SIZE,
};

/// Padding byte for the device-code field.
const DEVICE_CODE_PAD: u8 = b' ';

/// Parses and builds frames for a single [`FrameSchema`].
///
/// The codec is a thin, copyable view over a static schema and carries no
/// state, so one instance can be shared freely between tasks.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    schema: &'static FrameSchema,
}

impl FrameCodec {
    /// Create a codec for a family schema.
    pub const fn new(schema: &'static FrameSchema) -> Self {
        Self { schema }
    }

    /// The schema this codec speaks.
    #[inline]
    pub fn schema(&self) -> &'static FrameSchema {
        self.schema
    }

    /// Protocol type of the family.
    #[inline]
    pub fn protocol_type(&self) -> &'static str {
        self.schema.protocol_type
    }

    /// Decode and validate a complete frame.
    ///
    /// # Errors
    ///
    /// - `FrameTooShort` below the family minimum length
    /// - `BadHeader` when the magic does not match
    /// - `ChecksumMismatch` when the trailing checksum is wrong
    /// - `UnknownMessageType` / `FrameLengthMismatch` for frames that pass the
    ///   checksum but do not fit any layout
    pub fn parse(&self, data: &[u8]) -> Result<ProtocolMessage> {
        let schema = self.schema;

        if data.len() < schema.min_length {
            return Err(DeviceCommError::FrameTooShort {
                minimum: schema.min_length,
                actual: data.len(),
            });
        }

        let magic = [data[0], data[1]];
        if magic != schema.magic {
            return Err(DeviceCommError::BadHeader {
                expected: schema.magic,
                actual: magic,
            });
        }

        let computed = checksum(data);
        let received = trailing_checksum(data).unwrap_or_default();
        if computed != received {
            return Err(DeviceCommError::ChecksumMismatch { computed, received });
        }

        let code = data[MAGIC_SIZE];
        let layout = schema
            .layout(code)
            .ok_or_else(|| DeviceCommError::UnknownMessageType {
                protocol_type: schema.protocol_type.to_string(),
                code,
            })?;

        let expected = schema.frame_length(layout);
        if data.len() != expected {
            return Err(DeviceCommError::FrameLengthMismatch {
                expected,
                actual: data.len(),
            });
        }

        let raw = Bytes::copy_from_slice(data);
        let device_code_field = raw.slice(MAGIC_SIZE + TYPE_SIZE..schema.fields_offset());
        let device_code = decode_device_code(&device_code_field);

        let mut cursor = &data[schema.fields_offset()..data.len() - CHECKSUM_SIZE];
        let mut fields = Vec::with_capacity(layout.fields.len());
        for spec in layout.fields {
            let value = match spec.kind {
                FieldKind::U8 => FieldValue::U8(cursor.get_u8()),
                FieldKind::U16 => FieldValue::U16(cursor.get_u16_le()),
                FieldKind::U32 => FieldValue::U32(cursor.get_u32_le()),
            };
            fields.push(Field::new(spec.name, value));
        }

        Ok(ProtocolMessage::new(
            schema.protocol_type,
            code,
            layout.name,
            device_code,
            device_code_field,
            fields,
            raw,
        ))
    }

    /// Build a frame from a message type, device code and field values.
    ///
    /// The device code is space-padded to the family width. The checksum is
    /// always recomputed; there is no way to supply one.
    ///
    /// # Errors
    ///
    /// - `UnknownMessageType` for a code the family does not define
    /// - `DeviceCodeTooLong` when the code is wider than the field or not ASCII
    /// - `FieldMismatch` when values do not match the layout's count and widths
    pub fn serialize(
        &self,
        message_type: u8,
        device_code: &str,
        values: &[FieldValue],
    ) -> Result<Bytes> {
        let layout = self.layout(message_type)?;
        let width = self.schema.device_code_width;

        if device_code.len() > width || !device_code.is_ascii() {
            return Err(DeviceCommError::DeviceCodeTooLong {
                device_code: device_code.to_string(),
                width,
            });
        }

        let mut field = Vec::with_capacity(width);
        field.extend_from_slice(device_code.as_bytes());
        field.resize(width, DEVICE_CODE_PAD);

        self.build(layout, &field, values)
    }

    /// Re-encode a decoded message (inverse of [`parse`](Self::parse)).
    ///
    /// The device-code field is written back byte for byte, so a parsed
    /// frame re-encodes to the same bytes and the same checksum.
    pub fn encode(&self, message: &ProtocolMessage) -> Result<Bytes> {
        let layout = self.layout(message.message_type())?;
        self.build(layout, message.device_code_field(), &message.values())
    }

    /// Build a frame addressed to the terminal that sent `to`, echoing its
    /// device-code field unchanged.
    pub fn reply(
        &self,
        to: &ProtocolMessage,
        message_type: u8,
        values: &[FieldValue],
    ) -> Result<Bytes> {
        let layout = self.layout(message_type)?;
        self.build(layout, to.device_code_field(), values)
    }

    fn layout(&self, message_type: u8) -> Result<&'static MessageLayout> {
        self.schema
            .layout(message_type)
            .ok_or_else(|| DeviceCommError::UnknownMessageType {
                protocol_type: self.schema.protocol_type.to_string(),
                code: message_type,
            })
    }

    fn build(
        &self,
        layout: &MessageLayout,
        device_code_field: &[u8],
        values: &[FieldValue],
    ) -> Result<Bytes> {
        let schema = self.schema;

        if device_code_field.len() != schema.device_code_width {
            return Err(DeviceCommError::FieldMismatch(format!(
                "device code field is {} bytes, {} expects {}",
                device_code_field.len(),
                schema.protocol_type,
                schema.device_code_width
            )));
        }

        if values.len() != layout.fields.len() {
            return Err(DeviceCommError::FieldMismatch(format!(
                "{} expects {} fields, got {}",
                layout.name,
                layout.fields.len(),
                values.len()
            )));
        }

        let mut buf = BytesMut::with_capacity(schema.frame_length(layout));
        buf.put_slice(&schema.magic);
        buf.put_u8(layout.code);
        buf.put_slice(device_code_field);

        for (spec, value) in layout.fields.iter().zip(values) {
            match (spec.kind, *value) {
                (FieldKind::U8, FieldValue::U8(v)) => buf.put_u8(v),
                (FieldKind::U16, FieldValue::U16(v)) => buf.put_u16_le(v),
                (FieldKind::U32, FieldValue::U32(v)) => buf.put_u32_le(v),
                (kind, other) => {
                    return Err(DeviceCommError::FieldMismatch(format!(
                        "{}.{} expects {:?}, got {:?}",
                        layout.name, spec.name, kind, other
                    )));
                }
            }
        }

        // Placeholder keeps the checksum window at [2, len - 2).
        buf.put_u16_le(0);
        let sum = checksum(&buf);
        let len = buf.len();
        buf[len - 2..].copy_from_slice(&sum.to_le_bytes());

        Ok(buf.freeze())
    }
}

/// Trim trailing space/NUL padding; escape anything that is not printable ASCII.
fn decode_device_code(field: &[u8]) -> String {
    let end = field
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map_or(0, |i| i + 1);
    field[..end].escape_ascii().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ACCESS_SCHEMA, ATTENDANCE_SCHEMA, CONSUME_SCHEMA};

    /// Hand-built sample access frame (no help from `serialize`).
    fn sample_access_frame(timestamp: u32) -> Vec<u8> {
        let mut frame = vec![0xAA, 0x55, 0x01];
        frame.extend_from_slice(b"DEV001  ");
        frame.extend_from_slice(&1001u32.to_le_bytes());
        frame.extend_from_slice(&timestamp.to_le_bytes());
        frame.extend_from_slice(&[0x00, 0x01, 0x01]);
        let sum: u16 = frame[2..]
            .iter()
            .fold(0u16, |acc, &b| acc.wrapping_add(b as u16));
        frame.extend_from_slice(&sum.to_le_bytes());
        frame
    }

    #[test]
    fn test_parse_sample_access_frame() {
        let frame = sample_access_frame(1_700_000_000);
        assert_eq!(frame.len(), 24);

        let msg = FrameCodec::new(&ACCESS_SCHEMA).parse(&frame).unwrap();
        assert_eq!(msg.protocol_type(), "ACCESS_ENTROPY_V4_8");
        assert_eq!(msg.device_code(), "DEV001");
        assert_eq!(msg.message_name(), "ACCESS_EVENT");
        assert_eq!(msg.field_u32("user_id"), Some(1001));
        assert_eq!(msg.field_u32("timestamp"), Some(1_700_000_000));
        assert_eq!(msg.field_u32("event_type"), Some(0));
        assert_eq!(msg.field_u32("door"), Some(1));
        assert_eq!(msg.field_u32("mode"), Some(1));
        assert_eq!(msg.raw(), &frame[..]);
    }

    #[test]
    fn test_corrupted_checksum_low_byte_rejected() {
        let mut frame = sample_access_frame(1_700_000_000);
        let low = frame.len() - 2;
        frame[low] = frame[low].wrapping_add(1);

        let err = FrameCodec::new(&ACCESS_SCHEMA).parse(&frame).unwrap_err();
        assert!(matches!(err, DeviceCommError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_too_short_before_anything_else() {
        let codec = FrameCodec::new(&ACCESS_SCHEMA);
        for len in 0..ACCESS_SCHEMA.min_length {
            let err = codec.parse(&vec![0u8; len]).unwrap_err();
            assert!(
                matches!(err, DeviceCommError::FrameTooShort { minimum: 24, actual } if actual == len)
            );
        }
    }

    #[test]
    fn test_bad_header() {
        let mut frame = sample_access_frame(0);
        frame[0] = 0x55;
        frame[1] = 0xAA;
        let err = FrameCodec::new(&ACCESS_SCHEMA).parse(&frame).unwrap_err();
        assert!(matches!(
            err,
            DeviceCommError::BadHeader {
                expected: [0xAA, 0x55],
                actual: [0x55, 0xAA]
            }
        ));
    }

    #[test]
    fn test_header_is_outside_checksum_window() {
        // Changing the magic must be reported as a header fault, not a checksum fault.
        let mut frame = sample_access_frame(0);
        frame[1] = 0x00;
        let err = FrameCodec::new(&ACCESS_SCHEMA).parse(&frame).unwrap_err();
        assert!(matches!(err, DeviceCommError::BadHeader { .. }));
    }

    #[test]
    fn test_unknown_message_type_with_valid_checksum() {
        let codec = FrameCodec::new(&ACCESS_SCHEMA);
        let mut frame = sample_access_frame(0);
        frame[2] = 0x42;
        let len = frame.len();
        let sum = checksum(&frame);
        frame[len - 2..].copy_from_slice(&sum.to_le_bytes());

        let err = codec.parse(&frame).unwrap_err();
        assert!(matches!(
            err,
            DeviceCommError::UnknownMessageType { code: 0x42, .. }
        ));
    }

    #[test]
    fn test_overlong_frame_rejected() {
        let codec = FrameCodec::new(&ACCESS_SCHEMA);
        let mut frame = sample_access_frame(0);
        frame.truncate(frame.len() - 2);
        frame.push(0x00);
        frame.extend_from_slice(&[0, 0]);
        let len = frame.len();
        let sum = checksum(&frame);
        frame[len - 2..].copy_from_slice(&sum.to_le_bytes());

        let err = codec.parse(&frame).unwrap_err();
        assert!(matches!(
            err,
            DeviceCommError::FrameLengthMismatch {
                expected: 24,
                actual: 25
            }
        ));
    }

    #[test]
    fn test_serialize_matches_hand_built_frame() {
        let frame = sample_access_frame(1_700_000_000);
        let codec = FrameCodec::new(&ACCESS_SCHEMA);
        let msg = codec.parse(&frame).unwrap();

        let rebuilt = codec.encode(&msg).unwrap();
        assert_eq!(&rebuilt[..], &frame[..]);
        assert_eq!(codec.parse(&rebuilt).unwrap(), msg);
    }

    #[test]
    fn test_serialize_rejects_wide_device_code() {
        let codec = FrameCodec::new(&ATTENDANCE_SCHEMA);
        let err = codec
            .serialize(
                0x01,
                "DEVICE-7",
                &[FieldValue::U32(1), FieldValue::U32(2), FieldValue::U8(3)],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            DeviceCommError::DeviceCodeTooLong { width: 6, .. }
        ));
    }

    #[test]
    fn test_serialize_rejects_field_mismatch() {
        let codec = FrameCodec::new(&ATTENDANCE_SCHEMA);

        let too_few = codec.serialize(0x01, "AT01", &[FieldValue::U32(1)]);
        assert!(matches!(too_few, Err(DeviceCommError::FieldMismatch(_))));

        let wrong_kind = codec.serialize(
            0x01,
            "AT01",
            &[FieldValue::U8(1), FieldValue::U32(2), FieldValue::U8(3)],
        );
        assert!(matches!(wrong_kind, Err(DeviceCommError::FieldMismatch(_))));
    }

    #[test]
    fn test_consume_round_trip() {
        let codec = FrameCodec::new(&CONSUME_SCHEMA);
        let values = [
            FieldValue::U32(42),
            FieldValue::U32(1250),
            FieldValue::U32(1_700_000_123),
            FieldValue::U8(1),
            FieldValue::U8(2),
            FieldValue::U8(3),
        ];
        let bytes = codec.serialize(0x01, "POS0001", &values).unwrap();
        assert_eq!(bytes.len(), 28);
        assert_eq!(&bytes[..2], &[0x7E, 0x81]);

        let msg = codec.parse(&bytes).unwrap();
        assert_eq!(msg.device_code(), "POS0001");
        assert_eq!(msg.values(), values.to_vec());
        assert_eq!(msg.field_u32("amount"), Some(1250));
    }

    #[test]
    fn test_device_code_nul_padding_trimmed() {
        assert_eq!(decode_device_code(b"AB\0\0  "), "AB");
        assert_eq!(decode_device_code(b"      "), "");
        assert_eq!(decode_device_code(b"A B   "), "A B");
    }

    #[test]
    fn test_device_code_non_ascii_is_escaped_not_merged() {
        assert_eq!(decode_device_code(b"DEV\xC9001 "), "DEV\\xc9001");
        assert_ne!(
            decode_device_code(b"DEV\xC9001 "),
            decode_device_code(b"DEV\xCA001 ")
        );
    }

    /// Valid frame whose device-code field is supplied verbatim.
    fn access_frame_with_field(field: &[u8; 8]) -> Vec<u8> {
        let mut frame = vec![0xAA, 0x55, 0x01];
        frame.extend_from_slice(field);
        frame.extend_from_slice(&1001u32.to_le_bytes());
        frame.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        frame.extend_from_slice(&[0x00, 0x01, 0x01, 0x00, 0x00]);
        let len = frame.len();
        let sum = checksum(&frame);
        frame[len - 2..].copy_from_slice(&sum.to_le_bytes());
        frame
    }

    #[test]
    fn test_encode_keeps_nul_padding() {
        let codec = FrameCodec::new(&ACCESS_SCHEMA);
        let frame = access_frame_with_field(b"DEV001\0\0");

        let msg = codec.parse(&frame).unwrap();
        assert_eq!(msg.device_code(), "DEV001");

        let rebuilt = codec.encode(&msg).unwrap();
        assert_eq!(trailing_checksum(&rebuilt), trailing_checksum(&frame));
        assert_eq!(&rebuilt[..], &frame[..]);
    }

    #[test]
    fn test_encode_keeps_non_ascii_device_code() {
        let codec = FrameCodec::new(&ACCESS_SCHEMA);
        let frame = access_frame_with_field(b"DEV\xC9001 ");

        let msg = codec.parse(&frame).unwrap();
        assert_eq!(msg.device_code_field(), b"DEV\xC9001 ");

        let rebuilt = codec.encode(&msg).unwrap();
        assert_eq!(&rebuilt[..], &frame[..]);
    }

    #[test]
    fn test_reply_echoes_device_code_field() {
        let codec = FrameCodec::new(&ACCESS_SCHEMA);
        let msg = codec.parse(&access_frame_with_field(b"DEV001\0\0")).unwrap();

        let ack = codec
            .reply(
                &msg,
                0x81,
                &[
                    FieldValue::U32(1001),
                    FieldValue::U32(1_700_000_001),
                    FieldValue::U8(0),
                    FieldValue::U8(1),
                    FieldValue::U8(0),
                ],
            )
            .unwrap();
        assert_eq!(&ack[3..11], b"DEV001\0\0");
        assert_eq!(trailing_checksum(&ack), Some(checksum(&ack)));
    }
}
