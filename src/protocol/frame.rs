//! Decoded protocol message with typed field accessors.
//!
//! A [`ProtocolMessage`] only comes out of
//! [`FrameCodec::parse`](crate::codec::FrameCodec::parse) after the checksum
//! has been verified. The original bytes are kept in `raw` (zero-copy via
//! `bytes::Bytes`) for diagnostics and replay.
//!
//! # Example
//!
//! ```
//! use campus_devicecomm::protocol::{Field, FieldValue};
//!
//! let field = Field::new("door", FieldValue::U8(1));
//! assert_eq!(field.value.as_u32(), 1);
//! ```

use bytes::Bytes;
use serde::Serialize;

use super::wire_format::FieldKind;

/// A single decoded payload value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// 1-byte enum/flag.
    U8(u8),
    /// 2-byte integer.
    U16(u16),
    /// 4-byte integer.
    U32(u32),
}

impl FieldValue {
    /// Wire width of this value.
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::U8(_) => FieldKind::U8,
            FieldValue::U16(_) => FieldKind::U16,
            FieldValue::U32(_) => FieldKind::U32,
        }
    }

    /// Widen to `u32`.
    #[inline]
    pub fn as_u32(&self) -> u32 {
        match *self {
            FieldValue::U8(v) => u32::from(v),
            FieldValue::U16(v) => u32::from(v),
            FieldValue::U32(v) => v,
        }
    }
}

/// A named payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Field {
    /// Field name from the message layout.
    pub name: &'static str,
    /// Decoded value.
    pub value: FieldValue,
}

impl Field {
    /// Create a new field.
    pub fn new(name: &'static str, value: FieldValue) -> Self {
        Self { name, value }
    }
}

/// A validated, decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    protocol_type: &'static str,
    message_type: u8,
    message_name: &'static str,
    device_code: String,
    device_code_field: Bytes,
    fields: Vec<Field>,
    raw: Bytes,
}

impl ProtocolMessage {
    /// Assemble a message. Only the codec calls this, after validation.
    pub(crate) fn new(
        protocol_type: &'static str,
        message_type: u8,
        message_name: &'static str,
        device_code: String,
        device_code_field: Bytes,
        fields: Vec<Field>,
        raw: Bytes,
    ) -> Self {
        Self {
            protocol_type,
            message_type,
            message_name,
            device_code,
            device_code_field,
            fields,
            raw,
        }
    }

    /// Protocol type of the family that decoded this frame.
    #[inline]
    pub fn protocol_type(&self) -> &'static str {
        self.protocol_type
    }

    /// Message-type code (byte 2).
    #[inline]
    pub fn message_type(&self) -> u8 {
        self.message_type
    }

    /// Layout name of the message type.
    #[inline]
    pub fn message_name(&self) -> &'static str {
        self.message_name
    }

    /// Device code with padding trimmed. Bytes outside printable ASCII are
    /// escaped (`\xNN`), so distinct wire codes never share a string.
    #[inline]
    pub fn device_code(&self) -> &str {
        &self.device_code
    }

    /// The fixed-width device-code field exactly as received, padding included.
    #[inline]
    pub fn device_code_field(&self) -> &[u8] {
        &self.device_code_field
    }

    /// Payload fields in wire order.
    #[inline]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Field values in wire order, ready for re-serialization.
    pub fn values(&self) -> Vec<FieldValue> {
        self.fields.iter().map(|f| f.value).collect()
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.value)
    }

    /// Look up a field by name and widen it to `u32`.
    pub fn field_u32(&self, name: &str) -> Option<u32> {
        self.field(name).map(|v| v.as_u32())
    }

    /// Original frame bytes.
    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Original frame bytes as `Bytes` (cheap clone).
    #[inline]
    pub fn raw_bytes(&self) -> Bytes {
        self.raw.clone()
    }

    /// Field map for result payloads and logs.
    pub fn to_json(&self) -> serde_json::Value {
        let mut fields = serde_json::Map::new();
        for field in &self.fields {
            fields.insert(field.name.to_string(), serde_json::json!(field.value.as_u32()));
        }
        serde_json::json!({
            "protocol_type": self.protocol_type,
            "message": self.message_name,
            "device_code": self.device_code,
            "fields": fields,
        })
    }
}
