//! Frame buffer for reassembling frames from a raw byte stream.
//!
//! Terminal links (TCP, RS485 bridges) deliver bytes in arbitrary chunks and
//! occasionally inject line noise. Uses `bytes::BytesMut` for buffering and a
//! small state machine:
//! - `SeekingMagic`: discard bytes until the family's header magic
//! - `WaitingForFrame`: message type known, need N bytes for the full frame
//!
//! A candidate frame that fails to decode is reported and the buffer skips a
//! single byte before seeking the next magic, so one corrupt frame never
//! swallows the valid frame that follows it.
//!
//! # Example
//!
//! ```
//! use campus_devicecomm::codec::FrameCodec;
//! use campus_devicecomm::protocol::{FieldValue, FrameBuffer, ATTENDANCE_SCHEMA};
//!
//! let codec = FrameCodec::new(&ATTENDANCE_SCHEMA);
//! let frame = codec
//!     .serialize(0x01, "AT01", &[FieldValue::U32(7), FieldValue::U32(0), FieldValue::U8(1)])
//!     .unwrap();
//!
//! let mut buffer = FrameBuffer::new(codec);
//! assert!(buffer.push(&frame[..9]).is_empty());
//! let messages = buffer.push(&frame[9..]);
//! assert_eq!(messages.len(), 1);
//! assert_eq!(messages[0].as_ref().unwrap().device_code(), "AT01");
//! ```

use bytes::{Buf, BytesMut};

use super::wire_format::{MAGIC_SIZE, TYPE_SIZE};
use super::ProtocolMessage;
use crate::codec::FrameCodec;
use crate::error::{DeviceCommError, Result};

/// Initial buffer capacity; frames are tens of bytes.
const DEFAULT_CAPACITY: usize = 4 * 1024;

/// State machine for frame reassembly.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Looking for the header magic.
    SeekingMagic,
    /// Magic and type seen at the front of the buffer, waiting for `length` bytes.
    WaitingForFrame { length: usize },
}

/// Accumulates incoming bytes and yields decoded frames.
pub struct FrameBuffer {
    codec: FrameCodec,
    buffer: BytesMut,
    state: State,
    /// Bytes dropped while resynchronising.
    discarded: u64,
}

impl FrameBuffer {
    /// Create a frame buffer for one family.
    pub fn new(codec: FrameCodec) -> Self {
        Self::with_capacity(codec, DEFAULT_CAPACITY)
    }

    /// Create a frame buffer with a custom initial capacity.
    pub fn with_capacity(codec: FrameCodec, capacity: usize) -> Self {
        Self {
            codec,
            buffer: BytesMut::with_capacity(capacity),
            state: State::SeekingMagic,
            discarded: 0,
        }
    }

    /// Push data into the buffer and extract every complete frame.
    ///
    /// Decode failures are yielded in stream order alongside the valid
    /// messages; the caller decides whether to log, alert or drop them.
    pub fn push(&mut self, data: &[u8]) -> Vec<Result<ProtocolMessage>> {
        self.buffer.extend_from_slice(data);

        let mut out = Vec::new();
        while let Some(item) = self.try_extract_one() {
            out.push(item);
        }
        out
    }

    /// Try to extract a single frame.
    ///
    /// Returns `None` when more data is needed.
    fn try_extract_one(&mut self) -> Option<Result<ProtocolMessage>> {
        loop {
            match self.state {
                State::SeekingMagic => {
                    let schema = self.codec.schema();
                    match self
                        .buffer
                        .windows(MAGIC_SIZE)
                        .position(|w| w == schema.magic)
                    {
                        Some(0) => {}
                        Some(pos) => self.discard(pos),
                        None => {
                            // Keep a trailing first magic byte; its partner may be in the next read.
                            let keep = usize::from(self.buffer.last() == Some(&schema.magic[0]));
                            let drop = self.buffer.len() - keep;
                            self.discard(drop);
                            return None;
                        }
                    }

                    if self.buffer.len() < MAGIC_SIZE + TYPE_SIZE {
                        return None;
                    }

                    let code = self.buffer[MAGIC_SIZE];
                    match schema.layout(code) {
                        Some(layout) => {
                            let length = schema.frame_length(layout).max(schema.min_length);
                            self.state = State::WaitingForFrame { length };
                        }
                        None => {
                            self.discard(1);
                            return Some(Err(DeviceCommError::UnknownMessageType {
                                protocol_type: schema.protocol_type.to_string(),
                                code,
                            }));
                        }
                    }
                }

                State::WaitingForFrame { length } => {
                    if self.buffer.len() < length {
                        return None;
                    }

                    self.state = State::SeekingMagic;
                    let result = self.codec.parse(&self.buffer[..length]);
                    match &result {
                        Ok(_) => self.buffer.advance(length),
                        Err(e) => {
                            tracing::warn!(
                                protocol_type = self.codec.protocol_type(),
                                error = %e,
                                "Dropping undecodable frame, resynchronising"
                            );
                            self.discard(1);
                        }
                    }
                    return Some(result);
                }
            }
        }
    }

    fn discard(&mut self, count: usize) {
        self.buffer.advance(count);
        self.discarded += count as u64;
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Total bytes dropped while resynchronising.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::SeekingMagic;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::SeekingMagic => "SeekingMagic",
            State::WaitingForFrame { .. } => "WaitingForFrame",
        }
    }
}
