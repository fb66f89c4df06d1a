//! Codec module - binary frame parsing and building.
//!
//! - [`FrameCodec`] - parse/serialize frames for one terminal family
//!
//! # Design
//!
//! The codec is a copyable view over a `'static` [`FrameSchema`](crate::protocol::FrameSchema)
//! rather than a trait object. Each handler owns the codec of its family;
//! adding a family means adding a schema, not a new codec type.
//!
//! # Example
//!
//! ```
//! use campus_devicecomm::codec::FrameCodec;
//! use campus_devicecomm::protocol::ATTENDANCE_SCHEMA;
//!
//! let codec = FrameCodec::new(&ATTENDANCE_SCHEMA);
//! assert_eq!(codec.protocol_type(), "ATTENDANCE_ENTROPY_V4_0");
//! assert!(codec.parse(&[0x55, 0xAA]).is_err());
//! ```

mod frame_codec;

pub use frame_codec::FrameCodec;
