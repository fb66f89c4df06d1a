//! Property tests for the frame checksum and codec.

use campus_devicecomm::codec::FrameCodec;
use campus_devicecomm::protocol::{
    checksum, message_types, trailing_checksum, FieldValue, FrameBuffer, FrameSchema,
    ACCESS_SCHEMA, ATTENDANCE_SCHEMA, CONSUME_SCHEMA,
};
use campus_devicecomm::DeviceCommError;
use proptest::prelude::*;

fn device_code_strategy(max_len: usize) -> impl Strategy<Value = String> {
    proptest::string::string_regex(&format!("[A-Z0-9]{{1,{max_len}}}")).unwrap()
}

fn access_values() -> impl Strategy<Value = Vec<FieldValue>> {
    (any::<u32>(), any::<u32>(), any::<u8>(), any::<u8>(), any::<u8>()).prop_map(
        |(user, ts, event, door, mode)| {
            vec![
                FieldValue::U32(user),
                FieldValue::U32(ts),
                FieldValue::U8(event),
                FieldValue::U8(door),
                FieldValue::U8(mode),
            ]
        },
    )
}

const SCHEMAS: [&FrameSchema; 3] = [&ACCESS_SCHEMA, &ATTENDANCE_SCHEMA, &CONSUME_SCHEMA];

/// Assemble a frame byte by byte: any device-code bytes, any payload bytes,
/// correct trailing checksum.
fn hand_built_frame(schema: &FrameSchema, code: u8, device: &[u8], payload: &[u8]) -> Vec<u8> {
    let layout = schema.layout(code).unwrap();
    let mut frame = schema.magic.to_vec();
    frame.push(code);
    frame.extend_from_slice(&device[..schema.device_code_width]);
    frame.extend_from_slice(&payload[..layout.fields_size()]);
    frame.extend_from_slice(&[0, 0]);
    let len = frame.len();
    let sum = checksum(&frame);
    frame[len - 2..].copy_from_slice(&sum.to_le_bytes());
    frame
}

proptest! {
    /// Property: any valid frame re-encodes to itself, checksum included
    #[test]
    fn parsed_frames_encode_back_unchanged(
        family in 0usize..3,
        layout in any::<prop::sample::Index>(),
        device in proptest::collection::vec(any::<u8>(), 8),
        payload in proptest::collection::vec(any::<u8>(), 32),
    ) {
        let schema = SCHEMAS[family];
        let code = schema.messages[layout.index(schema.messages.len())].code;
        let frame = hand_built_frame(schema, code, &device, &payload);

        let codec = FrameCodec::new(SCHEMAS[family]);
        let message = codec.parse(&frame).unwrap();
        let rebuilt = codec.encode(&message).unwrap();

        prop_assert_eq!(trailing_checksum(&rebuilt), trailing_checksum(&frame));
        prop_assert_eq!(&rebuilt[..], &frame[..]);
    }

    /// Property: NUL and space padding both survive parse and encode
    #[test]
    fn padded_device_codes_encode_back_unchanged(
        code in device_code_strategy(8),
        pad in prop_oneof![Just(0u8), Just(b' ')],
        payload in proptest::collection::vec(any::<u8>(), 11),
    ) {
        let mut device = code.clone().into_bytes();
        device.resize(8, pad);
        let frame = hand_built_frame(&ACCESS_SCHEMA, message_types::EVENT, &device, &payload);

        let codec = FrameCodec::new(&ACCESS_SCHEMA);
        let message = codec.parse(&frame).unwrap();
        prop_assert_eq!(message.device_code(), code.as_str());
        prop_assert_eq!(&codec.encode(&message).unwrap()[..], &frame[..]);
    }

    /// Property: serialized frames always carry the checksum of their window
    #[test]
    fn serialized_frames_parse_back(code in device_code_strategy(8), values in access_values()) {
        let codec = FrameCodec::new(&ACCESS_SCHEMA);
        let frame = codec.serialize(message_types::EVENT, &code, &values).unwrap();

        prop_assert_eq!(trailing_checksum(&frame), Some(checksum(&frame)));

        let message = codec.parse(&frame).unwrap();
        prop_assert_eq!(message.device_code(), code.as_str());
        prop_assert_eq!(message.values(), values);
    }

    /// Property: any single-bit flip inside the checksum window is detected
    #[test]
    fn single_bit_flips_are_detected(
        values in access_values(),
        offset in 2usize..22,
        bit in 0u8..8,
    ) {
        let codec = FrameCodec::new(&ACCESS_SCHEMA);
        let mut frame = codec.serialize(message_types::EVENT, "DEV001", &values).unwrap().to_vec();
        frame[offset] ^= 1 << bit;

        let err = codec.parse(&frame).unwrap_err();
        let is_checksum_mismatch = matches!(err, DeviceCommError::ChecksumMismatch { .. });
        prop_assert!(is_checksum_mismatch, "unexpected error: {:?}", err);
    }

    /// Property: frames shorter than the family minimum are always too short
    #[test]
    fn short_frames_rejected_first(bytes in proptest::collection::vec(any::<u8>(), 0..28)) {
        let err = FrameCodec::new(&CONSUME_SCHEMA).parse(&bytes).unwrap_err();
        let is_too_short = matches!(err, DeviceCommError::FrameTooShort { minimum: 28, .. });
        prop_assert!(is_too_short);
    }

    /// Property: chunking a stream never changes what the frame buffer yields
    #[test]
    fn frame_buffer_is_chunking_invariant(
        frames in proptest::collection::vec(access_values(), 1..6),
        chunk in 1usize..30,
    ) {
        let codec = FrameCodec::new(&ACCESS_SCHEMA);
        let mut stream = Vec::new();
        for values in &frames {
            stream.extend_from_slice(&codec.serialize(message_types::EVENT, "DEV001", values).unwrap());
        }

        let mut buffer = FrameBuffer::new(codec);
        let mut decoded = Vec::new();
        for piece in stream.chunks(chunk) {
            for item in buffer.push(piece) {
                decoded.push(item.unwrap().values());
            }
        }

        prop_assert_eq!(decoded, frames);
        prop_assert!(buffer.is_empty());
    }
}
