//! Checks shared by the frame-carrying commands of every family.

use std::time::Duration;

use chrono::{DateTime, Utc};

use tracing::debug;

use super::{codes, DeviceCommandRequest, ProtocolProcessResult};
use crate::codec::FrameCodec;
use crate::collab::{DeviceDirectory, DeviceEvent, EventSink};
use crate::error::Result;
use crate::protocol::{message_types, ProtocolMessage};

pub(crate) const DEVICE_STATUS: &str = "DEVICE_STATUS";

/// Outcome of admitting an inbound frame.
pub(crate) enum Admission {
    /// Frame decoded and passed every business check.
    Accepted(ProtocolMessage),
    /// A business check failed; report this result.
    Rejected(ProtocolProcessResult),
}

/// Decode the request's frame and run the checks every family shares:
/// payload shape, message type, device registration, clock skew.
///
/// Decode failures propagate as errors; they are protocol violations, not
/// business outcomes.
pub(crate) async fn admit_frame(
    codec: &FrameCodec,
    directory: &dyn DeviceDirectory,
    max_clock_skew: Duration,
    request: &DeviceCommandRequest,
    business_type: &str,
    expected: u8,
) -> Result<Admission> {
    let Some(frame) = request.payload().frame() else {
        return Ok(Admission::Rejected(ProtocolProcessResult::failure(
            business_type,
            codes::INVALID_PAYLOAD,
            format!("{business_type} requires a frame payload"),
        )));
    };

    let message = codec.parse(frame)?;

    if message.message_type() != expected {
        return Ok(Admission::Rejected(ProtocolProcessResult::failure(
            business_type,
            codes::INVALID_PAYLOAD,
            format!("{business_type} cannot carry a {} frame", message.message_name()),
        )));
    }

    match directory.lookup(message.device_code()).await? {
        None => {
            return Ok(Admission::Rejected(ProtocolProcessResult::failure(
                business_type,
                codes::UNKNOWN_DEVICE,
                format!("device code {:?} is not registered", message.device_code()),
            )));
        }
        Some(id) if id != request.device_id() => {
            return Ok(Admission::Rejected(ProtocolProcessResult::failure(
                business_type,
                codes::DEVICE_MISMATCH,
                format!(
                    "device code {:?} belongs to device {id}, not {}",
                    message.device_code(),
                    request.device_id()
                ),
            )));
        }
        Some(_) => {}
    }

    let timestamp = message.field_u32("timestamp").unwrap_or_default();
    if !within_skew(timestamp, Utc::now(), max_clock_skew) {
        return Ok(Admission::Rejected(ProtocolProcessResult::failure(
            business_type,
            codes::TIMESTAMP_OUT_OF_RANGE,
            format!("frame timestamp {timestamp} is outside the allowed window of {max_clock_skew:?}"),
        )));
    }

    Ok(Admission::Accepted(message))
}

/// Handle a `DEVICE_STATUS` report; every family shares the command.
///
/// Status code 1 is online, 2 is under maintenance, anything else offline.
/// The report is published as a `DEVICE_STATUS` record.
pub(crate) async fn device_status(
    codec: &FrameCodec,
    directory: &dyn DeviceDirectory,
    sink: &dyn EventSink,
    max_clock_skew: Duration,
    request: &DeviceCommandRequest,
) -> Result<ProtocolProcessResult> {
    let message = match admit_frame(
        codec,
        directory,
        max_clock_skew,
        request,
        DEVICE_STATUS,
        message_types::DEVICE_STATUS,
    )
    .await?
    {
        Admission::Accepted(message) => message,
        Admission::Rejected(result) => return Ok(result),
    };

    let status = status_name(message.field_u32("status_code").unwrap_or_default());
    let timestamp = message.field_u32("timestamp").unwrap_or_default();

    let mut payload = message.to_json();
    payload["device_status"] = serde_json::json!(status);
    sink.publish(DeviceEvent {
        kind: DEVICE_STATUS.to_string(),
        device_id: request.device_id(),
        protocol_type: codec.protocol_type().to_string(),
        payload,
        occurred_at: occurred_at(timestamp),
    })
    .await?;

    debug!(device_id = request.device_id(), status, "Device status reported");

    Ok(ProtocolProcessResult::success(DEVICE_STATUS).with_data(serde_json::json!({
        "event": message.to_json(),
        "device_status": status,
    })))
}

fn status_name(code: u32) -> &'static str {
    match code {
        1 => "ONLINE",
        2 => "MAINTAIN",
        _ => "OFFLINE",
    }
}

/// True if a unix-seconds timestamp lies within `skew` of `now`.
pub(crate) fn within_skew(timestamp: u32, now: DateTime<Utc>, skew: Duration) -> bool {
    let distance = (now.timestamp() - i64::from(timestamp)).unsigned_abs();
    distance <= skew.as_secs()
}

/// Current time as a 32-bit unix-seconds wire timestamp.
pub(crate) fn wire_now() -> u32 {
    u32::try_from(Utc::now().timestamp()).unwrap_or(u32::MAX)
}

/// Convert a wire timestamp for event records.
pub(crate) fn occurred_at(timestamp: u32) -> DateTime<Utc> {
    DateTime::from_timestamp(i64::from(timestamp), 0).unwrap_or_else(Utc::now)
}
