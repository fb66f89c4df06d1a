//! Access-control terminals (`ACCESS_ENTROPY_V4_8`).
//!
//! Commands:
//! - `ACCESS_EVENT` - a door event frame from the terminal. Checked against
//!   the device directory, the clock window and the access policy, then
//!   published as an `ACCESS_RECORD`. The result data carries the ack frame.
//! - `OPEN_DOOR` - remote open, params `{ "door": n }`, published as a
//!   `REMOTE_OPEN` command.
//! - `ALARM_EVENT` - a door alarm frame, published as an `ALARM_RECORD`.
//! - `DEVICE_STATUS` - a status report frame, published as `DEVICE_STATUS`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::common::{admit_frame, device_status, occurred_at, wire_now, Admission, DEVICE_STATUS};
use super::{
    codes, BoxFuture, DeviceCommandRequest, HandlerStats, HandlerStatsSnapshot, ProtocolHandler,
    ProtocolProcessResult,
};
use crate::codec::FrameCodec;
use crate::collab::{AccessPolicy, DeviceDirectory, DeviceEvent, EventSink};
use crate::config::HandlerConfig;
use crate::error::Result;
use crate::protocol::{message_types, FieldValue, ACCESS_SCHEMA};

const ACCESS_EVENT: &str = "ACCESS_EVENT";
const OPEN_DOOR: &str = "OPEN_DOOR";
const ALARM_EVENT: &str = "ALARM_EVENT";

/// Handler for access-control terminals.
pub struct AccessHandler {
    codec: FrameCodec,
    directory: Arc<dyn DeviceDirectory>,
    policy: Arc<dyn AccessPolicy>,
    sink: Arc<dyn EventSink>,
    config: HandlerConfig,
    stats: HandlerStats,
}

impl AccessHandler {
    /// Create a handler with default validation settings.
    pub fn new(
        directory: Arc<dyn DeviceDirectory>,
        policy: Arc<dyn AccessPolicy>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            codec: FrameCodec::new(&ACCESS_SCHEMA),
            directory,
            policy,
            sink,
            config: HandlerConfig::default(),
            stats: HandlerStats::default(),
        }
    }

    /// Override validation settings.
    pub fn with_config(mut self, config: HandlerConfig) -> Self {
        self.config = config;
        self
    }

    /// Outcome counters.
    pub fn stats(&self) -> HandlerStatsSnapshot {
        self.stats.snapshot()
    }

    async fn access_event(&self, request: &DeviceCommandRequest) -> Result<ProtocolProcessResult> {
        let message = match admit_frame(
            &self.codec,
            self.directory.as_ref(),
            self.config.max_clock_skew,
            request,
            ACCESS_EVENT,
            message_types::EVENT,
        )
        .await?
        {
            Admission::Accepted(message) => message,
            Admission::Rejected(result) => return Ok(result),
        };

        let user_id = message.field_u32("user_id").unwrap_or_default();
        let timestamp = message.field_u32("timestamp").unwrap_or_default();
        let door = message
            .field("door")
            .map(|v| v.as_u32() as u8)
            .unwrap_or_default();

        if !self
            .policy
            .is_permitted(user_id, request.device_id(), door)
            .await?
        {
            return Ok(ProtocolProcessResult::failure(
                ACCESS_EVENT,
                codes::PERMISSION_DENIED,
                format!("user {user_id} may not pass door {door}"),
            ));
        }

        self.sink
            .publish(DeviceEvent {
                kind: "ACCESS_RECORD".to_string(),
                device_id: request.device_id(),
                protocol_type: self.codec.protocol_type().to_string(),
                payload: message.to_json(),
                occurred_at: occurred_at(timestamp),
            })
            .await?;

        let ack = self.codec.reply(
            &message,
            message_types::ACK,
            &[
                FieldValue::U32(user_id),
                FieldValue::U32(wire_now()),
                FieldValue::U8(message_types::ACK_OK),
                FieldValue::U8(door),
                FieldValue::U8(0),
            ],
        )?;

        debug!(
            device_id = request.device_id(),
            user_id, door, "Access event admitted"
        );

        Ok(ProtocolProcessResult::success(ACCESS_EVENT).with_data(serde_json::json!({
            "event": message.to_json(),
            "ack_frame": hex::encode_upper(&ack),
        })))
    }

    async fn alarm_event(&self, request: &DeviceCommandRequest) -> Result<ProtocolProcessResult> {
        let message = match admit_frame(
            &self.codec,
            self.directory.as_ref(),
            self.config.max_clock_skew,
            request,
            ALARM_EVENT,
            message_types::ALARM_EVENT,
        )
        .await?
        {
            Admission::Accepted(message) => message,
            Admission::Rejected(result) => return Ok(result),
        };

        let timestamp = message.field_u32("timestamp").unwrap_or_default();
        let alarm_type = message.field_u32("alarm_type").unwrap_or_default();
        let alarm_level = message.field_u32("alarm_level").unwrap_or_default();

        self.sink
            .publish(DeviceEvent {
                kind: "ALARM_RECORD".to_string(),
                device_id: request.device_id(),
                protocol_type: self.codec.protocol_type().to_string(),
                payload: message.to_json(),
                occurred_at: occurred_at(timestamp),
            })
            .await?;

        info!(
            device_id = request.device_id(),
            alarm_type, alarm_level, "Door alarm raised"
        );

        Ok(ProtocolProcessResult::success(ALARM_EVENT).with_data(serde_json::json!({
            "event": message.to_json(),
            "alarm_type": alarm_type,
            "alarm_level": alarm_level,
        })))
    }

    async fn open_door(&self, request: &DeviceCommandRequest) -> Result<ProtocolProcessResult> {
        let door = request
            .payload()
            .params()
            .and_then(|p| p.get("door"))
            .and_then(|d| d.as_u64())
            .and_then(|d| u8::try_from(d).ok());

        let Some(door) = door else {
            return Ok(ProtocolProcessResult::failure(
                OPEN_DOOR,
                codes::INVALID_PAYLOAD,
                "OPEN_DOOR requires params { \"door\": 0-255 }",
            ));
        };

        self.sink
            .publish(DeviceEvent {
                kind: "REMOTE_OPEN".to_string(),
                device_id: request.device_id(),
                protocol_type: self.codec.protocol_type().to_string(),
                payload: serde_json::json!({ "door": door }),
                occurred_at: request.submitted_at(),
            })
            .await?;

        Ok(ProtocolProcessResult::success(OPEN_DOOR).with_data(serde_json::json!({ "door": door })))
    }
}

impl ProtocolHandler for AccessHandler {
    fn protocol_type(&self) -> &str {
        self.codec.protocol_type()
    }

    fn handle<'a>(
        &'a self,
        request: &'a DeviceCommandRequest,
    ) -> BoxFuture<'a, Result<ProtocolProcessResult>> {
        Box::pin(async move {
            let command = request.command_type().to_ascii_uppercase();
            let outcome = match command.as_str() {
                ACCESS_EVENT => self.access_event(request).await,
                OPEN_DOOR => self.open_door(request).await,
                ALARM_EVENT => self.alarm_event(request).await,
                DEVICE_STATUS => {
                    device_status(
                        &self.codec,
                        self.directory.as_ref(),
                        self.sink.as_ref(),
                        self.config.max_clock_skew,
                        request,
                    )
                    .await
                }
                other => Ok(ProtocolProcessResult::failure(
                    other,
                    codes::UNKNOWN_BUSINESS_TYPE,
                    format!("access terminals do not support {other}"),
                )),
            };

            if let Ok(result) = &outcome {
                if let Some(code) = result.error_code() {
                    warn!(device_id = request.device_id(), code, "Access command rejected");
                }
            }
            self.stats.record(&outcome);
            outcome
        })
    }
}
