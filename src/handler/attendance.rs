//! Attendance terminals (`ATTENDANCE_ENTROPY_V4_0`).

use std::sync::Arc;

use tracing::{debug, warn};

use super::common::{admit_frame, device_status, occurred_at, wire_now, Admission, DEVICE_STATUS};
use super::{
    codes, BoxFuture, DeviceCommandRequest, HandlerStats, HandlerStatsSnapshot, ProtocolHandler,
    ProtocolProcessResult,
};
use crate::codec::FrameCodec;
use crate::collab::{DeviceDirectory, DeviceEvent, EventSink};
use crate::config::HandlerConfig;
use crate::error::Result;
use crate::protocol::{message_types, FieldValue, ATTENDANCE_SCHEMA};

const PUNCH: &str = "PUNCH";

/// Handler for attendance terminals. `PUNCH` is a clock-in frame published
/// as an `ATTENDANCE_RECORD`; `DEVICE_STATUS` is the terminal's status report.
pub struct AttendanceHandler {
    codec: FrameCodec,
    directory: Arc<dyn DeviceDirectory>,
    sink: Arc<dyn EventSink>,
    config: HandlerConfig,
    stats: HandlerStats,
}

impl AttendanceHandler {
    pub fn new(directory: Arc<dyn DeviceDirectory>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            codec: FrameCodec::new(&ATTENDANCE_SCHEMA),
            directory,
            sink,
            config: HandlerConfig::default(),
            stats: HandlerStats::default(),
        }
    }

    pub fn with_config(mut self, config: HandlerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn stats(&self) -> HandlerStatsSnapshot {
        self.stats.snapshot()
    }

    async fn punch(&self, request: &DeviceCommandRequest) -> Result<ProtocolProcessResult> {
        let message = match admit_frame(
            &self.codec,
            self.directory.as_ref(),
            self.config.max_clock_skew,
            request,
            PUNCH,
            message_types::EVENT,
        )
        .await?
        {
            Admission::Accepted(message) => message,
            Admission::Rejected(result) => return Ok(result),
        };

        let user_id = message.field_u32("user_id").unwrap_or_default();
        let timestamp = message.field_u32("timestamp").unwrap_or_default();

        self.sink
            .publish(DeviceEvent {
                kind: "ATTENDANCE_RECORD".to_string(),
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
            ],
        )?;

        debug!(device_id = request.device_id(), user_id, "Punch recorded");

        Ok(ProtocolProcessResult::success(PUNCH).with_data(serde_json::json!({
            "event": message.to_json(),
            "ack_frame": hex::encode_upper(&ack),
        })))
    }
}

impl ProtocolHandler for AttendanceHandler {
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
                PUNCH => self.punch(request).await,
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
                    format!("attendance terminals do not support {other}"),
                )),
            };

            if let Ok(result) = &outcome {
                if let Some(code) = result.error_code() {
                    warn!(device_id = request.device_id(), code, "Attendance command rejected");
                }
            }
            self.stats.record(&outcome);
            outcome
        })
    }
}
