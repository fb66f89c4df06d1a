//! Canteen consumption terminals (`CONSUME_ZKTECO_V1_0`).
//!
//! `TRANSACTION` frames carry a debit in cents. The amount is bounded by
//! [`HandlerConfig::max_transaction_amount`], debited from the [`Wallet`],
//! published as a `CONSUME_RECORD` and acknowledged with the new balance.
//!
//! `BALANCE_QUERY` frames are answered with a `BALANCE_ACK` frame and change
//! nothing. `DEVICE_STATUS` reports are published like every other family's.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::common::{admit_frame, device_status, occurred_at, wire_now, Admission, DEVICE_STATUS};
use super::{
    codes, BoxFuture, DeviceCommandRequest, HandlerStats, HandlerStatsSnapshot, ProtocolHandler,
    ProtocolProcessResult,
};
use crate::codec::FrameCodec;
use crate::collab::{DebitOutcome, DeviceDirectory, DeviceEvent, EventSink, Wallet};
use crate::config::HandlerConfig;
use crate::error::Result;
use crate::protocol::{message_types, FieldValue, CONSUME_SCHEMA};

const TRANSACTION: &str = "TRANSACTION";
const BALANCE_QUERY: &str = "BALANCE_QUERY";

pub struct ConsumeHandler {
    codec: FrameCodec,
    directory: Arc<dyn DeviceDirectory>,
    wallet: Arc<dyn Wallet>,
    sink: Arc<dyn EventSink>,
    config: HandlerConfig,
    stats: HandlerStats,
}

impl ConsumeHandler {
    pub fn new(
        directory: Arc<dyn DeviceDirectory>,
        wallet: Arc<dyn Wallet>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            codec: FrameCodec::new(&CONSUME_SCHEMA),
            directory,
            wallet,
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

    async fn transaction(&self, request: &DeviceCommandRequest) -> Result<ProtocolProcessResult> {
        let message = match admit_frame(
            &self.codec,
            self.directory.as_ref(),
            self.config.max_clock_skew,
            request,
            TRANSACTION,
            message_types::EVENT,
        )
        .await?
        {
            Admission::Accepted(message) => message,
            Admission::Rejected(result) => return Ok(result),
        };

        let user_id = message.field_u32("user_id").unwrap_or_default();
        let amount = message.field_u32("amount").unwrap_or_default();
        let timestamp = message.field_u32("timestamp").unwrap_or_default();

        if amount == 0 || amount > self.config.max_transaction_amount {
            return Ok(ProtocolProcessResult::failure(
                TRANSACTION,
                codes::INVALID_AMOUNT,
                format!(
                    "amount {amount} outside 1..={}",
                    self.config.max_transaction_amount
                ),
            ));
        }

        let balance = match self.wallet.debit(user_id, amount).await? {
            DebitOutcome::Approved { balance } => balance,
            DebitOutcome::Insufficient { balance } => {
                return Ok(ProtocolProcessResult::failure(
                    TRANSACTION,
                    codes::INSUFFICIENT_BALANCE,
                    format!("user {user_id} has {balance}, needs {amount}"),
                ));
            }
        };

        let mut payload = message.to_json();
        payload["balance"] = serde_json::json!(balance);
        self.sink
            .publish(DeviceEvent {
                kind: "CONSUME_RECORD".to_string(),
                device_id: request.device_id(),
                protocol_type: self.codec.protocol_type().to_string(),
                payload,
                occurred_at: occurred_at(timestamp),
            })
            .await?;

        let ack = self.codec.reply(
            &message,
            message_types::ACK,
            &[
                FieldValue::U32(user_id),
                FieldValue::U32(balance),
                FieldValue::U32(wire_now()),
                FieldValue::U8(message_types::ACK_OK),
                FieldValue::U8(0),
                FieldValue::U8(0),
            ],
        )?;

        info!(
            device_id = request.device_id(),
            user_id, amount, balance, "Transaction debited"
        );

        Ok(ProtocolProcessResult::success(TRANSACTION).with_data(serde_json::json!({
            "event": message.to_json(),
            "balance": balance,
            "ack_frame": hex::encode_upper(&ack),
        })))
    }

    async fn balance_query(&self, request: &DeviceCommandRequest) -> Result<ProtocolProcessResult> {
        let message = match admit_frame(
            &self.codec,
            self.directory.as_ref(),
            self.config.max_clock_skew,
            request,
            BALANCE_QUERY,
            message_types::BALANCE_QUERY,
        )
        .await?
        {
            Admission::Accepted(message) => message,
            Admission::Rejected(result) => return Ok(result),
        };

        let user_id = message.field_u32("user_id").unwrap_or_default();
        let balance = self.wallet.query_balance(user_id).await?;

        let ack = self.codec.reply(
            &message,
            message_types::BALANCE_ACK,
            &[
                FieldValue::U32(user_id),
                FieldValue::U32(balance),
                FieldValue::U32(wire_now()),
                FieldValue::U8(message_types::ACK_OK),
                FieldValue::U8(0),
                FieldValue::U8(0),
            ],
        )?;

        debug!(device_id = request.device_id(), user_id, balance, "Balance queried");

        Ok(ProtocolProcessResult::success(BALANCE_QUERY).with_data(serde_json::json!({
            "user_id": user_id,
            "balance": balance,
            "ack_frame": hex::encode_upper(&ack),
        })))
    }
}

impl ProtocolHandler for ConsumeHandler {
    fn protocol_type(&self) -> &str {
        self.codec.protocol_type()
    }

    fn handle<'a>(
        &'a self,
        request: &'a DeviceCommandRequest,
    ) -> BoxFuture<'a, Result<ProtocolProcessResult>> {
        Box::pin(async move {
            let command = request.command_type().to_ascii_uppercase();
            debug!(device_id = request.device_id(), command = %command, "Consume command");

            let outcome = match command.as_str() {
                TRANSACTION => self.transaction(request).await,
                BALANCE_QUERY => self.balance_query(request).await,
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
                    format!("consumption terminals do not support {other}"),
                )),
            };

            if let Ok(result) = &outcome {
                if let Some(code) = result.error_code() {
                    warn!(device_id = request.device_id(), code, "Consume command rejected");
                }
            }
            self.stats.record(&outcome);
            outcome
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{MemoryDirectory, MemoryWallet, RecordingSink};
    use crate::handler::CommandPayload;
    use bytes::Bytes;

    fn transaction_frame(user_id: u32, amount: u32) -> Bytes {
        FrameCodec::new(&CONSUME_SCHEMA)
            .serialize(
                message_types::EVENT,
                "POS0001",
                &[
                    FieldValue::U32(user_id),
                    FieldValue::U32(amount),
                    FieldValue::U32(wire_now()),
                    FieldValue::U8(1),
                    FieldValue::U8(2),
                    FieldValue::U8(3),
                ],
            )
            .unwrap()
    }

    fn request(frame: Bytes) -> DeviceCommandRequest {
        DeviceCommandRequest::new(
            77,
            "TRANSACTION",
            CONSUME_SCHEMA.protocol_type,
            CommandPayload::Frame(frame),
        )
    }

    struct Fixture {
        handler: ConsumeHandler,
        wallet: Arc<MemoryWallet>,
        sink: Arc<RecordingSink>,
    }

    fn fixture() -> Fixture {
        let wallet = Arc::new(MemoryWallet::new().with_balance(3003, 1_500));
        let sink = Arc::new(RecordingSink::new());
        let handler = ConsumeHandler::new(
            Arc::new(MemoryDirectory::new().with_device("POS0001", 77)),
            wallet.clone(),
            sink.clone(),
        );
        Fixture { handler, wallet, sink }
    }

    #[tokio::test]
    async fn test_transaction_debits_wallet() {
        let f = fixture();

        let result = f.handler.handle(&request(transaction_frame(3003, 650))).await.unwrap();
        assert!(result.is_success(), "{result:?}");
        assert_eq!(result.data().unwrap()["balance"], 850);
        assert_eq!(f.wallet.balance(3003).await, 850);

        let ack = hex::decode(result.data().unwrap()["ack_frame"].as_str().unwrap()).unwrap();
        let ack = FrameCodec::new(&CONSUME_SCHEMA).parse(&ack).unwrap();
        assert_eq!(ack.field_u32("balance"), Some(850));

        let events = f.sink.events().await;
        assert_eq!(events[0].kind, "CONSUME_RECORD");
        assert_eq!(events[0].payload["fields"]["amount"], 650);
    }

    #[tokio::test]
    async fn test_insufficient_balance_leaves_wallet_untouched() {
        let f = fixture();

        let result = f.handler.handle(&request(transaction_frame(3003, 2_000))).await.unwrap();
        assert_eq!(result.error_code(), Some(codes::INSUFFICIENT_BALANCE));
        assert_eq!(f.wallet.balance(3003).await, 1_500);
        assert!(f.sink.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_amount_bounds() {
        let f = fixture();

        let zero = f.handler.handle(&request(transaction_frame(3003, 0))).await.unwrap();
        assert_eq!(zero.error_code(), Some(codes::INVALID_AMOUNT));

        let huge = f
            .handler
            .handle(&request(transaction_frame(3003, DEFAULT_LIMIT + 1)))
            .await
            .unwrap();
        assert_eq!(huge.error_code(), Some(codes::INVALID_AMOUNT));
        assert_eq!(f.handler.stats().rejected, 2);
    }

    const DEFAULT_LIMIT: u32 = crate::config::DEFAULT_MAX_TRANSACTION_AMOUNT;

    #[tokio::test]
    async fn test_custom_limit() {
        let f = fixture();
        let handler = f.handler.with_config(HandlerConfig {
            max_transaction_amount: 500,
            ..HandlerConfig::default()
        });

        let result = handler.handle(&request(transaction_frame(3003, 650))).await.unwrap();
        assert_eq!(result.error_code(), Some(codes::INVALID_AMOUNT));
    }

    #[tokio::test]
    async fn test_balance_query_answers_without_debit() {
        let f = fixture();
        let frame = FrameCodec::new(&CONSUME_SCHEMA)
            .serialize(
                message_types::BALANCE_QUERY,
                "POS0001",
                &[
                    FieldValue::U32(3003),
                    FieldValue::U32(wire_now()),
                    FieldValue::U32(0),
                    FieldValue::U8(0),
                    FieldValue::U8(0),
                    FieldValue::U8(0),
                ],
            )
            .unwrap();
        let request = DeviceCommandRequest::new(
            77,
            "BALANCE_QUERY",
            CONSUME_SCHEMA.protocol_type,
            CommandPayload::Frame(frame),
        );

        let result = f.handler.handle(&request).await.unwrap();
        assert!(result.is_success(), "{result:?}");
        assert_eq!(result.data().unwrap()["balance"], 1_500);

        let ack = hex::decode(result.data().unwrap()["ack_frame"].as_str().unwrap()).unwrap();
        let ack = FrameCodec::new(&CONSUME_SCHEMA).parse(&ack).unwrap();
        assert_eq!(ack.message_name(), "BALANCE_ACK");
        assert_eq!(ack.field_u32("balance"), Some(1_500));

        assert_eq!(f.wallet.balance(3003).await, 1_500);
        assert!(f.sink.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_device_status_published() {
        let f = fixture();
        let frame = FrameCodec::new(&CONSUME_SCHEMA)
            .serialize(
                message_types::DEVICE_STATUS,
                "POS0001",
                &[
                    FieldValue::U32(wire_now()),
                    FieldValue::U32(12),
                    FieldValue::U32(0),
                    FieldValue::U8(0),
                    FieldValue::U8(0),
                    FieldValue::U8(0),
                ],
            )
            .unwrap();
        let request = DeviceCommandRequest::new(
            77,
            "DEVICE_STATUS",
            CONSUME_SCHEMA.protocol_type,
            CommandPayload::Frame(frame),
        );

        let result = f.handler.handle(&request).await.unwrap();
        assert_eq!(result.data().unwrap()["device_status"], "OFFLINE");
        assert_eq!(f.sink.events().await[0].payload["fields"]["pending_records"], 12);
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let f = fixture();
        let frame = transaction_frame(3003, 100).slice(..20);

        let err = f.handler.handle(&request(frame)).await.unwrap_err();
        assert!(err.is_frame_error());
    }
}
