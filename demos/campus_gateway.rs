//! Campus Gateway - dispatching terminal frames through the built-in handlers.
//!
//! This example demonstrates:
//! - Wiring the access, attendance and consumption handlers into one client
//! - Reassembling frames from a noisy byte stream with `FrameBuffer`
//! - Sync, bounded-wait and batch execution
//!
//! # Running
//!
//! ```sh
//! RUST_LOG=campus_devicecomm=debug cargo run --example campus_gateway
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing_subscriber::EnvFilter;

use campus_devicecomm::codec::FrameCodec;
use campus_devicecomm::collab::{MemoryAccessPolicy, MemoryDirectory, MemoryWallet, RecordingSink};
use campus_devicecomm::handler::{
    AccessHandler, AttendanceHandler, CommandPayload, ConsumeHandler, DeviceCommandRequest,
};
use campus_devicecomm::protocol::{
    message_types, FieldValue, FrameBuffer, ACCESS_SCHEMA, ATTENDANCE_SCHEMA, CONSUME_SCHEMA,
};
use campus_devicecomm::DispatchClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let directory = Arc::new(
        MemoryDirectory::new()
            .with_device("GATE-N1", 1)
            .with_device("ATT01", 2)
            .with_device("POS0001", 3),
    );
    let wallet = Arc::new(MemoryWallet::new().with_balance(1001, 5_000));
    let sink = Arc::new(RecordingSink::new());

    let client = DispatchClient::builder()
        .handler(AccessHandler::new(
            directory.clone(),
            Arc::new(MemoryAccessPolicy::new().grant(1001, 0)),
            sink.clone(),
        ))
        .handler(AttendanceHandler::new(directory.clone(), sink.clone()))
        .handler(ConsumeHandler::new(directory, wallet.clone(), sink.clone()))
        .worker_pool_size(4)
        .build()?;

    println!("Supported protocols: {:?}", client.list_supported_protocols());

    let now = Utc::now().timestamp() as u32;

    // A gate terminal sends two events over a noisy serial bridge
    let access = FrameCodec::new(&ACCESS_SCHEMA);
    let mut stream = vec![0xFF, 0x00];
    for door in [1u8, 2] {
        let frame = access.serialize(
            message_types::EVENT,
            "GATE-N1",
            &[
                FieldValue::U32(1001),
                FieldValue::U32(now),
                FieldValue::U8(0),
                FieldValue::U8(door),
                FieldValue::U8(1),
            ],
        )?;
        stream.extend_from_slice(&frame);
    }

    let mut buffer = FrameBuffer::new(access);
    for chunk in stream.chunks(7) {
        for decoded in buffer.push(chunk) {
            let message = decoded?;
            let request = DeviceCommandRequest::new(
                1,
                "ACCESS_EVENT",
                access.protocol_type(),
                CommandPayload::Frame(message.raw_bytes()),
            );
            let result = client.execute_sync(access.protocol_type(), &request).await?;
            println!("Access: {}", serde_json::to_string(&result)?);
        }
    }

    // Canteen purchase with a bounded wait
    let purchase = FrameCodec::new(&CONSUME_SCHEMA).serialize(
        message_types::EVENT,
        "POS0001",
        &[
            FieldValue::U32(1001),
            FieldValue::U32(1_250),
            FieldValue::U32(now),
            FieldValue::U8(1),
            FieldValue::U8(1),
            FieldValue::U8(2),
        ],
    )?;
    let result = client
        .execute_with_timeout(
            CONSUME_SCHEMA.protocol_type,
            DeviceCommandRequest::new(
                3,
                "TRANSACTION",
                CONSUME_SCHEMA.protocol_type,
                CommandPayload::Frame(purchase),
            ),
            Duration::from_secs(2),
        )
        .await?;
    println!("Consume: {}", serde_json::to_string(&result)?);
    println!("Balance of 1001: {}", wallet.balance(1001).await);

    // Morning punches in one batch
    let attendance = FrameCodec::new(&ATTENDANCE_SCHEMA);
    let mut punches = Vec::new();
    for user in 2001..2004u32 {
        let frame = attendance.serialize(
            message_types::EVENT,
            "ATT01",
            &[FieldValue::U32(user), FieldValue::U32(now), FieldValue::U8(1)],
        )?;
        punches.push(DeviceCommandRequest::new(
            2,
            "PUNCH",
            ATTENDANCE_SCHEMA.protocol_type,
            CommandPayload::Frame(frame),
        ));
    }
    let results = client
        .execute_batch(ATTENDANCE_SCHEMA.protocol_type, punches)
        .await?;
    for (id, result) in &results {
        println!("Punch {id}: success={}", result.is_success());
    }

    println!("Published {} events", sink.events().await.len());
    Ok(())
}
