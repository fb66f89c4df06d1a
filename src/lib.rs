//! # campus-devicecomm
//!
//! Protocol layer for smart-campus terminals: access control, attendance
//! and canteen consumption devices that speak fixed-layout binary frames.
//!
//! ## Architecture
//!
//! - **Wire** ([`protocol`], [`codec`]): per-family frame schemas, byte-exact
//!   parse/serialize with a 16-bit additive checksum, stream reassembly
//! - **Handlers** ([`handler`]): one [`ProtocolHandler`](handler::ProtocolHandler)
//!   per protocol type, looked up case-insensitively through an immutable
//!   [`HandlerRegistry`](handler::HandlerRegistry)
//! - **Dispatch** ([`DispatchClient`]): sync, async, bounded-wait and batch
//!   execution over a semaphore-bounded [`WorkerPool`](pool::WorkerPool)
//!
//! Business failures are results, not errors: a handler reports an unknown
//! device or an empty wallet as a failed [`ProtocolProcessResult`]. Errors
//! are reserved for malformed frames and infrastructure faults.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use campus_devicecomm::collab::{MemoryDirectory, RecordingSink};
//! use campus_devicecomm::handler::{AttendanceHandler, CommandPayload, DeviceCommandRequest};
//! use campus_devicecomm::DispatchClient;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> campus_devicecomm::Result<()> {
//! let directory = Arc::new(MemoryDirectory::new().with_device("ATT01", 9));
//! let client = DispatchClient::builder()
//!     .handler(AttendanceHandler::new(directory, Arc::new(RecordingSink::new())))
//!     .build()?;
//!
//! let request = DeviceCommandRequest::new(9, "PUNCH", "ATTENDANCE_ENTROPY_V4_0", CommandPayload::Empty);
//! let result = client.execute_sync("attendance_entropy_v4_0", &request).await?;
//! assert_eq!(result.error_code(), Some("INVALID_PAYLOAD"));
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod collab;
pub mod config;
pub mod error;
pub mod handler;
pub mod pool;
pub mod protocol;

mod client;

pub use client::{DispatchClient, DispatchClientBuilder};
pub use config::{DispatchConfig, HandlerConfig, TimeoutPolicy};
pub use error::{DeviceCommError, Result};
pub use handler::{DeviceCommandRequest, ProtocolHandler, ProtocolProcessResult};
pub use pool::{CommandHandle, CommandState};
