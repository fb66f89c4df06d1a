//! Handler module - the protocol-handler capability and its registry.
//!
//! Provides:
//! - [`ProtocolHandler`] - one implementation per protocol type
//! - [`HandlerRegistry`] - maps protocol types to handlers, built once
//! - [`AccessHandler`], [`AttendanceHandler`], [`ConsumeHandler`] - the built-in families
//! - [`FnHandler`] - adapts an async closure into a handler
//!
//! # Example
//!
//! ```
//! use campus_devicecomm::handler::{FnHandler, HandlerRegistry, ProtocolProcessResult};
//!
//! let registry = HandlerRegistry::builder()
//!     .register(FnHandler::new("access", |request| async move {
//!         Ok(ProtocolProcessResult::success(request.command_type()))
//!     }))
//!     .build()
//!     .unwrap();
//!
//! assert!(registry.resolve("ACCESS").is_ok());
//! ```

mod access;
mod attendance;
mod common;
mod consume;
mod registry;
mod request;

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

pub use access::AccessHandler;
pub use attendance::AttendanceHandler;
pub use consume::ConsumeHandler;
pub use registry::{HandlerRegistry, HandlerRegistryBuilder};
pub use request::{CommandPayload, DeviceCommandRequest, ProtocolProcessResult};

use crate::error::Result;

/// Boxed future returned by handlers and collaborators.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Business error codes reported through [`ProtocolProcessResult::failure`].
pub mod codes {
    pub const UNKNOWN_DEVICE: &str = "UNKNOWN_DEVICE";
    pub const DEVICE_MISMATCH: &str = "DEVICE_MISMATCH";
    pub const TIMESTAMP_OUT_OF_RANGE: &str = "TIMESTAMP_OUT_OF_RANGE";
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const INVALID_AMOUNT: &str = "INVALID_AMOUNT";
    pub const INSUFFICIENT_BALANCE: &str = "INSUFFICIENT_BALANCE";
    pub const UNKNOWN_BUSINESS_TYPE: &str = "UNKNOWN_BUSINESS_TYPE";
    pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
    /// Per-item failure inside a batch.
    pub const BATCH_COMMAND_FAILED: &str = "BATCH_COMMAND_FAILED";
}

/// A protocol handler.
///
/// Expected business failures come back as `Ok` with a failed
/// [`ProtocolProcessResult`]. `Err` is reserved for infrastructure and
/// protocol-violation faults. The registry shares one instance across all
/// calls, so implementations must tolerate concurrent `handle` calls.
pub trait ProtocolHandler: Send + Sync + 'static {
    /// Protocol type this handler serves (matched case-insensitively).
    fn protocol_type(&self) -> &str;

    /// Handle one request.
    fn handle<'a>(
        &'a self,
        request: &'a DeviceCommandRequest,
    ) -> BoxFuture<'a, Result<ProtocolProcessResult>>;
}

/// Handler built from an async closure.
pub struct FnHandler<F, Fut>
where
    F: Fn(DeviceCommandRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ProtocolProcessResult>> + Send + 'static,
{
    protocol_type: String,
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(DeviceCommandRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ProtocolProcessResult>> + Send + 'static,
{
    /// Create a handler for `protocol_type`.
    pub fn new(protocol_type: impl Into<String>, handler: F) -> Self {
        Self {
            protocol_type: protocol_type.into(),
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> ProtocolHandler for FnHandler<F, Fut>
where
    F: Fn(DeviceCommandRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ProtocolProcessResult>> + Send + 'static,
{
    fn protocol_type(&self) -> &str {
        &self.protocol_type
    }

    fn handle<'a>(
        &'a self,
        request: &'a DeviceCommandRequest,
    ) -> BoxFuture<'a, Result<ProtocolProcessResult>> {
        Box::pin((self.handler)(request.clone()))
    }
}

/// Lock-free per-handler counters.
#[derive(Debug, Default)]
pub struct HandlerStats {
    handled: AtomicU64,
    succeeded: AtomicU64,
    rejected: AtomicU64,
    faulted: AtomicU64,
}

/// Point-in-time copy of [`HandlerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandlerStatsSnapshot {
    pub handled: u64,
    pub succeeded: u64,
    /// Business failures.
    pub rejected: u64,
    /// Infrastructure faults.
    pub faulted: u64,
}

impl HandlerStats {
    /// Count one outcome.
    pub fn record(&self, outcome: &Result<ProtocolProcessResult>) {
        self.handled.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Ok(result) if result.is_success() => &self.succeeded,
            Ok(_) => &self.rejected,
            Err(_) => &self.faulted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HandlerStatsSnapshot {
        HandlerStatsSnapshot {
            handled: self.handled.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            faulted: self.faulted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceCommError;

    #[tokio::test]
    async fn test_fn_handler_invokes_closure() {
        let handler = FnHandler::new("echo", |request| async move {
            Ok(ProtocolProcessResult::success(request.command_type()))
        });
        let request = DeviceCommandRequest::new(1, "PING", "echo", CommandPayload::Empty);

        let result = handler.handle(&request).await.unwrap();
        assert_eq!(handler.protocol_type(), "echo");
        assert_eq!(result.business_type(), "PING");
    }

    #[test]
    fn test_stats_record_each_outcome() {
        let stats = HandlerStats::default();
        stats.record(&Ok(ProtocolProcessResult::success("A")));
        stats.record(&Ok(ProtocolProcessResult::failure("A", "E", "m")));
        stats.record(&Err(DeviceCommError::WorkerLost("gone".to_string())));

        assert_eq!(
            stats.snapshot(),
            HandlerStatsSnapshot {
                handled: 3,
                succeeded: 1,
                rejected: 1,
                faulted: 1,
            }
        );
    }
}
