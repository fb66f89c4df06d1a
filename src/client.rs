//! Dispatch client: resolves handlers and runs commands.
//!
//! The [`DispatchClientBuilder`] provides a fluent API for registering
//! handlers and tuning the pool. The [`DispatchClient`] offers four
//! execution modes:
//! 1. `execute_sync` - inline on the caller's task
//! 2. `execute_async` - on the worker pool, returns a [`CommandHandle`]
//! 3. `execute_with_timeout` - worker pool with a bounded wait
//! 4. `execute_batch` - many requests for one protocol, concurrently
//!
//! # Example
//!
//! ```
//! use campus_devicecomm::handler::{CommandPayload, DeviceCommandRequest, FnHandler, ProtocolProcessResult};
//! use campus_devicecomm::DispatchClient;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> campus_devicecomm::Result<()> {
//! let client = DispatchClient::builder()
//!     .handler(FnHandler::new("ECHO", |request| async move {
//!         Ok(ProtocolProcessResult::success(request.command_type()))
//!     }))
//!     .worker_pool_size(4)
//!     .build()?;
//!
//! let request = DeviceCommandRequest::new(1, "PING", "ECHO", CommandPayload::Empty);
//! let result = client.execute_sync("echo", &request).await?;
//! assert!(result.is_success());
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::config::{DispatchConfig, TimeoutPolicy};
use crate::error::{DeviceCommError, Result};
use crate::handler::{
    codes, DeviceCommandRequest, HandlerRegistry, HandlerRegistryBuilder, ProtocolHandler,
    ProtocolProcessResult,
};
use crate::pool::{CommandHandle, WorkerPool};

/// Builder for configuring and creating a [`DispatchClient`].
#[derive(Default)]
pub struct DispatchClientBuilder {
    registry: HandlerRegistryBuilder,
    config: DispatchConfig,
}

impl DispatchClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own protocol type.
    pub fn handler(mut self, handler: impl ProtocolHandler) -> Self {
        self.registry = self.registry.register(handler);
        self
    }

    /// Register a handler under an explicit protocol type.
    pub fn handler_as(mut self, protocol_type: &str, handler: impl ProtocolHandler) -> Self {
        self.registry = self.registry.register_as(protocol_type, handler);
        self
    }

    /// Register a handler the caller keeps a reference to.
    pub fn handler_arc(mut self, handler: Arc<dyn ProtocolHandler>) -> Self {
        self.registry = self.registry.register_arc(handler);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Maximum concurrent handler executions.
    ///
    /// Default: 10
    pub fn worker_pool_size(mut self, size: usize) -> Self {
        self.config.worker_pool_size = size;
        self
    }

    /// Overall ceiling for `execute_batch`.
    ///
    /// Default: 30 seconds
    pub fn batch_ceiling(mut self, ceiling: Duration) -> Self {
        self.config.batch_ceiling = ceiling;
        self
    }

    /// Wait used by `execute_with_default_timeout`.
    ///
    /// Default: 10 seconds
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    /// What happens to work whose caller stopped waiting.
    ///
    /// Default: [`TimeoutPolicy::Detach`]
    pub fn timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.config.timeout_policy = policy;
        self
    }

    /// Validate the configuration and freeze the registry.
    pub fn build(self) -> Result<DispatchClient> {
        DispatchClient::new(Arc::new(self.registry.build()?), self.config)
    }
}

/// Front door for executing device commands.
///
/// All methods take `&self`; share one client behind an `Arc`.
#[derive(Debug)]
pub struct DispatchClient {
    registry: Arc<HandlerRegistry>,
    pool: WorkerPool,
    config: DispatchConfig,
}

impl DispatchClient {
    pub fn builder() -> DispatchClientBuilder {
        DispatchClientBuilder::new()
    }

    /// Create a client over an existing registry.
    pub fn new(registry: Arc<HandlerRegistry>, config: DispatchConfig) -> Result<Self> {
        config.validate()?;
        debug!(
            protocols = ?registry.list_supported_protocols(),
            pool = config.worker_pool_size,
            "Dispatch client ready"
        );
        Ok(Self {
            registry,
            pool: WorkerPool::new(config.worker_pool_size),
            config,
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Run a command on the caller's task.
    ///
    /// Handler faults are wrapped in [`DeviceCommError::CommandExecutionFailed`].
    pub async fn execute_sync(
        &self,
        protocol_type: &str,
        request: &DeviceCommandRequest,
    ) -> Result<ProtocolProcessResult> {
        let handler = self.registry.resolve(protocol_type)?;

        handler.handle(request).await.map_err(|source| {
            error!(
                device_id = request.device_id(),
                protocol_type,
                error = %source,
                "Command execution failed"
            );
            DeviceCommError::CommandExecutionFailed {
                device_id: request.device_id(),
                protocol_type: protocol_type.to_string(),
                source: Box::new(source),
            }
        })
    }

    /// Submit a command to the worker pool.
    ///
    /// Resolution errors are returned immediately. Handler faults surface
    /// from the handle as [`DeviceCommError::AsyncCommandExecutionFailed`].
    pub fn execute_async(
        &self,
        protocol_type: &str,
        request: DeviceCommandRequest,
    ) -> Result<CommandHandle> {
        let handler = self.registry.resolve(protocol_type)?;
        self.submit(handler, protocol_type, request)
    }

    /// Run a command on the pool and wait at most `timeout`.
    ///
    /// Both a missed deadline and a handler fault become
    /// [`DeviceCommError::CommandTimeoutOrFailed`]; `source` is `None` for
    /// the former. What happens to the abandoned work depends on the
    /// configured [`TimeoutPolicy`].
    pub async fn execute_with_timeout(
        &self,
        protocol_type: &str,
        request: DeviceCommandRequest,
        timeout: Duration,
    ) -> Result<ProtocolProcessResult> {
        let device_id = request.device_id();
        let mut handle = self.execute_async(protocol_type, request)?;

        match handle.wait_timeout(timeout).await {
            Some(Ok(result)) => Ok(result),
            Some(Err(err)) => {
                let source = match err {
                    DeviceCommError::AsyncCommandExecutionFailed { source, .. } => source,
                    other => Box::new(other),
                };
                Err(DeviceCommError::CommandTimeoutOrFailed {
                    device_id,
                    protocol_type: protocol_type.to_string(),
                    timeout,
                    source: Some(source),
                })
            }
            None => {
                warn!(device_id, protocol_type, ?timeout, "Command timed out");
                self.abandon(&handle);
                Err(DeviceCommError::CommandTimeoutOrFailed {
                    device_id,
                    protocol_type: protocol_type.to_string(),
                    timeout,
                    source: None,
                })
            }
        }
    }

    /// [`execute_with_timeout`](Self::execute_with_timeout) with the configured default.
    pub async fn execute_with_default_timeout(
        &self,
        protocol_type: &str,
        request: DeviceCommandRequest,
    ) -> Result<ProtocolProcessResult> {
        self.execute_with_timeout(protocol_type, request, self.config.default_timeout)
            .await
    }

    /// Run many requests of one protocol concurrently.
    ///
    /// Results are keyed by [`DeviceCommandRequest::request_id`]; ids that
    /// collide within the batch get a `#n` suffix. A failing item becomes a
    /// `BATCH_COMMAND_FAILED` result without affecting the others. If the
    /// batch ceiling elapses first the whole call fails with
    /// [`DeviceCommError::BatchCommandTimeout`].
    pub async fn execute_batch(
        &self,
        protocol_type: &str,
        requests: Vec<DeviceCommandRequest>,
    ) -> Result<HashMap<String, ProtocolProcessResult>> {
        let handler = self.registry.resolve(protocol_type)?;
        let deadline = Instant::now() + self.config.batch_ceiling;

        let mut seen = HashSet::with_capacity(requests.len());
        let mut pending = Vec::with_capacity(requests.len());
        for request in requests {
            let id = unique_id(&mut seen, request.request_id());
            let command_type = request.command_type().to_string();
            let handle = self.submit(handler.clone(), protocol_type, request)?;
            pending.push((id, command_type, handle));
        }

        debug!(protocol_type, count = pending.len(), "Batch submitted");

        let mut results = HashMap::with_capacity(pending.len());
        for index in 0..pending.len() {
            let outcome = tokio::time::timeout_at(deadline, &mut pending[index].2).await;
            match outcome {
                Ok(Ok(result)) => {
                    results.insert(pending[index].0.clone(), result);
                }
                Ok(Err(err)) => {
                    let (id, command_type, _) = &pending[index];
                    warn!(request_id = %id, error = %err, "Batch item failed");
                    results.insert(
                        id.clone(),
                        ProtocolProcessResult::failure(
                            command_type.as_str(),
                            codes::BATCH_COMMAND_FAILED,
                            err.to_string(),
                        ),
                    );
                }
                Err(_) => {
                    let unfinished = pending[index..]
                        .iter()
                        .filter(|(_, _, handle)| self.abandon(handle))
                        .count();
                    warn!(
                        protocol_type,
                        pending = unfinished,
                        ceiling = ?self.config.batch_ceiling,
                        "Batch ceiling exceeded"
                    );
                    return Err(DeviceCommError::BatchCommandTimeout {
                        protocol_type: protocol_type.to_string(),
                        ceiling: self.config.batch_ceiling,
                        pending: unfinished,
                    });
                }
            }
        }

        Ok(results)
    }

    /// True if a handler is registered for the protocol type.
    pub fn is_protocol_supported(&self, protocol_type: &str) -> bool {
        self.registry.is_supported(protocol_type)
    }

    /// Registered protocol types, upper-cased.
    pub fn list_supported_protocols(&self) -> BTreeSet<String> {
        self.registry.list_supported_protocols()
    }

    /// Commands submitted to the pool and not yet finished.
    pub fn pool_in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    fn submit(
        &self,
        handler: Arc<dyn ProtocolHandler>,
        protocol_type: &str,
        request: DeviceCommandRequest,
    ) -> Result<CommandHandle> {
        let protocol_type = protocol_type.to_string();

        self.pool.submit(async move {
            handler.handle(&request).await.map_err(|source| {
                error!(
                    device_id = request.device_id(),
                    protocol_type = %protocol_type,
                    error = %source,
                    "Async command execution failed"
                );
                DeviceCommError::AsyncCommandExecutionFailed {
                    device_id: request.device_id(),
                    protocol_type,
                    source: Box::new(source),
                }
            })
        })
    }

    /// Mark a handle timed out and apply the timeout policy. Returns false
    /// if it had already settled.
    fn abandon(&self, handle: &CommandHandle) -> bool {
        if !handle.mark_timed_out() {
            return false;
        }
        if self.config.timeout_policy == TimeoutPolicy::Abort {
            handle.abort();
        }
        true
    }
}

/// Reserve `id`, suffixing `#n` until it is unique within `seen`.
fn unique_id(seen: &mut HashSet<String>, id: String) -> String {
    if seen.insert(id.clone()) {
        return id;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{id}#{n}");
        if seen.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{CommandPayload, FnHandler};
    use crate::pool::CommandState;
    use chrono::{TimeZone, Utc};

    fn sleeper(protocol_type: &str) -> impl ProtocolHandler {
        FnHandler::new(protocol_type, |request: DeviceCommandRequest| async move {
            let ms = request
                .payload()
                .params()
                .and_then(|p| p["sleep_ms"].as_u64())
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            if request.command_type() == "FAIL" {
                return Err(DeviceCommError::downstream("bus", "offline"));
            }
            Ok(ProtocolProcessResult::success(request.command_type()))
        })
    }

    fn request(device_id: u64, command: &str, sleep_ms: u64) -> DeviceCommandRequest {
        DeviceCommandRequest::new(
            device_id,
            command,
            "TEST",
            CommandPayload::Params(serde_json::json!({ "sleep_ms": sleep_ms })),
        )
    }

    fn client() -> DispatchClient {
        DispatchClient::builder()
            .handler(sleeper("test"))
            .worker_pool_size(4)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_execute_sync_wraps_handler_fault() {
        let client = client();

        let ok = client.execute_sync("TEST", &request(1, "PING", 0)).await.unwrap();
        assert_eq!(ok.business_type(), "PING");

        let err = client
            .execute_sync("test", &request(7, "FAIL", 0))
            .await
            .unwrap_err();
        match err {
            DeviceCommError::CommandExecutionFailed {
                device_id, source, ..
            } => {
                assert_eq!(device_id, 7);
                assert_eq!(source.code(), "DOWNSTREAM_FAILURE");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsupported_protocol_fails_fast() {
        let client = client();

        let err = client.execute_async("PARKING", request(1, "PING", 0)).unwrap_err();
        assert_eq!(err.code(), "PROTOCOL_TYPE_NOT_SUPPORTED");
        assert!(matches!(
            client.execute_sync("", &request(1, "PING", 0)).await,
            Err(DeviceCommError::ProtocolTypeRequired)
        ));
        assert_eq!(client.pool_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_execute_async_handle() {
        let client = client();

        let handle = client.execute_async("TEST", request(1, "PING", 10)).unwrap();
        assert!(!handle.state().is_terminal());
        assert_eq!(handle.await.unwrap().business_type(), "PING");

        let failed = client.execute_async("TEST", request(1, "FAIL", 0)).unwrap();
        assert!(matches!(
            failed.await,
            Err(DeviceCommError::AsyncCommandExecutionFailed { device_id: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_timeout_boundary() {
        let client = client();

        let started = tokio::time::Instant::now();
        let err = client
            .execute_with_timeout("TEST", request(3, "SLOW", 200), Duration::from_millis(20))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(20), "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(100), "overshot the timeout: {elapsed:?}");
        assert!(matches!(
            err,
            DeviceCommError::CommandTimeoutOrFailed { source: None, device_id: 3, .. }
        ));

        let ok = client
            .execute_with_timeout("TEST", request(3, "FAST", 0), Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(ok.business_type(), "FAST");
    }

    #[tokio::test]
    async fn test_timeout_carries_handler_fault() {
        let client = client();

        let err = client
            .execute_with_timeout("TEST", request(3, "FAIL", 0), Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            DeviceCommError::CommandTimeoutOrFailed {
                source: Some(source),
                ..
            } => assert_eq!(source.code(), "DOWNSTREAM_FAILURE"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_detached_work_keeps_its_permit() {
        let client = client();

        let _ = client
            .execute_with_timeout("TEST", request(1, "SLOW", 100), Duration::from_millis(5))
            .await;
        assert_eq!(client.pool_in_flight(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.pool_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_abort_policy_cancels_work() {
        let client = DispatchClient::builder()
            .handler(sleeper("TEST"))
            .timeout_policy(TimeoutPolicy::Abort)
            .build()
            .unwrap();

        let _ = client
            .execute_with_timeout("TEST", request(1, "SLOW", 10_000), Duration::from_millis(5))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.pool_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_batch_items_are_independent() {
        let client = client();
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let requests: Vec<_> = (1..=5)
            .map(|device| {
                let command = if device == 3 { "FAIL" } else { "PUNCH" };
                request(device, command, 5).with_submitted_at(at)
            })
            .collect();

        let results = client.execute_batch("TEST", requests).await.unwrap();
        assert_eq!(results.len(), 5);

        let failed: Vec<_> = results
            .iter()
            .filter(|(_, r)| r.error_code() == Some(codes::BATCH_COMMAND_FAILED))
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "3_FAIL_TEST_1700000000000");
        assert!(results["1_PUNCH_TEST_1700000000000"].is_success());
    }

    #[tokio::test]
    async fn test_batch_colliding_ids_are_suffixed() {
        let client = client();
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let requests = vec![
            request(1, "PUNCH", 0).with_submitted_at(at),
            request(1, "PUNCH", 0).with_submitted_at(at),
            request(1, "PUNCH", 0).with_submitted_at(at),
        ];

        let results = client.execute_batch("TEST", requests).await.unwrap();
        assert!(results.contains_key("1_PUNCH_TEST_1700000000000"));
        assert!(results.contains_key("1_PUNCH_TEST_1700000000000#1"));
        assert!(results.contains_key("1_PUNCH_TEST_1700000000000#2"));
    }

    #[tokio::test]
    async fn test_batch_ceiling() {
        let client = DispatchClient::builder()
            .handler(sleeper("TEST"))
            .batch_ceiling(Duration::from_millis(30))
            .build()
            .unwrap();

        let requests = vec![request(1, "FAST", 0), request(2, "SLOW", 500), request(3, "SLOW", 500)];
        let err = client.execute_batch("TEST", requests).await.unwrap_err();

        assert!(matches!(
            err,
            DeviceCommError::BatchCommandTimeout { pending: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let client = client();
        assert!(client.execute_batch("TEST", Vec::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_handle_state() {
        let client = client();
        let mut handle = client.execute_async("TEST", request(1, "SLOW", 100)).unwrap();

        assert!(handle.wait_timeout(Duration::from_millis(5)).await.is_none());
        assert!(client.abandon(&handle));
        assert_eq!(handle.state(), CommandState::TimedOut);
    }

    #[test]
    fn test_unique_id() {
        let mut seen = HashSet::new();
        assert_eq!(unique_id(&mut seen, "a".into()), "a");
        assert_eq!(unique_id(&mut seen, "a".into()), "a#1");
        assert_eq!(unique_id(&mut seen, "a".into()), "a#2");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = DispatchClient::builder()
            .worker_pool_size(0)
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_supported_protocols() {
        let client = client();
        assert!(client.is_protocol_supported("test"));
        assert_eq!(
            client.list_supported_protocols().into_iter().collect::<Vec<_>>(),
            vec!["TEST".to_string()]
        );
    }
}
