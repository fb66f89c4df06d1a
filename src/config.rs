//! Dispatch and handler configuration.
//!
//! Both structs deserialize from JSON with every field optional; missing
//! fields take the defaults below. Durations are written in milliseconds.
//!
//! ```
//! use campus_devicecomm::config::{DispatchConfig, TimeoutPolicy};
//!
//! let config = DispatchConfig::from_json_str(r#"{ "worker_pool_size": 4 }"#).unwrap();
//! assert_eq!(config.worker_pool_size, 4);
//! assert_eq!(config.timeout_policy, TimeoutPolicy::Detach);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DeviceCommError, Result};

/// Default number of concurrent handler executions.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 10;

/// Default overall ceiling for a batch call.
pub const DEFAULT_BATCH_CEILING: Duration = Duration::from_secs(30);

/// Default wait for a single timeout-bounded command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Default tolerated distance between a frame timestamp and local time.
pub const DEFAULT_MAX_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Default single-transaction ceiling for consumption terminals, in cents.
pub const DEFAULT_MAX_TRANSACTION_AMOUNT: u32 = 100_000;

/// What happens to a handler invocation whose caller stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Let the invocation finish in the background. It keeps its worker
    /// permit, so abandoned work is bounded by the pool size.
    #[default]
    Detach,
    /// Cancel the invocation at its next suspension point.
    Abort,
}

/// Dispatch client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum concurrent handler executions for async/timeout/batch modes.
    pub worker_pool_size: usize,
    /// Overall ceiling for `execute_batch`.
    #[serde(with = "millis", rename = "batch_ceiling_ms")]
    pub batch_ceiling: Duration,
    /// Wait used by `execute_with_default_timeout`.
    #[serde(with = "millis", rename = "default_timeout_ms")]
    pub default_timeout: Duration,
    /// Fate of abandoned invocations.
    pub timeout_policy: TimeoutPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            batch_ceiling: DEFAULT_BATCH_CEILING,
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
            timeout_policy: TimeoutPolicy::Detach,
        }
    }
}

impl DispatchConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Reject values that would stall every call.
    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            return Err(DeviceCommError::Config(
                "worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.batch_ceiling.is_zero() {
            return Err(DeviceCommError::Config(
                "batch_ceiling_ms must be positive".to_string(),
            ));
        }
        if self.default_timeout.is_zero() {
            return Err(DeviceCommError::Config(
                "default_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Business-validation knobs shared by the built-in handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Frames whose timestamp is further than this from local time are rejected.
    #[serde(with = "millis", rename = "max_clock_skew_ms")]
    pub max_clock_skew: Duration,
    /// Largest single consumption debit, in cents.
    pub max_transaction_amount: u32,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            max_clock_skew: DEFAULT_MAX_CLOCK_SKEW,
            max_transaction_amount: DEFAULT_MAX_TRANSACTION_AMOUNT,
        }
    }
}

impl HandlerConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
