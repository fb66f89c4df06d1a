//! Command requests and their outcomes.
//!
//! A [`DeviceCommandRequest`] is built by the caller and consumed once by the
//! dispatch client. It has no setters; once submitted it cannot change.
//!
//! A [`ProtocolProcessResult`] carries an error code exactly when it is a
//! failure. The two constructors are the only way to build one.
//!
//! # Example
//!
//! ```
//! use campus_devicecomm::handler::{CommandPayload, DeviceCommandRequest, ProtocolProcessResult};
//!
//! let request = DeviceCommandRequest::new(
//!     42,
//!     "OPEN_DOOR",
//!     "ACCESS_ENTROPY_V4_8",
//!     CommandPayload::Params(serde_json::json!({ "door": 1 })),
//! );
//! assert_eq!(request.device_id(), 42);
//!
//! let denied = ProtocolProcessResult::failure("OPEN_DOOR", "PERMISSION_DENIED", "door locked down");
//! assert!(!denied.is_success());
//! assert_eq!(denied.error_code(), Some("PERMISSION_DENIED"));
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Protocol-specific command parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandPayload {
    /// No parameters.
    Empty,
    /// A raw frame received from (or destined for) a terminal.
    Frame(Bytes),
    /// Structured parameters.
    Params(serde_json::Value),
}

impl CommandPayload {
    /// The frame bytes, if this payload carries a frame.
    pub fn frame(&self) -> Option<&Bytes> {
        match self {
            CommandPayload::Frame(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The structured parameters, if any.
    pub fn params(&self) -> Option<&serde_json::Value> {
        match self {
            CommandPayload::Params(value) => Some(value),
            _ => None,
        }
    }
}

/// A unit of work submitted to the dispatch client.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCommandRequest {
    device_id: u64,
    command_type: String,
    protocol_type: String,
    payload: CommandPayload,
    submitted_at: DateTime<Utc>,
}

impl DeviceCommandRequest {
    /// Create a request stamped with the current time.
    pub fn new(
        device_id: u64,
        command_type: impl Into<String>,
        protocol_type: impl Into<String>,
        payload: CommandPayload,
    ) -> Self {
        Self {
            device_id,
            command_type: command_type.into(),
            protocol_type: protocol_type.into(),
            payload,
            submitted_at: Utc::now(),
        }
    }

    /// Replace the submission timestamp (replayed or scheduled commands).
    pub fn with_submitted_at(mut self, submitted_at: DateTime<Utc>) -> Self {
        self.submitted_at = submitted_at;
        self
    }

    /// Logical device identifier assigned at registration.
    #[inline]
    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    /// Requested action.
    #[inline]
    pub fn command_type(&self) -> &str {
        &self.command_type
    }

    /// Protocol type naming the handler.
    #[inline]
    pub fn protocol_type(&self) -> &str {
        &self.protocol_type
    }

    /// Command parameters.
    #[inline]
    pub fn payload(&self) -> &CommandPayload {
        &self.payload
    }

    /// Submission timestamp.
    #[inline]
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// Deterministic id: `{device_id}_{command_type}_{protocol_type}_{submitted_at millis}`.
    pub fn request_id(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.device_id,
            self.command_type,
            self.protocol_type,
            self.submitted_at.timestamp_millis()
        )
    }
}

/// Outcome of handling one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolProcessResult {
    success: bool,
    business_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

impl ProtocolProcessResult {
    /// A successful outcome.
    pub fn success(business_type: impl Into<String>) -> Self {
        Self {
            success: true,
            business_type: business_type.into(),
            error_code: None,
            message: None,
            data: None,
        }
    }

    /// A business failure with a stable error code.
    pub fn failure(
        business_type: impl Into<String>,
        error_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            business_type: business_type.into(),
            error_code: Some(error_code.into()),
            message: Some(message.into()),
            data: None,
        }
    }

    /// Attach handler-specific data. Ignored on failures.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        if self.success {
            self.data = Some(data);
        }
        self
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.success
    }

    #[inline]
    pub fn business_type(&self) -> &str {
        &self.business_type
    }

    #[inline]
    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    #[inline]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[inline]
    pub fn data(&self) -> Option<&serde_json::Value> {
        self.data.as_ref()
    }
}
