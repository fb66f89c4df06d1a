//! Error types for campus-devicecomm.

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;

/// Main error type for codec, registry and dispatch operations.
///
/// Business outcomes (permission denied, unknown device, ...) are never
/// errors; they travel as failed [`ProtocolProcessResult`](crate::ProtocolProcessResult)s.
#[derive(Debug, Error)]
pub enum DeviceCommError {
    /// Frame shorter than the family's fixed minimum.
    #[error("Frame too short: {actual} bytes, minimum is {minimum}")]
    FrameTooShort { minimum: usize, actual: usize },

    /// Header magic does not match the family.
    #[error("Bad header: expected {expected:02X?}, got {actual:02X?}")]
    BadHeader { expected: [u8; 2], actual: [u8; 2] },

    /// Trailing checksum disagrees with the computed one.
    #[error("Checksum mismatch: computed {computed:#06X}, frame carries {received:#06X}")]
    ChecksumMismatch { computed: u16, received: u16 },

    /// Message-type code not defined for the family.
    #[error("Unknown message type {code:#04X} for {protocol_type}")]
    UnknownMessageType { protocol_type: String, code: u8 },

    /// Frame length differs from the layout of its message type.
    #[error("Frame length mismatch: expected {expected} bytes, got {actual}")]
    FrameLengthMismatch { expected: usize, actual: usize },

    /// Device code does not fit the fixed-width field, or is not ASCII.
    #[error("Device code {device_code:?} does not fit a {width}-byte ASCII field")]
    DeviceCodeTooLong { device_code: String, width: usize },

    /// Field values do not match the message layout.
    #[error("Field mismatch: {0}")]
    FieldMismatch(String),

    /// Blank protocol type on lookup.
    #[error("Protocol type is required")]
    ProtocolTypeRequired,

    /// No handler registered for the protocol type.
    #[error("Protocol type {protocol_type} is not supported, supported types: {supported:?}")]
    ProtocolTypeNotSupported {
        protocol_type: String,
        supported: BTreeSet<String>,
    },

    /// Two handlers claim the same protocol type.
    #[error("Protocol type {0} is registered more than once")]
    DuplicateProtocolType(String),

    /// Handler fault during synchronous execution.
    #[error("Command execution failed for device {device_id} ({protocol_type}): {source}")]
    CommandExecutionFailed {
        device_id: u64,
        protocol_type: String,
        #[source]
        source: Box<DeviceCommError>,
    },

    /// Handler fault during asynchronous execution.
    #[error("Async command execution failed for device {device_id} ({protocol_type}): {source}")]
    AsyncCommandExecutionFailed {
        device_id: u64,
        protocol_type: String,
        #[source]
        source: Box<DeviceCommError>,
    },

    /// Bounded wait expired, or the work failed before the deadline.
    ///
    /// `source` is `None` for a pure timeout.
    #[error("Command for device {device_id} ({protocol_type}) timed out or failed within {timeout:?}")]
    CommandTimeoutOrFailed {
        device_id: u64,
        protocol_type: String,
        timeout: Duration,
        #[source]
        source: Option<Box<DeviceCommError>>,
    },

    /// Batch ceiling elapsed before all items finished.
    #[error("Batch of {pending} pending commands ({protocol_type}) exceeded {ceiling:?}")]
    BatchCommandTimeout {
        protocol_type: String,
        ceiling: Duration,
        pending: usize,
    },

    /// Downstream collaborator failure (message bus, wallet service, ...).
    #[error("Downstream {system} failure: {message}")]
    Downstream { system: String, message: String },

    /// Worker task ended without reporting a result (panic or abort).
    #[error("Worker lost: {0}")]
    WorkerLost(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeviceCommError {
    /// Stable machine-readable token for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::FrameTooShort { .. } => "FRAME_TOO_SHORT",
            Self::BadHeader { .. } => "BAD_HEADER",
            Self::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            Self::UnknownMessageType { .. } => "UNKNOWN_MESSAGE_TYPE",
            Self::FrameLengthMismatch { .. } => "FRAME_LENGTH_MISMATCH",
            Self::DeviceCodeTooLong { .. } => "DEVICE_CODE_TOO_LONG",
            Self::FieldMismatch(_) => "FIELD_MISMATCH",
            Self::ProtocolTypeRequired => "PROTOCOL_TYPE_REQUIRED",
            Self::ProtocolTypeNotSupported { .. } => "PROTOCOL_TYPE_NOT_SUPPORTED",
            Self::DuplicateProtocolType(_) => "DUPLICATE_PROTOCOL_TYPE",
            Self::CommandExecutionFailed { .. } => "COMMAND_EXECUTION_FAILED",
            Self::AsyncCommandExecutionFailed { .. } => "ASYNC_COMMAND_EXECUTION_FAILED",
            Self::CommandTimeoutOrFailed { .. } => "COMMAND_TIMEOUT_OR_FAILED",
            Self::BatchCommandTimeout { .. } => "BATCH_COMMAND_TIMEOUT",
            Self::Downstream { .. } => "DOWNSTREAM_FAILURE",
            Self::WorkerLost(_) => "WORKER_LOST",
            Self::Config(_) => "INVALID_CONFIG",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
        }
    }

    /// True for wire-level decode failures.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            Self::FrameTooShort { .. }
                | Self::BadHeader { .. }
                | Self::ChecksumMismatch { .. }
                | Self::UnknownMessageType { .. }
                | Self::FrameLengthMismatch { .. }
        )
    }

    /// Shorthand for a downstream failure.
    pub fn downstream(system: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Downstream {
            system: system.into(),
            message: message.into(),
        }
    }
}

/// Result type alias using DeviceCommError.
pub type Result<T> = std::result::Result<T, DeviceCommError>;
