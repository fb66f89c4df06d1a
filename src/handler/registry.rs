//! Handler registry for dispatching requests by protocol type.
//!
//! The registry maps upper-cased protocol types to handlers. It is built once
//! through [`HandlerRegistryBuilder`] and is immutable afterwards, so it can be
//! shared behind an `Arc` without locking.
//!
//! # Example
//!
//! ```
//! use campus_devicecomm::handler::{FnHandler, HandlerRegistry, ProtocolProcessResult};
//!
//! let registry = HandlerRegistry::builder()
//!     .register(FnHandler::new("access_entropy_v4_8", |request| async move {
//!         Ok(ProtocolProcessResult::success(request.command_type()))
//!     }))
//!     .build()
//!     .unwrap();
//!
//! assert!(registry.is_supported("ACCESS_ENTROPY_V4_8"));
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::ProtocolHandler;
use crate::error::{DeviceCommError, Result};

/// Canonical registry key.
fn normalize(protocol_type: &str) -> String {
    protocol_type.trim().to_ascii_uppercase()
}

/// Fluent builder for [`HandlerRegistry`].
///
/// Registration problems (blank or duplicate protocol types) are collected
/// and reported by [`build`](Self::build).
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    entries: Vec<(String, Arc<dyn ProtocolHandler>)>,
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own [`ProtocolHandler::protocol_type`].
    pub fn register(self, handler: impl ProtocolHandler) -> Self {
        self.register_arc(Arc::new(handler))
    }

    /// Register a handler under an explicit protocol type.
    pub fn register_as(mut self, protocol_type: &str, handler: impl ProtocolHandler) -> Self {
        let handler: Arc<dyn ProtocolHandler> = Arc::new(handler);
        self.entries.push((normalize(protocol_type), handler));
        self
    }

    /// Register a shared handler, e.g. one the caller also keeps for stats.
    pub fn register_arc(mut self, handler: Arc<dyn ProtocolHandler>) -> Self {
        let key = normalize(handler.protocol_type());
        self.entries.push((key, handler));
        self
    }

    /// Finish registration.
    pub fn build(self) -> Result<HandlerRegistry> {
        let mut handlers = HashMap::with_capacity(self.entries.len());

        for (key, handler) in self.entries {
            if key.is_empty() {
                return Err(DeviceCommError::ProtocolTypeRequired);
            }
            if handlers.contains_key(&key) {
                return Err(DeviceCommError::DuplicateProtocolType(key));
            }
            tracing::debug!(protocol_type = %key, "Registered protocol handler");
            handlers.insert(key, handler);
        }

        Ok(HandlerRegistry { handlers })
    }
}

/// Immutable map from protocol type to handler.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ProtocolHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    /// Look up the handler for a protocol type (case-insensitive).
    pub fn resolve(&self, protocol_type: &str) -> Result<Arc<dyn ProtocolHandler>> {
        let key = normalize(protocol_type);
        if key.is_empty() {
            return Err(DeviceCommError::ProtocolTypeRequired);
        }

        self.handlers.get(&key).cloned().ok_or_else(|| {
            DeviceCommError::ProtocolTypeNotSupported {
                protocol_type: protocol_type.to_string(),
                supported: self.list_supported_protocols(),
            }
        })
    }

    /// Registered protocol types, upper-cased and sorted.
    pub fn list_supported_protocols(&self) -> BTreeSet<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn is_supported(&self, protocol_type: &str) -> bool {
        self.handlers.contains_key(&normalize(protocol_type))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("protocols", &self.list_supported_protocols())
            .finish()
    }
}
