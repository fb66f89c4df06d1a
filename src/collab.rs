//! External collaborators used by the built-in handlers.
//!
//! Persistence, authorization and messaging live outside this crate. Handlers
//! receive them as `Arc<dyn ..>` at construction and treat them as opaque.
//! An `Err` from a collaborator is an infrastructure fault; the handler
//! propagates it rather than turning it into a business failure.
//!
//! The `Memory*` implementations back tests, demos and single-node
//! deployments.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::{DeviceCommError, Result};
use crate::handler::BoxFuture;

/// Maps wire device codes to logical device ids.
pub trait DeviceDirectory: Send + Sync + 'static {
    /// Logical id registered for a device code, `None` if unknown.
    fn lookup<'a>(&'a self, device_code: &'a str) -> BoxFuture<'a, Result<Option<u64>>>;
}

/// Decides whether a user may pass a door.
pub trait AccessPolicy: Send + Sync + 'static {
    /// Check a user against a door of a device.
    fn is_permitted(&self, user_id: u32, device_id: u64, door: u8) -> BoxFuture<'_, Result<bool>>;
}

/// Outcome of a wallet debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// Debit applied; remaining balance in cents.
    Approved { balance: u32 },
    /// Balance too low; nothing changed.
    Insufficient { balance: u32 },
}

/// Canteen account balances.
pub trait Wallet: Send + Sync + 'static {
    /// Debit `amount` cents from a user's account.
    fn debit(&self, user_id: u32, amount: u32) -> BoxFuture<'_, Result<DebitOutcome>>;

    /// Current balance in cents; 0 for an account that does not exist.
    fn query_balance(&self, user_id: u32) -> BoxFuture<'_, Result<u32>>;
}

/// A business record emitted by a handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceEvent {
    /// Record kind, e.g. `ACCESS_RECORD`.
    pub kind: String,
    pub device_id: u64,
    pub protocol_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

/// Downstream message bus.
pub trait EventSink: Send + Sync + 'static {
    /// Publish one record.
    fn publish(&self, event: DeviceEvent) -> BoxFuture<'_, Result<()>>;
}

/// Fixed device-code directory.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    devices: HashMap<String, u64>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device code.
    pub fn with_device(mut self, device_code: impl Into<String>, device_id: u64) -> Self {
        self.devices.insert(device_code.into(), device_id);
        self
    }
}

impl DeviceDirectory for MemoryDirectory {
    fn lookup<'a>(&'a self, device_code: &'a str) -> BoxFuture<'a, Result<Option<u64>>> {
        let found = self.devices.get(device_code).copied();
        Box::pin(async move { Ok(found) })
    }
}

/// Fixed set of `(user, door)` grants. Door 0 grants every door.
#[derive(Debug, Default)]
pub struct MemoryAccessPolicy {
    grants: HashSet<(u32, u8)>,
    allow_all: bool,
}

impl MemoryAccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that admits everyone.
    pub fn allow_all() -> Self {
        Self {
            grants: HashSet::new(),
            allow_all: true,
        }
    }

    /// Grant a user one door (or every door with 0).
    pub fn grant(mut self, user_id: u32, door: u8) -> Self {
        self.grants.insert((user_id, door));
        self
    }
}

impl AccessPolicy for MemoryAccessPolicy {
    fn is_permitted(&self, user_id: u32, _device_id: u64, door: u8) -> BoxFuture<'_, Result<bool>> {
        let permitted = self.allow_all
            || self.grants.contains(&(user_id, door))
            || self.grants.contains(&(user_id, 0));
        Box::pin(async move { Ok(permitted) })
    }
}

/// In-process balances.
#[derive(Debug, Default)]
pub struct MemoryWallet {
    balances: Mutex<HashMap<u32, u32>>,
}

impl MemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account balance in cents.
    pub fn with_balance(mut self, user_id: u32, balance: u32) -> Self {
        self.balances.get_mut().insert(user_id, balance);
        self
    }

    /// Current balance, 0 for unknown accounts.
    pub async fn balance(&self, user_id: u32) -> u32 {
        self.balances.lock().await.get(&user_id).copied().unwrap_or(0)
    }
}

impl Wallet for MemoryWallet {
    fn debit(&self, user_id: u32, amount: u32) -> BoxFuture<'_, Result<DebitOutcome>> {
        Box::pin(async move {
            let mut balances = self.balances.lock().await;
            let balance = balances.entry(user_id).or_insert(0);
            if *balance < amount {
                return Ok(DebitOutcome::Insufficient { balance: *balance });
            }
            *balance -= amount;
            Ok(DebitOutcome::Approved { balance: *balance })
        })
    }

    fn query_balance(&self, user_id: u32) -> BoxFuture<'_, Result<u32>> {
        Box::pin(async move { Ok(self.balance(user_id).await) })
    }
}

/// Sink that records every event; can be switched offline to simulate a bus outage.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DeviceEvent>>,
    offline: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail (or succeed again).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Snapshot of recorded events.
    pub async fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().await.clone()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: DeviceEvent) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.offline.load(Ordering::Acquire) {
                return Err(DeviceCommError::downstream(
                    "event-sink",
                    format!("cannot publish {} for device {}", event.kind, event.device_id),
                ));
            }
            self.events.lock().await.push(event);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: &str) -> DeviceEvent {
        DeviceEvent {
            kind: kind.to_string(),
            device_id: 1,
            protocol_type: "ACCESS_ENTROPY_V4_8".to_string(),
            payload: serde_json::json!({}),
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_directory_lookup() {
        let directory = MemoryDirectory::new().with_device("DEV001", 42);
        assert_eq!(directory.lookup("DEV001").await.unwrap(), Some(42));
        assert_eq!(directory.lookup("DEV999").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_policy_grants() {
        let policy = MemoryAccessPolicy::new().grant(1001, 1).grant(7, 0);
        assert!(policy.is_permitted(1001, 1, 1).await.unwrap());
        assert!(!policy.is_permitted(1001, 1, 2).await.unwrap());
        assert!(policy.is_permitted(7, 1, 9).await.unwrap());
        assert!(MemoryAccessPolicy::allow_all().is_permitted(5, 5, 5).await.unwrap());
    }

    #[tokio::test]
    async fn test_wallet_debit() {
        let wallet = MemoryWallet::new().with_balance(1, 1000);
        assert_eq!(
            wallet.debit(1, 300).await.unwrap(),
            DebitOutcome::Approved { balance: 700 }
        );
        assert_eq!(
            wallet.debit(1, 800).await.unwrap(),
            DebitOutcome::Insufficient { balance: 700 }
        );
        assert_eq!(wallet.balance(1).await, 700);
        assert_eq!(wallet.query_balance(1).await.unwrap(), 700);
        assert_eq!(
            wallet.debit(2, 1).await.unwrap(),
            DebitOutcome::Insufficient { balance: 0 }
        );
    }

    #[tokio::test]
    async fn test_sink_records_and_fails_offline() {
        let sink = RecordingSink::new();
        sink.publish(event("ACCESS_RECORD")).await.unwrap();

        sink.set_offline(true);
        let err = sink.publish(event("ACCESS_RECORD")).await.unwrap_err();
        assert_eq!(err.code(), "DOWNSTREAM_FAILURE");

        assert_eq!(sink.events().await.len(), 1);
    }
}
