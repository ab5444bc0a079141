//! Storage capability consumed by every stateful component.
//!
//! All persistent state — guard counters, fund locks, reservations, circuit
//! state, ledger entries, intents — goes through the [`Storage`] trait, so
//! that a process-local backend ([`MemoryStorage`]) and a network backend
//! (`agentpay-redis`) are interchangeable.
//!
//! # Atomicity contract
//!
//! `update`, `atomic_add`, `acquire_lock`, and `release_lock` must be
//! race-free under concurrent callers. The in-memory backend serializes
//! through a single mutex; a network backend must use server-side scripting
//! (or an optimistic compare-and-swap loop) — never two round trips for a
//! compare-and-delete.

mod memory;

pub use memory::MemoryStorage;

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

/// Error produced by a storage backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// The backend could not be reached or returned a malformed reply.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// A stored value could not be (de)serialized.
    #[error("storage codec error: {0}")]
    Codec(String),
}

/// Atomic read-modify-write closure for [`Storage::update`].
///
/// Receives the current value (`None` when the key is absent) and returns
/// the value to store (`None` deletes the key). Optimistic backends may
/// invoke the closure more than once before the swap lands, so it must be a
/// pure function of its input.
pub type Mutator = Box<dyn Fn(Option<Value>) -> Option<Value> + Send + Sync>;

/// Uniform key/value + atomic-counter + compare-and-release lock surface.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stores `value` under `key`, replacing any existing value.
    async fn put(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// Returns the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Deletes `key`; returns `true` if it existed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Atomically applies `mutator` to the value under `key` and returns
    /// what was stored (or `None` when the mutator deleted the key).
    async fn update(&self, key: &str, mutator: Mutator) -> Result<Option<Value>, StorageError>;

    /// Atomically adds `delta` to the numeric counter at `key` and returns
    /// the post-value. Missing keys are created at `delta`; `window` is an
    /// expiry hint applied on creation (for time-bucketed counters).
    async fn atomic_add(
        &self,
        key: &str,
        delta: Decimal,
        window: Option<Duration>,
    ) -> Result<Decimal, StorageError>;

    /// Stores `token` under the lock `key` iff the key is absent or its
    /// previous holder's ttl has expired. Returns `true` on acquisition.
    async fn acquire_lock(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError>;

    /// Deletes the lock `key` iff the stored token equals `token`
    /// (atomic compare-and-delete). Returns `true` on release.
    async fn release_lock(&self, key: &str, token: &str) -> Result<bool, StorageError>;

    /// Returns all `(key, value)` pairs whose key starts with `prefix`.
    /// Intended for ledger queries only.
    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>, StorageError>;
}

/// Parses a counter value stored by [`Storage::atomic_add`].
///
/// Counters are stored as decimal strings (or bare JSON numbers from older
/// writers); anything else reads as zero.
#[must_use]
pub fn counter_value(value: Option<&Value>) -> Decimal {
    match value {
        Some(Value::String(s)) => s.parse().unwrap_or(Decimal::ZERO),
        Some(Value::Number(n)) => n.to_string().parse().unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}
