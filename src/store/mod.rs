//! Key-value store boundary.
//!
//! Everything the core persists (conversations, episodes, preferences, tool
//! cache entries, PDF text, session checkpoints) goes through [`KvStore`].
//! The contract is the small redis-shaped surface the rest of the crate
//! needs: TTL'd string values plus per-key lists with push/trim. The shipped
//! implementation is in-process; a networked store can implement the same
//! trait without touching any caller.

mod memory;

pub use memory::MemoryKv;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, KvError>;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Set `key` to `value` with a time-to-live.
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Get the value at `key`, or None if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Push a value to the head of the list at `key`.
    async fn lpush(&self, key: &str, value: String) -> Result<()>;

    /// Keep only list elements in `[start, stop]` (inclusive, zero-based).
    async fn ltrim(&self, key: &str, start: usize, stop: usize) -> Result<()>;

    /// Read list elements in `[start, stop]` (inclusive, zero-based).
    async fn lrange(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>>;

    /// Refresh the TTL on `key` (value or list).
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// All live keys starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Serialize a value as JSON and store it with a TTL.
pub async fn put_json<T: serde::Serialize>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<()> {
    let data = serde_json::to_string(value)?;
    store.set_ex(key, data, ttl).await
}

/// Load and deserialize a JSON value, returning None when absent or
/// undecodable (a stale snapshot is treated the same as a missing one).
pub async fn get_json<T: serde::de::DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(data) => Ok(serde_json::from_str(&data).ok()),
        None => Ok(None),
    }
}
