//! Store adapter abstraction.
//!
//! Mirrors the command set of a key-value server with hashes, sets and
//! pub/sub. All calls are asynchronous suspension points.

use crate::error::StorageResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

/// Key of the set holding the members of `field` on entity `id`.
pub fn set_key(id: &str, field: &str) -> String {
    format!("{id}.{field}")
}

/// Abstract key-value/set/pub-sub store.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Reads one hash field.
    async fn hash_get(&self, key: &str, field: &str) -> StorageResult<Option<String>>;

    /// Reads every field of a hash.
    async fn hash_get_all(&self, key: &str) -> StorageResult<BTreeMap<String, String>>;

    /// Writes one hash field.
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StorageResult<()>;

    /// Writes one hash field unless it exists. Returns whether it was written.
    async fn hash_set_if_absent(&self, key: &str, field: &str, value: &str)
    -> StorageResult<bool>;

    /// Adds `delta` to a numeric hash field (missing counts as 0) and
    /// returns the new value.
    async fn hash_increment(&self, key: &str, field: &str, delta: f64) -> StorageResult<f64>;

    /// Deletes one hash field. Returns whether it existed.
    async fn hash_delete(&self, key: &str, field: &str) -> StorageResult<bool>;

    /// Lists the field names of a hash.
    async fn hash_keys(&self, key: &str) -> StorageResult<Vec<String>>;

    /// Returns whether any hash or set exists at `key`.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Removes whatever lives at `key`.
    async fn delete_key(&self, key: &str) -> StorageResult<()>;

    /// Lists set members in lexicographic order.
    async fn set_members(&self, key: &str) -> StorageResult<Vec<String>>;

    /// Adds members to a set. Returns how many were new.
    async fn set_add(&self, key: &str, members: &[String]) -> StorageResult<usize>;

    /// Removes members from a set. Returns how many were present.
    async fn set_remove(&self, key: &str, members: &[String]) -> StorageResult<usize>;

    /// Publishes a message. Returns the number of receivers reached.
    async fn publish(&self, channel: &str, payload: &str) -> StorageResult<usize>;

    /// Subscribes to a channel.
    async fn subscribe(&self, channel: &str) -> StorageResult<broadcast::Receiver<String>>;
}
