//! Shared fixtures for subscription tests.

#![allow(dead_code)]

use arbor_engine::{Arbor, EngineConfig};
use arbor_model::Schema;
use arbor_storage::{
    MemoryStore, SearchArgs, SearchIndex, SearchQuery, StorageResult, StoreAdapter,
};
use arbor_subscriptions::SubscriptionManager;
use arbor_types::{ChangeEvent, ManualClock, EVENTS_CHANNEL};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Notify};

pub const NOW: i64 = 1_700_000_000_000;

pub fn league_schema() -> Schema {
    serde_json::from_value(json!({
        "languages": ["en"],
        "types": {
            "league": {
                "prefix": "le",
                "fields": {
                    "name": { "type": "string", "search": { "type": ["TAG"] } },
                    "rank": { "type": "int" }
                }
            },
            "match": {
                "prefix": "ma",
                "fields": {
                    "title": { "type": "text", "search": { "type": ["TEXT"] } },
                    "score": { "type": "int" },
                    "startTime": { "type": "timestamp", "search": { "type": ["NUMERIC", "SORTABLE"] } }
                }
            }
        }
    }))
    .expect("league schema")
}

/// Routes engine logs to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A client over a fresh store whose clock is frozen at [`NOW`].
pub async fn setup() -> (Arbor, Arc<MemoryStore>, Arc<ManualClock>) {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(NOW));
    let arbor = Arbor::with_config(store.clone(), EngineConfig::default().with_clock(clock.clone()));
    arbor.update_schema(league_schema()).await.expect("schema");
    arbor
        .set(json!({ "$id": "le1", "name": "Eredivisie" }))
        .await
        .expect("seed le1");
    arbor
        .set(json!({ "$id": "ma1", "parents": ["le1"], "startTime": NOW - 1_000 }))
        .await
        .expect("seed ma1");
    (arbor, store, clock)
}

/// Feeds change events published since the last call to a manager that
/// runs without background tasks, then flushes it.
pub struct Pump {
    store: Arc<MemoryStore>,
    seen: usize,
}

impl Pump {
    /// Starts after everything already published.
    pub async fn new(store: Arc<MemoryStore>) -> Self {
        let seen = store.published(EVENTS_CHANNEL).await.len();
        Self { store, seen }
    }

    /// Returns (staged, published).
    pub async fn run(&mut self, manager: &SubscriptionManager) -> (usize, usize) {
        let events = self.store.published(EVENTS_CHANNEL).await;
        let mut staged = 0;
        for raw in &events[self.seen..] {
            let event = ChangeEvent::decode(raw).expect("event");
            staged += manager.handle_event(&event).await.expect("handle event");
        }
        self.seen = events.len();
        (staged, manager.flush().await)
    }
}

/// A [`MemoryStore`] that can hold back one read: the armed hash field is
/// read, then the caller waits for [`release`](Self::release) before it
/// gets the value it read.
#[derive(Default)]
pub struct StallingStore {
    pub inner: MemoryStore,
    armed: Mutex<Option<(String, String)>>,
    /// Notified once the held-back read has happened.
    pub entered: Notify,
    released: Notify,
}

impl StallingStore {
    pub async fn arm(&self, key: &str, field: &str) {
        *self.armed.lock().await = Some((key.to_string(), field.to_string()));
    }

    pub fn release(&self) {
        self.released.notify_one();
    }
}

#[async_trait]
impl StoreAdapter for StallingStore {
    async fn hash_get(&self, key: &str, field: &str) -> StorageResult<Option<String>> {
        let stall = {
            let mut armed = self.armed.lock().await;
            let hit = armed.as_ref().is_some_and(|(k, f)| k == key && f == field);
            if hit {
                armed.take();
            }
            hit
        };
        let value = self.inner.hash_get(key, field).await?;
        if stall {
            self.entered.notify_one();
            self.released.notified().await;
        }
        Ok(value)
    }

    async fn hash_get_all(&self, key: &str) -> StorageResult<BTreeMap<String, String>> {
        self.inner.hash_get_all(key).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StorageResult<()> {
        self.inner.hash_set(key, field, value).await
    }

    async fn hash_set_if_absent(&self, key: &str, field: &str, value: &str) -> StorageResult<bool> {
        self.inner.hash_set_if_absent(key, field, value).await
    }

    async fn hash_increment(&self, key: &str, field: &str, delta: f64) -> StorageResult<f64> {
        self.inner.hash_increment(key, field, delta).await
    }

    async fn hash_delete(&self, key: &str, field: &str) -> StorageResult<bool> {
        self.inner.hash_delete(key, field).await
    }

    async fn hash_keys(&self, key: &str) -> StorageResult<Vec<String>> {
        self.inner.hash_keys(key).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn delete_key(&self, key: &str) -> StorageResult<()> {
        self.inner.delete_key(key).await
    }

    async fn set_members(&self, key: &str) -> StorageResult<Vec<String>> {
        self.inner.set_members(key).await
    }

    async fn set_add(&self, key: &str, members: &[String]) -> StorageResult<usize> {
        self.inner.set_add(key, members).await
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> StorageResult<usize> {
        self.inner.set_remove(key, members).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> StorageResult<usize> {
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> StorageResult<broadcast::Receiver<String>> {
        self.inner.subscribe(channel).await
    }
}

#[async_trait]
impl SearchIndex for StallingStore {
    async fn search(
        &self,
        index: &str,
        query: &SearchQuery,
        args: &SearchArgs,
    ) -> StorageResult<Vec<String>> {
        self.inner.search(index, query, args).await
    }
}
