//! Schema persistence with optimistic concurrency.
//!
//! The schema JSON lives in the `types` field of the schema hash next to
//! its SHA-256. Readers cache the parsed schema; writers compare the stored
//! sha against the one their update was based on and fail with
//! [`EngineError::SchemaMismatch`] when another writer got there first.
//! Every stored update is announced on [`SCHEMA_CHANNEL`] with its sha.

use crate::error::{EngineError, EngineResult};
use arbor_model::Schema;
use arbor_storage::{keys, StoreAdapter};
use arbor_types::SCHEMA_CHANNEL;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

const TYPES_FIELD: &str = "types";
const SHA_FIELD: &str = "sha";

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn schema_sha(schema: &Schema) -> EngineResult<String> {
    let mut unsigned = schema.clone();
    unsigned.sha = None;
    Ok(sha256_hex(serde_json::to_string(&unsigned)?.as_bytes()))
}

pub(crate) struct SchemaStore {
    store: Arc<dyn StoreAdapter>,
    cached: RwLock<Option<Arc<Schema>>>,
}

impl SchemaStore {
    pub(crate) fn new(store: Arc<dyn StoreAdapter>) -> Self {
        Self {
            store,
            cached: RwLock::new(None),
        }
    }

    /// Returns the cached schema, fetching it on first use.
    pub(crate) async fn current(&self) -> EngineResult<Arc<Schema>> {
        if let Some(schema) = self.cached.read().await.as_ref() {
            return Ok(Arc::clone(schema));
        }
        self.refresh().await
    }

    /// Refetches the schema from the store.
    pub(crate) async fn refresh(&self) -> EngineResult<Arc<Schema>> {
        let schema = Arc::new(self.fetch().await?);
        *self.cached.write().await = Some(Arc::clone(&schema));
        Ok(schema)
    }

    async fn fetch(&self) -> EngineResult<Schema> {
        let mut schema = match self.store.hash_get(keys::SCHEMA, TYPES_FIELD).await? {
            Some(raw) => serde_json::from_str::<Schema>(&raw)?,
            None => Schema::default(),
        };
        schema.sha = self.store.hash_get(keys::SCHEMA, SHA_FIELD).await?;
        Ok(schema)
    }

    /// Returns the sha currently stored, which may be newer than the cache.
    pub(crate) async fn stored_sha(&self) -> EngineResult<Option<String>> {
        Ok(self.store.hash_get(keys::SCHEMA, SHA_FIELD).await?)
    }

    /// Fails with `SchemaMismatch` when `schema` is no longer the stored one.
    pub(crate) async fn verify(&self, schema: &Schema) -> EngineResult<()> {
        let found = self.stored_sha().await?;
        if found != schema.sha {
            return Err(EngineError::SchemaMismatch {
                expected: schema.sha.clone(),
                found,
            });
        }
        Ok(())
    }

    /// Merges `update` into `base` and stores the result.
    pub(crate) async fn update(&self, base: &Schema, update: Schema) -> EngineResult<Arc<Schema>> {
        self.verify(base).await?;

        let mut merged = base.clone();
        merged.merge(update)?;
        let sha = schema_sha(&merged)?;
        if base.sha.as_deref() == Some(sha.as_str()) {
            debug!("schema update is a no-op");
            return Ok(Arc::new(merged));
        }
        merged.sha = None;
        let raw = serde_json::to_string(&merged)?;
        self.store.hash_set(keys::SCHEMA, TYPES_FIELD, &raw).await?;
        self.store.hash_set(keys::SCHEMA, SHA_FIELD, &sha).await?;
        merged.sha = Some(sha.clone());

        let schema = Arc::new(merged);
        *self.cached.write().await = Some(Arc::clone(&schema));
        let reached = self.store.publish(SCHEMA_CHANNEL, &sha).await?;
        debug!(sha = ?schema.sha, reached, "schema updated");
        Ok(schema)
    }
}
