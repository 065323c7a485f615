//! The `Arbor` client: entry points for reads, writes and schema updates.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::get::{execute_get, GetContext};
use crate::meta::GetMeta;
use crate::modify::{Batch, ModifyOp};
use crate::schema_store::SchemaStore;
use arbor_model::{GetSpec, Schema};
use arbor_storage::{SearchIndex, StoreAdapter};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle to one hierarchical store. Cheap to clone.
#[derive(Clone)]
pub struct Arbor {
    store: Arc<dyn StoreAdapter>,
    search: Arc<dyn SearchIndex>,
    schemas: Arc<SchemaStore>,
    config: Arc<EngineConfig>,
}

impl std::fmt::Debug for Arbor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arbor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Arbor {
    /// Creates a client over a backend that provides both capabilities.
    pub fn new<B>(backend: Arc<B>) -> Self
    where
        B: StoreAdapter + SearchIndex + 'static,
    {
        Self::with_config(backend, EngineConfig::default())
    }

    pub fn with_config<B>(backend: Arc<B>, config: EngineConfig) -> Self
    where
        B: StoreAdapter + SearchIndex + 'static,
    {
        let store: Arc<dyn StoreAdapter> = backend.clone();
        let search: Arc<dyn SearchIndex> = backend;
        Self::from_parts(store, search, config)
    }

    /// Creates a client over separate store and search backends.
    pub fn from_parts(
        store: Arc<dyn StoreAdapter>,
        search: Arc<dyn SearchIndex>,
        config: EngineConfig,
    ) -> Self {
        Self {
            schemas: Arc::new(SchemaStore::new(Arc::clone(&store))),
            store,
            search,
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &Arc<dyn StoreAdapter> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the cached schema, fetching it on first use.
    pub async fn schema(&self) -> EngineResult<Arc<Schema>> {
        self.schemas.current().await
    }

    /// Refetches the schema from the store.
    pub async fn refresh_schema(&self) -> EngineResult<Arc<Schema>> {
        self.schemas.refresh().await
    }

    /// Merges `update` into the stored schema, refetching and retrying when
    /// another writer changed it in between.
    pub async fn update_schema(&self, update: Schema) -> EngineResult<Arc<Schema>> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let base = self.schemas.current().await?;
            match self.schemas.update(&base, update.clone()).await {
                Err(EngineError::SchemaMismatch { expected, found }) => {
                    warn!(attempts, ?expected, ?found, "schema changed concurrently, retrying update");
                    if attempts >= self.config.max_schema_retries {
                        return Err(EngineError::RetriesExhausted { attempts });
                    }
                    self.schemas.refresh().await?;
                }
                other => return other,
            }
        }
    }

    /// Evaluates a get-specification given as JSON.
    pub async fn get(&self, spec: &Value) -> EngineResult<Value> {
        let spec = GetSpec::from_value(spec)?;
        Ok(self.get_with_meta(&spec, false).await?.0)
    }

    /// Evaluates a parsed get-specification.
    pub async fn get_spec(&self, spec: &GetSpec) -> EngineResult<Value> {
        Ok(self.get_with_meta(spec, false).await?.0)
    }

    /// Evaluates a get-specification and returns what it depended on.
    pub async fn get_with_meta(
        &self,
        spec: &GetSpec,
        collect_meta: bool,
    ) -> EngineResult<(Value, GetMeta)> {
        let schema = self.schemas.current().await?;
        let ctx = GetContext::new(
            Arc::clone(&self.store),
            Arc::clone(&self.search),
            Arc::clone(&self.config),
            schema,
            spec.language.clone(),
            collect_meta || spec.include_meta,
        );
        execute_get(ctx, spec).await
    }

    /// Creates or updates one entity and returns its id.
    pub async fn set(&self, payload: Value) -> EngineResult<String> {
        let mut ids = self.modify(&[ModifyOp::Update(payload)]).await?;
        ids.pop()
            .ok_or_else(|| EngineError::InvalidPayload("nothing was written".to_string()))
    }

    /// Deletes an entity and the children it leaves without a parent.
    pub async fn delete(&self, id: &str) -> EngineResult<()> {
        self.delete_with(id, true).await
    }

    pub async fn delete_with(&self, id: &str, hierarchy: bool) -> EngineResult<()> {
        self.modify(&[ModifyOp::Delete {
            id: id.to_string(),
            hierarchy,
        }])
        .await?;
        Ok(())
    }

    /// Applies a batch of writes and returns the affected id of each.
    ///
    /// The batch is checked against the stored schema sha first. On a
    /// mismatch the schema is refetched and the batch retried.
    pub async fn modify(&self, ops: &[ModifyOp]) -> EngineResult<Vec<String>> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let schema = self.schemas.current().await?;
            match self.try_modify(&schema, ops).await {
                Err(EngineError::SchemaMismatch { expected, found }) => {
                    warn!(attempts, ?expected, ?found, "schema changed since fetch, retrying modify");
                    if attempts >= self.config.max_schema_retries {
                        return Err(EngineError::RetriesExhausted { attempts });
                    }
                    self.schemas.refresh().await?;
                }
                other => return other,
            }
        }
    }

    async fn try_modify(&self, schema: &Schema, ops: &[ModifyOp]) -> EngineResult<Vec<String>> {
        self.schemas.verify(schema).await?;
        let mut batch = Batch::new(
            self.store.as_ref(),
            schema,
            self.config.clock.now_millis(),
        );
        let mut ids = Vec::with_capacity(ops.len());
        for op in ops {
            match batch.apply(op).await {
                Ok(id) => ids.push(id),
                Err(err) => {
                    // Writes already made stay; their ancestors and events
                    // must still follow.
                    match batch.commit().await {
                        Ok(events) => {
                            warn!(error = %err, applied = ids.len(), events = events.len(), "modify failed part way");
                        }
                        Err(commit_err) => {
                            warn!(error = %err, commit_error = %commit_err, "modify failed part way, commit failed too");
                        }
                    }
                    return Err(err);
                }
            }
        }
        let events = batch.commit().await?;
        debug!(ops = ops.len(), events = events.len(), "modify committed");
        Ok(ids)
    }
}
