//! Registry of live subscriptions, the change-event listener, staged
//! flushes, schema observers and the refresh timer for now-relative filters.

use crate::config::SubscriptionConfig;
use crate::error::{SubscriptionError, SubscriptionResult};
use crate::footprint::{affects, Affects};
use crate::member_cache::{MemberCache, ANCESTORS};
use crate::subscription::{subscription_id, Subscription, SubscriptionState, Update};
use arbor_engine::{parse_ancestors, Arbor};
use arbor_model::{GetSpec, Schema};
use arbor_storage::keys;
use arbor_types::{ChangeEvent, ChangeOp, SubscriptionId, EVENTS_CHANNEL, ROOT_ID, SCHEMA_CHANNEL};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Delay before a failed time-driven re-evaluation is attempted again.
const REFRESH_RETRY_MS: i64 = 1_000;

const DESCENDANTS: &str = "descendants";

#[derive(Debug, Default)]
struct Registry {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    /// Client id → subscriptions it holds.
    clients: HashMap<String, BTreeSet<SubscriptionId>>,
}

enum Verdict {
    Stage,
    RootDeleted,
    IfMember(BTreeMap<String, Vec<String>>),
}

struct Inner {
    arbor: Arbor,
    config: SubscriptionConfig,
    registry: RwLock<Registry>,
    members: Mutex<MemberCache>,
    staged: Mutex<BTreeSet<SubscriptionId>>,
    /// One lock per subscription; evaluations and delete publishes of the
    /// same subscription run one at a time.
    evaluating: Mutex<HashMap<SubscriptionId, Arc<Mutex<()>>>>,
    /// Whether staging schedules its own flush.
    auto_flush: bool,
    flush_pending: AtomicBool,
    /// Refresh time → subscriptions due then.
    refresh: Mutex<BTreeMap<i64, BTreeSet<SubscriptionId>>>,
    refresh_changed: Notify,
}

/// Keeps get-specifications live.
///
/// Every subscription is evaluated once when registered. Afterwards each
/// change event on [`EVENTS_CHANNEL`] is matched against the dependencies
/// of the last evaluation; matching subscriptions are staged and
/// re-evaluated together on the next flush. A re-evaluation publishes only
/// when the content hash of the result changed.
///
/// Publishing writes `{type, payload}` to the cache hash under the
/// subscription id and the hash under `<id>_version`, then announces the
/// version on the channel named by the subscription id.
///
/// Schema updates are announced on [`SCHEMA_CHANNEL`]. The manager then
/// refetches its schema and re-checks every subscription.
pub struct SubscriptionManager {
    inner: Arc<Inner>,
    tasks: Vec<JoinHandle<()>>,
}

impl SubscriptionManager {
    /// Creates a manager without background tasks. Events are fed through
    /// [`handle_event`](Self::handle_event) and evaluated by
    /// [`flush`](Self::flush) and [`refresh_due`](Self::refresh_due).
    pub fn new(arbor: Arbor, config: SubscriptionConfig) -> Self {
        Self {
            inner: Arc::new(Inner::new(arbor, config, false)),
            tasks: Vec::new(),
        }
    }

    /// Creates a manager that listens to the change-event and schema
    /// channels, flushes staged subscriptions after `flush_delay_ms` and
    /// runs the refresh timer. Background tasks stop when the manager is
    /// dropped.
    pub async fn start(arbor: Arbor, config: SubscriptionConfig) -> SubscriptionResult<Self> {
        let events = arbor.store().subscribe(EVENTS_CHANNEL).await?;
        let schemas = arbor.store().subscribe(SCHEMA_CHANNEL).await?;
        let inner = Arc::new(Inner::new(arbor, config, true));
        let tasks = vec![
            tokio::spawn(run_listener(Arc::clone(&inner), events, schemas)),
            tokio::spawn(run_timer(Arc::clone(&inner))),
        ];
        info!("subscription manager started");
        Ok(Self { inner, tasks })
    }

    /// Registers `client_id` for `spec` and returns the subscription id.
    /// A new subscription is evaluated and published before this returns.
    pub async fn subscribe(&self, client_id: &str, spec: &Value) -> SubscriptionResult<SubscriptionId> {
        Ok(self.inner.subscribe(client_id, spec).await?.0)
    }

    /// Drops `client_id` from a subscription; the subscription goes away
    /// with its last client.
    pub async fn unsubscribe(&self, client_id: &str, id: &SubscriptionId) -> SubscriptionResult<()> {
        self.inner.unsubscribe(client_id, id).await
    }

    /// Drops every subscription held by a disconnected client. Returns how
    /// many subscriptions were removed entirely.
    pub async fn unsubscribe_client(&self, client_id: &str) -> usize {
        let ids = self
            .inner
            .registry
            .write()
            .await
            .clients
            .remove(client_id)
            .unwrap_or_default();
        let mut removed = 0;
        for id in &ids {
            if self.inner.release(client_id, id).await {
                removed += 1;
            }
        }
        info!(client_id, subscriptions = ids.len(), removed, "client unsubscribed");
        removed
    }

    /// Subscribes under a fresh client id and returns a stream of updates.
    /// The first update is the current result.
    pub async fn observe(&self, spec: &Value) -> SubscriptionResult<Observer> {
        let id = subscription_id(spec)?;
        let messages = self.inner.arbor.store().subscribe(id.as_str()).await?;
        let client_id = format!("observer-{}", Uuid::new_v4().simple());
        let (id, created) = self.inner.subscribe(&client_id, spec).await?;
        Ok(Observer {
            inner: Arc::clone(&self.inner),
            id,
            client_id,
            messages,
            replay_cached: !created,
        })
    }

    /// Streams the schema: first the current one, then each stored update.
    pub async fn observe_schema(&self) -> SubscriptionResult<SchemaObserver> {
        let messages = self.inner.arbor.store().subscribe(SCHEMA_CHANNEL).await?;
        Ok(SchemaObserver {
            arbor: self.inner.arbor.clone(),
            messages,
            first: true,
        })
    }

    /// Refetches the schema after an update announced on [`SCHEMA_CHANNEL`]
    /// and stages every subscription. Returns the refreshed schema.
    pub async fn handle_schema_change(&self) -> SubscriptionResult<Arc<Schema>> {
        self.inner.handle_schema_change().await
    }

    /// Matches one change event and stages the subscriptions it may affect.
    /// Returns how many were staged.
    pub async fn handle_event(&self, event: &ChangeEvent) -> SubscriptionResult<usize> {
        self.inner.handle_event(event).await
    }

    /// Re-evaluates every staged subscription. Returns how many published.
    pub async fn flush(&self) -> usize {
        self.inner.flush().await
    }

    /// Re-evaluates subscriptions whose refresh time has passed. Returns how
    /// many published.
    pub async fn refresh_due(&self) -> usize {
        self.inner.refresh_due().await
    }

    /// Earliest scheduled refresh.
    pub async fn next_refresh(&self) -> Option<i64> {
        self.inner.refresh.lock().await.keys().next().copied()
    }

    pub async fn state(&self, id: &SubscriptionId) -> Option<SubscriptionState> {
        self.inner
            .registry
            .read()
            .await
            .subscriptions
            .get(id)
            .map(|s| s.state)
    }

    /// Version hash of the last publish.
    pub async fn version(&self, id: &SubscriptionId) -> Option<String> {
        self.inner
            .registry
            .read()
            .await
            .subscriptions
            .get(id)
            .and_then(|s| s.version.clone())
    }

    /// Number of registered subscriptions.
    pub async fn len(&self) -> usize {
        self.inner.registry.read().await.subscriptions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Last published update of a subscription, read from the cache hash.
    pub async fn cached(&self, id: &SubscriptionId) -> SubscriptionResult<Option<Update>> {
        self.inner.cached(id).await
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Updates of one observed subscription.
pub struct Observer {
    inner: Arc<Inner>,
    id: SubscriptionId,
    client_id: String,
    messages: broadcast::Receiver<String>,
    replay_cached: bool,
}

impl Observer {
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    /// Waits for the next publish and returns the cached update. Returns
    /// `None` once the channel closes.
    pub async fn next(&mut self) -> Option<SubscriptionResult<Update>> {
        if !mem::take(&mut self.replay_cached) {
            match self.messages.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return None,
            }
        }
        Some(
            self.inner
                .cached(&self.id)
                .await
                .and_then(|u| u.ok_or_else(|| SubscriptionError::NotFound(self.id.to_string()))),
        )
    }

    /// Stops observing.
    pub async fn close(self) -> SubscriptionResult<()> {
        self.inner.unsubscribe(&self.client_id, &self.id).await
    }
}

/// Schema updates seen by one observer.
pub struct SchemaObserver {
    arbor: Arbor,
    messages: broadcast::Receiver<String>,
    first: bool,
}

impl SchemaObserver {
    /// Returns the current schema on the first call, then waits for the next
    /// update and refetches. Returns `None` once the channel closes.
    pub async fn next(&mut self) -> Option<SubscriptionResult<Arc<Schema>>> {
        if mem::take(&mut self.first) {
            return Some(self.arbor.schema().await.map_err(Into::into));
        }
        match self.messages.recv().await {
            Ok(_) | Err(RecvError::Lagged(_)) => {
                Some(self.arbor.refresh_schema().await.map_err(Into::into))
            }
            Err(RecvError::Closed) => None,
        }
    }
}

impl Inner {
    fn new(arbor: Arbor, config: SubscriptionConfig, auto_flush: bool) -> Self {
        let members = MemberCache::new(config.member_cache_size);
        Self {
            arbor,
            config,
            registry: RwLock::new(Registry::default()),
            members: Mutex::new(members),
            staged: Mutex::new(BTreeSet::new()),
            evaluating: Mutex::new(HashMap::new()),
            auto_flush,
            flush_pending: AtomicBool::new(false),
            refresh: Mutex::new(BTreeMap::new()),
            refresh_changed: Notify::new(),
        }
    }

    fn now(&self) -> i64 {
        self.arbor.config().clock.now_millis()
    }

    /// Returns the id and whether the subscription was created.
    async fn subscribe(
        &self,
        client_id: &str,
        spec: &Value,
    ) -> SubscriptionResult<(SubscriptionId, bool)> {
        let get = GetSpec::from_value(spec)?;
        let id = subscription_id(spec)?;
        let created = {
            let mut guard = self.registry.write().await;
            let registry = &mut *guard;
            let created = !registry.subscriptions.contains_key(&id);
            registry
                .subscriptions
                .entry(id.clone())
                .or_insert_with(|| Subscription::new(id.clone(), get))
                .clients
                .insert(client_id.to_string());
            registry
                .clients
                .entry(client_id.to_string())
                .or_default()
                .insert(id.clone());
            created
        };

        if created {
            info!(subscription = %id, client_id, "subscription registered");
            if let Err(err) = self.evaluate(&id).await {
                warn!(subscription = %id, error = %err, "initial evaluation failed");
                self.unsubscribe(client_id, &id).await?;
                return Err(err);
            }
        }
        Ok((id, created))
    }

    async fn unsubscribe(&self, client_id: &str, id: &SubscriptionId) -> SubscriptionResult<()> {
        {
            let mut guard = self.registry.write().await;
            if !guard.subscriptions.contains_key(id) {
                return Err(SubscriptionError::NotFound(id.to_string()));
            }
            if let Some(ids) = guard.clients.get_mut(client_id) {
                ids.remove(id);
                if ids.is_empty() {
                    guard.clients.remove(client_id);
                }
            }
        }
        self.release(client_id, id).await;
        Ok(())
    }

    /// Removes `client_id` from the subscription's clients and drops the
    /// subscription when none are left. Returns whether it was dropped.
    async fn release(&self, client_id: &str, id: &SubscriptionId) -> bool {
        let removed = {
            let mut registry = self.registry.write().await;
            let last = match registry.subscriptions.get_mut(id) {
                Some(sub) => {
                    sub.clients.remove(client_id);
                    sub.clients.is_empty()
                }
                None => false,
            };
            if last {
                registry.subscriptions.remove(id)
            } else {
                None
            }
        };
        let Some(sub) = removed else {
            return false;
        };
        self.staged.lock().await.remove(id);
        self.evaluating.lock().await.remove(id);
        self.reschedule(id, sub.refresh_at, None).await;
        {
            let registry = self.registry.read().await;
            let live: BTreeSet<&str> = registry
                .subscriptions
                .values()
                .flat_map(|s| s.meta.contains.keys().map(String::as_str))
                .collect();
            self.members.lock().await.retain(&live);
        }
        info!(subscription = %id, "subscription removed");
        true
    }

    async fn cached(&self, id: &SubscriptionId) -> SubscriptionResult<Option<Update>> {
        let raw = self
            .arbor
            .store()
            .hash_get(&self.config.cache_key, id.as_str())
            .await?;
        Ok(raw.map(|r| serde_json::from_str(&r)).transpose()?)
    }

    async fn is_registered(&self, id: &SubscriptionId) -> bool {
        self.registry.read().await.subscriptions.contains_key(id)
    }

    /// Entity a get-specification is rooted at. `None` for an unknown alias.
    async fn root_of(&self, spec: &GetSpec) -> SubscriptionResult<Option<String>> {
        if let Some(alias) = &spec.alias {
            return Ok(self.arbor.store().hash_get(keys::ALIASES, alias).await?);
        }
        Ok(Some(spec.id.clone().unwrap_or_else(|| ROOT_ID.to_string())))
    }

    async fn evaluation_lock(&self, id: &SubscriptionId) -> Arc<Mutex<()>> {
        Arc::clone(self.evaluating.lock().await.entry(id.clone()).or_default())
    }

    /// Evaluates one subscription and publishes when its content changed.
    /// On failure the previous version stays in place.
    ///
    /// Runs under the subscription's evaluation lock, so a later evaluation
    /// always reads data at least as new and publishes after this one.
    async fn evaluate(&self, id: &SubscriptionId) -> SubscriptionResult<bool> {
        let lock = self.evaluation_lock(id).await;
        let _running = lock.lock().await;

        let current = self
            .registry
            .read()
            .await
            .subscriptions
            .get(id)
            .map(|sub| (sub.spec.clone(), sub.version.clone()));
        let Some((spec, previous)) = current else {
            self.evaluating.lock().await.remove(id);
            return Ok(false);
        };

        let (payload, meta) = self.arbor.get_with_meta(&spec, true).await?;
        let root = self.root_of(&spec).await?;
        let encoded = serde_json::to_string(&Update::Update { payload })?;
        let version = Update::version(&encoded);
        let changed = previous.as_deref() != Some(version.as_str());

        if changed {
            if !self.is_registered(id).await {
                return Ok(false);
            }
            self.publish(id, &encoded, &version).await?;
        } else {
            debug!(subscription = %id, "result unchanged, not publishing");
        }

        let refresh_at = meta.refresh_at;
        let contains = meta.contains.clone();
        let old_refresh = {
            let mut registry = self.registry.write().await;
            let Some(sub) = registry.subscriptions.get_mut(id) else {
                return Ok(false);
            };
            sub.state = SubscriptionState::Live;
            sub.version = Some(version);
            sub.meta = meta;
            sub.root = root;
            mem::replace(&mut sub.refresh_at, refresh_at)
        };
        if old_refresh != refresh_at {
            self.reschedule(id, old_refresh, refresh_at).await;
        }
        if let Err(err) = self.warm_members(&contains).await {
            warn!(subscription = %id, error = %err, "could not load member sets");
        }
        Ok(changed)
    }

    async fn publish(&self, id: &SubscriptionId, encoded: &str, version: &str) -> SubscriptionResult<()> {
        let store = self.arbor.store();
        store
            .hash_set(&self.config.cache_key, id.as_str(), encoded)
            .await?;
        store
            .hash_set(&self.config.cache_key, &id.version_field(), version)
            .await?;
        let reached = store.publish(id.as_str(), version).await?;
        debug!(subscription = %id, version, reached, "published update");
        Ok(())
    }

    /// Caches a delete payload and announces it with an empty message.
    async fn publish_delete(&self, id: &SubscriptionId) -> SubscriptionResult<()> {
        let lock = self.evaluation_lock(id).await;
        let _running = lock.lock().await;

        let encoded = serde_json::to_string(&Update::Delete)?;
        let store = self.arbor.store();
        store
            .hash_set(&self.config.cache_key, id.as_str(), &encoded)
            .await?;
        store
            .hash_set(&self.config.cache_key, &id.version_field(), "")
            .await?;
        store.publish(id.as_str(), "").await?;

        let old_refresh = {
            let mut registry = self.registry.write().await;
            let Some(sub) = registry.subscriptions.get_mut(id) else {
                return Ok(());
            };
            sub.version = Some(String::new());
            sub.refresh_at.take()
        };
        self.reschedule(id, old_refresh, None).await;
        info!(subscription = %id, "root entity deleted");
        Ok(())
    }

    async fn handle_event(self: &Arc<Self>, event: &ChangeEvent) -> SubscriptionResult<usize> {
        let schema = self.arbor.schema().await?;
        let type_name = schema.type_name_for_id(&event.entity_id);

        let verdicts: Vec<(SubscriptionId, Verdict)> = {
            let registry = self.registry.read().await;
            registry
                .subscriptions
                .values()
                .filter_map(|sub| {
                    let is_root = sub.root.as_deref() == Some(event.entity_id.as_str());
                    if event.op == ChangeOp::Delete && is_root {
                        return Some((sub.id.clone(), Verdict::RootDeleted));
                    }
                    if sub.state == SubscriptionState::Registered {
                        return Some((sub.id.clone(), Verdict::Stage));
                    }
                    match affects(&sub.meta, event, type_name) {
                        Affects::No => None,
                        Affects::Yes => Some((sub.id.clone(), Verdict::Stage)),
                        Affects::IfMember(sets) => Some((sub.id.clone(), Verdict::IfMember(sets))),
                    }
                })
                .collect()
        };

        let mut member_sets = BTreeMap::new();
        for (_, verdict) in &verdicts {
            if let Verdict::IfMember(sets) = verdict {
                member_sets.extend(sets.iter().map(|(k, o)| (k.as_str(), o.as_slice())));
            }
        }
        let affected_keys = self.member_changes(event, &member_sets).await?;

        let mut stage = Vec::new();
        for (id, verdict) in verdicts {
            match verdict {
                Verdict::Stage => stage.push(id),
                Verdict::RootDeleted => {
                    self.staged.lock().await.remove(&id);
                    self.publish_delete(&id).await?;
                }
                Verdict::IfMember(sets) => {
                    if sets.keys().any(|k| affected_keys.contains(k.as_str())) {
                        stage.push(id);
                    }
                }
            }
        }

        let staged = stage.len();
        if staged > 0 {
            debug!(entity = %event.entity_id, field = %event.field, staged, "change staged");
            self.staged.lock().await.extend(stage);
            self.schedule_flush();
        }
        Ok(staged)
    }

    /// Brings the cached member sets up to date with the event's entity and
    /// returns the keys it is, or was, a member of.
    async fn member_changes(
        &self,
        event: &ChangeEvent,
        sets: &BTreeMap<&str, &[String]>,
    ) -> SubscriptionResult<BTreeSet<String>> {
        if sets.is_empty() {
            return Ok(BTreeSet::new());
        }
        let ancestors = if event.op == ChangeOp::Delete {
            Vec::new()
        } else {
            self.arbor
                .store()
                .hash_get(&event.entity_id, ANCESTORS)
                .await?
                .as_deref()
                .map(parse_ancestors)
                .unwrap_or_default()
        };

        let mut cache = self.members.lock().await;
        let mut affected = BTreeSet::new();
        for (key, origins) in sets {
            let member = ancestors.iter().any(|a| origins.contains(a));
            // An evicted set cannot tell whether the entity just left it.
            let was = cache.update(key, &event.entity_id, member).unwrap_or(true);
            if member || was {
                affected.insert(key.to_string());
            }
        }
        Ok(affected)
    }

    /// Loads the member sets `meta` refers to that are not cached yet.
    async fn warm_members(&self, contains: &BTreeMap<String, Vec<String>>) -> SubscriptionResult<()> {
        for (key, origins) in contains {
            if self.members.lock().await.contains_key(key) {
                continue;
            }
            let mut members = BTreeSet::new();
            for origin in origins {
                let found = self
                    .arbor
                    .get(&json!({ "$id": origin, (DESCENDANTS): true }))
                    .await?;
                if let Some(ids) = found.get(DESCENDANTS).and_then(Value::as_array) {
                    members.extend(ids.iter().filter_map(Value::as_str).map(str::to_string));
                }
            }
            debug!(key, members = members.len(), "member set loaded");
            self.members.lock().await.insert(key, members);
        }
        Ok(())
    }

    async fn handle_schema_change(self: &Arc<Self>) -> SubscriptionResult<Arc<Schema>> {
        let schema = self.arbor.refresh_schema().await?;
        info!(sha = ?schema.sha, "schema changed, re-checking every subscription");
        self.stage_all().await;
        Ok(schema)
    }

    /// Stages every registered subscription.
    async fn stage_all(self: &Arc<Self>) {
        let ids: Vec<SubscriptionId> = self
            .registry
            .read()
            .await
            .subscriptions
            .keys()
            .cloned()
            .collect();
        self.staged.lock().await.extend(ids);
        self.schedule_flush();
    }

    fn schedule_flush(self: &Arc<Self>) {
        if !self.auto_flush || self.flush_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(inner.config.flush_delay_ms)).await;
            inner.flush_pending.store(false, Ordering::SeqCst);
            inner.flush().await;
        });
    }

    async fn flush(&self) -> usize {
        let staged = mem::take(&mut *self.staged.lock().await);
        let mut published = 0;
        for id in &staged {
            match self.evaluate(id).await {
                Ok(true) => published += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(subscription = %id, error = %err, "re-evaluation failed, keeping previous version");
                }
            }
        }
        if !staged.is_empty() {
            debug!(staged = staged.len(), published, "flushed");
        }
        published
    }

    async fn refresh_due(&self) -> usize {
        let now = self.now();
        let due: Vec<(i64, SubscriptionId)> = {
            let mut queue = self.refresh.lock().await;
            let later = queue.split_off(&(now + 1));
            mem::replace(&mut *queue, later)
                .into_iter()
                .flat_map(|(at, ids)| ids.into_iter().map(move |id| (at, id)))
                .collect()
        };

        let mut published = 0;
        for (at, id) in due {
            if let Some(sub) = self.registry.write().await.subscriptions.get_mut(&id) {
                if sub.refresh_at == Some(at) {
                    sub.refresh_at = None;
                }
            }
            match self.evaluate(&id).await {
                Ok(true) => published += 1,
                Ok(false) => {}
                Err(err) => {
                    let retry = now + REFRESH_RETRY_MS;
                    warn!(subscription = %id, error = %err, retry, "refresh failed, rescheduling");
                    let old = self
                        .registry
                        .write()
                        .await
                        .subscriptions
                        .get_mut(&id)
                        .map(|sub| sub.refresh_at.replace(retry));
                    if let Some(old) = old {
                        self.reschedule(&id, old, Some(retry)).await;
                    }
                }
            }
        }
        published
    }

    async fn reschedule(&self, id: &SubscriptionId, old: Option<i64>, new: Option<i64>) {
        let mut queue = self.refresh.lock().await;
        if let Some(old) = old {
            if let Some(ids) = queue.get_mut(&old) {
                ids.remove(id);
                if ids.is_empty() {
                    queue.remove(&old);
                }
            }
        }
        if let Some(at) = new {
            debug!(subscription = %id, at, "refresh scheduled");
            queue.entry(at).or_default().insert(id.clone());
        }
        drop(queue);
        self.refresh_changed.notify_one();
    }
}

async fn run_listener(
    inner: Arc<Inner>,
    mut events: broadcast::Receiver<String>,
    mut schemas: broadcast::Receiver<String>,
) {
    let mut schemas_open = true;
    loop {
        let received = tokio::select! {
            received = events.recv() => received,
            update = schemas.recv(), if schemas_open => {
                match update {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        if let Err(err) = inner.handle_schema_change().await {
                            warn!(error = %err, "failed to refresh schema");
                        }
                    }
                    Err(RecvError::Closed) => {
                        info!("schema channel closed");
                        schemas_open = false;
                    }
                }
                continue;
            }
        };
        match received {
            Ok(raw) => match ChangeEvent::decode(&raw) {
                Ok(event) => {
                    if let Err(err) = inner.handle_event(&event).await {
                        warn!(entity = %event.entity_id, error = %err, "failed to match change event");
                    }
                }
                Err(err) => warn!(error = %err, "undecodable change event"),
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "change events lagged, re-checking every subscription");
                inner.stage_all().await;
            }
            Err(RecvError::Closed) => {
                info!("change event channel closed");
                break;
            }
        }
    }
}

/// Sleeps until the earliest scheduled refresh, or `max_refresh_sleep_ms`,
/// and re-evaluates whatever is due. A refresh whose time passed while the
/// process was paused runs on the next wake.
async fn run_timer(inner: Arc<Inner>) {
    let max = i64::try_from(inner.config.max_refresh_sleep_ms).unwrap_or(i64::MAX);
    loop {
        let next = inner.refresh.lock().await.keys().next().copied();
        let wait = next.map_or(max, |at| (at - inner.now()).clamp(0, max));
        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(wait.unsigned_abs())) => {}
            () = inner.refresh_changed.notified() => continue,
        }
        inner.refresh_due().await;
    }
}
