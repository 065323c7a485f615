//! In-process implementation of [`StoreAdapter`] and [`SearchIndex`].

use crate::adapter::{set_key, StoreAdapter};
use crate::error::{StorageError, StorageResult};
use crate::keys;
use crate::search::{format_number, Predicate, SearchArgs, SearchIndex, SearchQuery, SortDirection};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, trace};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
struct State {
    hashes: BTreeMap<String, BTreeMap<String, String>>,
    sets: BTreeMap<String, BTreeSet<String>>,
}

/// Hashes, sets and channels held in memory.
///
/// Every entity hash that carries a `type` field is searchable. Setting the
/// store unavailable makes every command fail with
/// [`StorageError::Unavailable`].
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    published: Mutex<Vec<(String, String)>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a backend outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    /// Messages published on `channel`, oldest first.
    pub async fn published(&self, channel: &str) -> Vec<String> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn check(&self) -> StorageResult<()> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(StorageError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn hash_get(&self, key: &str, field: &str) -> StorageResult<Option<String>> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hash_get_all(&self, key: &str) -> StorageResult<BTreeMap<String, String>> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StorageResult<()> {
        self.check()?;
        let mut state = self.state.write().await;
        if state.sets.contains_key(key) {
            return Err(StorageError::WrongType(key.to_string()));
        }
        state
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_set_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> StorageResult<bool> {
        self.check()?;
        let mut state = self.state.write().await;
        let hash = state.hashes.entry(key.to_string()).or_default();
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn hash_increment(&self, key: &str, field: &str, delta: f64) -> StorageResult<f64> {
        self.check()?;
        let mut state = self.state.write().await;
        let hash = state.hashes.entry(key.to_string()).or_default();
        let current = match hash.get(field) {
            Some(raw) => raw.parse::<f64>().map_err(|_| {
                StorageError::InvalidData(format!("{key}.{field} is not a number: {raw}"))
            })?,
            None => 0.0,
        };
        let next = current + delta;
        hash.insert(field.to_string(), format_number(next));
        Ok(next)
    }

    async fn hash_delete(&self, key: &str, field: &str) -> StorageResult<bool> {
        self.check()?;
        let mut state = self.state.write().await;
        let Some(hash) = state.hashes.get_mut(key) else {
            return Ok(false);
        };
        let existed = hash.remove(field).is_some();
        if hash.is_empty() {
            state.hashes.remove(key);
        }
        Ok(existed)
    }

    async fn hash_keys(&self, key: &str) -> StorageResult<Vec<String>> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state
            .hashes
            .get(key)
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.hashes.contains_key(key) || state.sets.contains_key(key))
    }

    async fn delete_key(&self, key: &str) -> StorageResult<()> {
        self.check()?;
        let mut state = self.state.write().await;
        state.hashes.remove(key);
        state.sets.remove(key);
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StorageResult<Vec<String>> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_add(&self, key: &str, members: &[String]) -> StorageResult<usize> {
        self.check()?;
        if members.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.write().await;
        if state.hashes.contains_key(key) {
            return Err(StorageError::WrongType(key.to_string()));
        }
        let set = state.sets.entry(key.to_string()).or_default();
        Ok(members.iter().filter(|m| set.insert((*m).clone())).count())
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> StorageResult<usize> {
        self.check()?;
        let mut state = self.state.write().await;
        let Some(set) = state.sets.get_mut(key) else {
            return Ok(0);
        };
        let removed = members.iter().filter(|m| set.remove(m.as_str())).count();
        if set.is_empty() {
            state.sets.remove(key);
        }
        Ok(removed)
    }

    async fn publish(&self, channel: &str, payload: &str) -> StorageResult<usize> {
        self.check()?;
        self.published
            .lock()
            .await
            .push((channel.to_string(), payload.to_string()));
        let channels = self.channels.lock().await;
        let reached = channels
            .get(channel)
            .and_then(|tx| tx.send(payload.to_string()).ok())
            .unwrap_or(0);
        trace!(channel, reached, "published");
        Ok(reached)
    }

    async fn subscribe(&self, channel: &str) -> StorageResult<broadcast::Receiver<String>> {
        self.check()?;
        let mut channels = self.channels.lock().await;
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(tx.subscribe())
    }
}

// ── Search evaluation ────────────────────────────────────────────

fn field_values(state: &State, id: &str, hash: &BTreeMap<String, String>, field: &str) -> Vec<String> {
    if field == "id" {
        return vec![id.to_string()];
    }
    match hash.get(field) {
        Some(v) if v == keys::SET_MARKER => state
            .sets
            .get(&set_key(id, field))
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default(),
        Some(v) if field == "ancestors" => v
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(v) => vec![v.clone()],
        None => state
            .sets
            .get(&set_key(id, field))
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default(),
    }
}

fn matches(state: &State, id: &str, hash: &BTreeMap<String, String>, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::All => true,
        Predicate::And { children } => children.iter().all(|c| matches(state, id, hash, c)),
        Predicate::Or { children } => children.iter().any(|c| matches(state, id, hash, c)),
        Predicate::Not { child } => !matches(state, id, hash, child),
        Predicate::Tag { field, values } => field_values(state, id, hash, field)
            .iter()
            .any(|v| values.contains(v)),
        Predicate::Numeric { field, min, max } => hash
            .get(field.as_str())
            .and_then(|v| v.parse::<f64>().ok())
            .is_some_and(|n| min.admits(n, true) && max.admits(n, false)),
        Predicate::Text { field, value } => {
            let needle = value.to_lowercase();
            let prefix = format!("{field}.");
            hash.iter()
                .filter(|(k, _)| *k == field || k.starts_with(&prefix))
                .any(|(_, v)| v.to_lowercase().contains(&needle))
        }
    }
}

fn compare_values(a: Option<&String>, b: Option<&String>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match (a.parse::<f64>(), b.parse::<f64>()) {
            (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => a.cmp(b),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait]
impl SearchIndex for MemoryStore {
    async fn search(
        &self,
        index: &str,
        query: &SearchQuery,
        args: &SearchArgs,
    ) -> StorageResult<Vec<String>> {
        self.check()?;
        debug!(index, query = %query, args = ?args.to_args(), "search");
        let state = self.state.read().await;

        let mut hits: Vec<(&String, &BTreeMap<String, String>)> = state
            .hashes
            .iter()
            .filter(|(_, h)| h.contains_key("type"))
            .filter(|(id, h)| matches(&state, id, h, &query.predicate))
            .collect();

        if let Some(sort) = &args.sort {
            hits.sort_by(|(ida, ha), (idb, hb)| {
                let (va, vb) = (ha.get(&sort.field), hb.get(&sort.field));
                let ord = match (va, vb, sort.direction) {
                    (Some(_), Some(_), SortDirection::Desc) => compare_values(vb, va),
                    _ => compare_values(va, vb),
                };
                ord.then_with(|| ida.cmp(idb))
            });
        }

        let limit = args.limit.unwrap_or(usize::MAX);
        Ok(hits
            .into_iter()
            .skip(args.offset)
            .take(limit)
            .map(|(id, _)| id.clone())
            .collect())
    }
}
