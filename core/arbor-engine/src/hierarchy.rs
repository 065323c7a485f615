//! Materialized ancestor lists.
//!
//! Every entity stores the comma-joined union of its parents' ancestor lists
//! followed by the parents themselves. After an edge changes, the affected
//! entities and all of their descendants are recomputed in topological
//! order so each entity is written once, after all of its parents.

use crate::error::EngineResult;
use arbor_storage::{set_key, StoreAdapter};
use arbor_types::ROOT_ID;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tracing::{debug, warn};

pub(crate) const ANCESTORS: &str = "ancestors";
pub(crate) const PARENTS: &str = "parents";
pub(crate) const CHILDREN: &str = "children";

/// Splits a stored ancestor list.
pub fn parse_ancestors(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reads the materialized ancestor list of `id`.
pub(crate) async fn stored_ancestors(store: &dyn StoreAdapter, id: &str) -> EngineResult<Vec<String>> {
    Ok(store
        .hash_get(id, ANCESTORS)
        .await?
        .map(|raw| parse_ancestors(&raw))
        .unwrap_or_default())
}

/// Computes an ancestor list from parent ids and their ancestor lists.
///
/// Parents' ancestors come first, then the parents, duplicates dropped on
/// first occurrence. An entity without parents descends from root only.
pub fn combine_ancestors(id: &str, parents: &[(String, Vec<String>)]) -> Vec<String> {
    if id == ROOT_ID {
        return Vec::new();
    }
    if parents.is_empty() {
        return vec![ROOT_ID.to_string()];
    }
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for ancestor in parents
        .iter()
        .flat_map(|(_, ancestors)| ancestors.iter())
        .chain(parents.iter().map(|(p, _)| p))
    {
        if seen.insert(ancestor.as_str()) {
            out.push(ancestor.clone());
        }
    }
    out
}

/// Recomputes and persists the ancestor lists of `ids` and of every
/// entity below them. Returns the ids whose stored list changed.
///
/// Ancestor lists computed during the call are memoized per call only, so
/// concurrent recomputations over disjoint subtrees do not interfere.
pub async fn recompute_ancestors(
    store: &dyn StoreAdapter,
    ids: &[String],
) -> EngineResult<Vec<String>> {
    // Collect the affected subtree with its in-subtree parent edges.
    let mut affected: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut queue: VecDeque<String> = ids.iter().cloned().collect();
    while let Some(id) = queue.pop_front() {
        if affected.contains_key(&id) {
            continue;
        }
        let parents = store.set_members(&set_key(&id, PARENTS)).await?;
        affected.insert(id.clone(), parents);
        for child in store.set_members(&set_key(&id, CHILDREN)).await? {
            if !affected.contains_key(&child) {
                queue.push_back(child);
            }
        }
    }

    // Kahn's algorithm over edges inside the subtree.
    let mut pending: HashMap<&str, usize> = affected
        .iter()
        .map(|(id, parents)| {
            let inside = parents.iter().filter(|p| affected.contains_key(*p)).count();
            (id.as_str(), inside)
        })
        .collect();
    let mut children_of: HashMap<&str, Vec<&str>> = HashMap::new();
    for (id, parents) in &affected {
        for p in parents.iter().filter(|p| affected.contains_key(*p)) {
            children_of.entry(p.as_str()).or_default().push(id.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order: Vec<&str> = Vec::with_capacity(affected.len());
    while let Some(id) = ready.pop_first() {
        order.push(id);
        pending.remove(id);
        for child in children_of.get(id).into_iter().flatten() {
            if let Some(n) = pending.get_mut(child) {
                *n -= 1;
                if *n == 0 {
                    ready.insert(*child);
                }
            }
        }
    }
    if !pending.is_empty() {
        // Parent cycle: process the rest in id order with whatever is known.
        let mut rest: Vec<&str> = pending.keys().copied().collect();
        rest.sort_unstable();
        warn!(cycle = ?rest, "parent cycle while recomputing ancestors");
        order.extend(rest);
    }

    let mut memo: HashMap<String, Vec<String>> = HashMap::new();
    let mut changed = Vec::new();
    for id in order {
        let mut parents = Vec::new();
        for p in &affected[id] {
            let ancestors = match memo.get(p) {
                Some(a) => a.clone(),
                None => stored_ancestors(store, p).await?,
            };
            parents.push((p.clone(), ancestors));
        }
        let ancestors = combine_ancestors(id, &parents);
        let joined = ancestors.join(",");
        let previous = store.hash_get(id, ANCESTORS).await?;
        if previous.as_deref() != Some(joined.as_str()) {
            if id == ROOT_ID && joined.is_empty() && previous.is_none() {
                memo.insert(id.to_string(), ancestors);
                continue;
            }
            store.hash_set(id, ANCESTORS, &joined).await?;
            changed.push(id.to_string());
        }
        memo.insert(id.to_string(), ancestors);
    }

    debug!(roots = ?ids, visited = affected.len(), changed = changed.len(), "ancestors recomputed");
    Ok(changed)
}
