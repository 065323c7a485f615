//! Evaluation metadata: what a get read, so that subscriptions can tell
//! which writes may change its result.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Dependencies collected while evaluating one get.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMeta {
    /// Field name → the entities whose writes to it matter.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDependency>,
    /// Member key → ids whose descendants are members of that key.
    #[serde(default)]
    pub contains: BTreeMap<String, Vec<String>>,
    /// Earliest time at which a now-relative filter changes its outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_at: Option<i64>,
    /// Reference target field → alias paths resolved through it.
    #[serde(default)]
    pub refs: BTreeMap<String, Vec<String>>,
    /// One footprint per executed `$list`/`$find`.
    #[serde(default)]
    pub queries: Vec<QueryFootprint>,
    /// Result path → specification error that degraded it.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

/// Who depends on one field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDependency {
    /// Exact entity ids.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ids: BTreeSet<String>,
    /// Member keys: any member entity matters.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub any: BTreeSet<String>,
    /// Type name → member keys: only members of that type matter.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub types: BTreeMap<String, BTreeSet<String>>,
}

impl FieldDependency {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.any.is_empty() && self.types.is_empty()
    }

    /// Member keys relevant to an entity of type `type_name`.
    pub fn member_keys<'a>(&'a self, type_name: Option<&str>) -> impl Iterator<Item = &'a String> {
        let typed = type_name
            .and_then(|t| self.types.get(t))
            .into_iter()
            .flatten();
        self.any.iter().chain(typed)
    }
}

/// What one `$list`/`$find` depends on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFootprint {
    /// Result path of the query inside the get.
    pub path: String,
    /// Traversed edge, absent for explicit id lists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traverse: Option<String>,
    /// Ids the traversal started from.
    pub origin_ids: Vec<String>,
    /// Ids named by `id` filters.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ids: BTreeSet<String>,
    /// Fields read by filters and sorts.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub fields: BTreeSet<String>,
    /// Ancestor-membership filters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub member: Vec<Vec<String>>,
    /// Type filter.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    /// Key of the member set used for descendants traversal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_key: Option<String>,
    /// Next forced re-evaluation time for now-relative filters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_refresh: Option<i64>,
    /// Compiled filter, as sent to the search index.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<String>,
}

impl GetMeta {
    pub(crate) fn record_ids<'a>(&mut self, field: &str, ids: impl IntoIterator<Item = &'a String>) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .ids
            .extend(ids.into_iter().cloned());
    }

    pub(crate) fn record_member(&mut self, field: &str, member_key: &str, types: &[String]) {
        let dep = self.fields.entry(field.to_string()).or_default();
        if types.is_empty() {
            dep.any.insert(member_key.to_string());
        } else {
            for t in types {
                dep.types
                    .entry(t.clone())
                    .or_default()
                    .insert(member_key.to_string());
            }
        }
    }

    pub(crate) fn record_ref(&mut self, target: &str, alias: &str) {
        let aliases = self.refs.entry(target.to_string()).or_default();
        if !aliases.iter().any(|a| a == alias) {
            aliases.push(alias.to_string());
        }
    }

    pub(crate) fn record_refresh(&mut self, at: i64) {
        self.refresh_at = Some(self.refresh_at.map_or(at, |current| current.min(at)));
    }

    /// Every entity id named explicitly anywhere in the dependencies.
    pub fn all_ids(&self) -> BTreeSet<&str> {
        self.fields
            .values()
            .flat_map(|d| d.ids.iter().map(String::as_str))
            .collect()
    }
}
