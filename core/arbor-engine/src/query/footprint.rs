//! Query dependencies: which writes can change a `$list`/`$find` result,
//! and when a now-relative filter next flips.

use super::ast::{FilterLeaf, FilterNode};
use super::compile::Compiler;
use crate::error::EngineResult;
use crate::get::GetContext;
use crate::hierarchy::ANCESTORS;
use crate::meta::QueryFootprint;
use crate::schema_store::sha256_hex;
use arbor_model::{Operator, Schema, Sort, Traverse};
use arbor_storage::{Bound, Predicate, SearchArgs, SearchQuery, SearchSort, SortDirection};
use std::collections::BTreeSet;
use tracing::trace;

const MEMBER_KEY_LEN: usize = 10;

/// Stable key of the member set "descendants of `origins`".
pub(crate) fn member_key(origins: &[String]) -> String {
    let mut sorted = origins.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let mut key = sha256_hex(sorted.join(",").as_bytes());
    key.truncate(MEMBER_KEY_LEN);
    key
}

/// Values of equality leaves on `field`.
pub(crate) fn leaf_values(node: Option<&FilterNode>, field: &str) -> Vec<String> {
    let mut out = Vec::new();
    for leaf in node.map(FilterNode::leaves).unwrap_or_default() {
        if leaf.field == field && leaf.operator == Operator::Eq {
            for v in leaf.values() {
                if !out.contains(&v) {
                    out.push(v);
                }
            }
        }
    }
    out
}

pub(crate) struct Footprint<'a> {
    pub path: &'a str,
    pub traverse: &'a Traverse,
    pub origins: &'a [String],
    pub candidates: &'a [String],
    pub node: Option<&'a FilterNode>,
    pub sort: &'a [Sort],
    pub member_key: Option<&'a str>,
    pub queries: Vec<String>,
    pub next_refresh: Option<i64>,
}

impl Footprint<'_> {
    /// Records the footprint and its field dependencies on the context.
    pub(crate) fn record(self, ctx: &mut GetContext) {
        let Some(meta) = ctx.meta.as_mut() else {
            return;
        };

        let leaves: Vec<&FilterLeaf> = self.node.map(FilterNode::leaves).unwrap_or_default();
        let mut fields: BTreeSet<String> = leaves
            .iter()
            .filter(|l| !matches!(l.field.as_str(), "id" | "type" | "ancestors"))
            .map(|l| l.field.clone())
            .collect();
        fields.extend(self.sort.iter().map(|s| s.field.clone()));

        let ids: BTreeSet<String> = leaf_values(self.node, "id").into_iter().collect();
        let types = leaf_values(self.node, "type");
        let member: Vec<Vec<String>> = leaves
            .iter()
            .filter(|l| l.field == ANCESTORS)
            .map(|l| l.values())
            .collect();

        match self.member_key {
            Some(key) => {
                meta.contains
                    .insert(key.to_string(), self.origins.to_vec());
                for field in fields.iter().map(String::as_str).chain([ANCESTORS]) {
                    meta.record_member(field, key, &types);
                }
            }
            None => {
                for field in &fields {
                    meta.record_ids(field, self.candidates);
                }
            }
        }
        if let Some(at) = self.next_refresh {
            meta.record_refresh(at);
        }

        trace!(path = self.path, queries = ?self.queries, "query footprint");
        meta.queries.push(QueryFootprint {
            path: self.path.to_string(),
            traverse: self.traverse.field().map(str::to_string),
            origin_ids: self.origins.to_vec(),
            ids,
            fields,
            member,
            types,
            member_key: self.member_key.map(str::to_string),
            next_refresh: self.next_refresh,
            queries: self.queries,
        });
    }
}

/// Earliest time after now at which a now-relative leaf of `node` changes
/// its outcome for some entity in `scope`.
///
/// Probes `scope AND (f1 > now+o1 OR ...) AND rest` sorted ascending on the
/// first timed field; the crossing of a match is its value minus the offset,
/// one millisecond later for `<`.
pub(crate) async fn next_crossing(
    ctx: &GetContext,
    schema: &Schema,
    node: &FilterNode,
    scope: Predicate,
) -> EngineResult<Option<i64>> {
    let timed: Vec<(&FilterLeaf, i64)> = node
        .leaves()
        .into_iter()
        .filter_map(|l| l.now.map(|n| (l, n.offset_millis())))
        .collect();
    let Some((first, _)) = timed.first() else {
        return Ok(None);
    };

    let probes = timed
        .iter()
        .map(|(leaf, offset)| Predicate::Numeric {
            field: leaf.field.clone(),
            min: Bound::Exclusive((ctx.now + offset) as f64),
            max: Bound::Unbounded,
        })
        .collect();
    let rest = node
        .without_time()
        .map(|n| Compiler::new(schema, ctx.now).compile(&n))
        .transpose()?
        .unwrap_or(Predicate::All);
    let query = SearchQuery::new(Predicate::and(vec![scope, Predicate::or(probes), rest]));
    let args = SearchArgs {
        sort: Some(SearchSort {
            field: first.field.clone(),
            direction: SortDirection::Asc,
        }),
        offset: 0,
        limit: Some(ctx.config.refresh_probe_limit.max(1)),
    };
    let ids = ctx
        .search()
        .search(&ctx.config.search_index, &query, &args)
        .await?;

    let mut next: Option<i64> = None;
    for id in &ids {
        for (leaf, offset) in &timed {
            let Some(raw) = ctx.store().hash_get(id, &leaf.field).await? else {
                continue;
            };
            let Ok(value) = raw.parse::<f64>() else {
                continue;
            };
            // `<` flips one millisecond after equality, `>` at equality.
            let at = match leaf.operator {
                Operator::Lt => value as i64 - offset + 1,
                _ => value as i64 - offset,
            };
            if at > ctx.now {
                next = Some(next.map_or(at, |n| n.min(at)));
            }
        }
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_key_ignores_origin_order() {
        let a = member_key(&["le1".to_string(), "ma2".to_string()]);
        let b = member_key(&["ma2".to_string(), "le1".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), MEMBER_KEY_LEN);
        assert_ne!(a, member_key(&["le1".to_string()]));
    }
}
