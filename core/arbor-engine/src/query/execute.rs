//! Traversal, search and list directives.

use super::ast::FilterNode;
use super::compile::Compiler;
use super::footprint::{leaf_values, member_key, next_crossing, Footprint};
use crate::error::EngineResult;
use crate::get::GetContext;
use crate::hierarchy::{stored_ancestors, ANCESTORS};
use crate::resolve::descendants_of;
use arbor_model::{FindSpec, ListSpec, Sort, SortOrder, Traverse};
use arbor_storage::{set_key, Predicate, SearchArgs, SearchQuery, SearchSort, SortDirection};
use arbor_types::FieldPath;
use futures::future::{BoxFuture, FutureExt};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

const DESCENDANTS: &str = "descendants";

/// Ids matched by a find, in result order.
#[derive(Debug, Default)]
pub(crate) struct Matches {
    pub ids: Vec<String>,
    /// Member key when the last level traversed descendants.
    pub member_key: Option<String>,
    /// Type filter of the last level.
    pub types: Vec<String>,
}

/// Runs `find` from `origins`. A nested find runs on the ids matched at
/// this level; list directives apply to the innermost level.
pub(crate) fn find_ids<'a>(
    ctx: &'a mut GetContext,
    find: &'a FindSpec,
    origins: Vec<String>,
    enclosing: &'a str,
    list: Option<&'a ListSpec>,
    path: &'a FieldPath,
    nested: bool,
) -> BoxFuture<'a, EngineResult<Matches>> {
    async move {
        match &find.find {
            Some(inner) => {
                let outer = find_level(ctx, find, origins, enclosing, None, path, nested).await?;
                if outer.ids.is_empty() {
                    return Ok(Matches::default());
                }
                find_ids(ctx, inner, outer.ids, enclosing, list, path, true).await
            }
            None => find_level(ctx, find, origins, enclosing, list, path, nested).await,
        }
    }
    .boxed()
}

async fn find_level(
    ctx: &mut GetContext,
    find: &FindSpec,
    origins: Vec<String>,
    enclosing: &str,
    list: Option<&ListSpec>,
    path: &FieldPath,
    nested: bool,
) -> EngineResult<Matches> {
    let traverse = match &find.traverse {
        Some(t) => t.clone(),
        None if nested => Traverse::Field(DESCENDANTS.to_string()),
        None => Traverse::Field(enclosing.to_string()),
    };
    let node = FilterNode::from_filters(&find.filters)?;
    let schema = Arc::clone(&ctx.schema);
    let compiler = Compiler::new(&schema, ctx.now);
    let sort: &[Sort] = list.map(|l| l.sort.as_slice()).unwrap_or_default();

    let key = (traverse.field() == Some(DESCENDANTS)).then(|| member_key(&origins));
    let candidates = match &traverse {
        Traverse::Field(edge) if edge == DESCENDANTS => {
            if node.is_some() {
                Vec::new()
            } else {
                let mut seen = BTreeSet::new();
                let mut out = Vec::new();
                for origin in &origins {
                    for d in descendants_of(ctx, origin).await? {
                        if seen.insert(d.clone()) {
                            out.push(d);
                        }
                    }
                }
                out
            }
        }
        Traverse::Field(edge) => traverse_edge(ctx, edge, &origins).await?,
        Traverse::Ids(ids) => ids.clone(),
    };
    let scope = match &key {
        Some(_) => Predicate::tag(ANCESTORS, origins.clone()),
        None => Predicate::tag("id", candidates.clone()),
    };

    let mut queries = Vec::new();
    let mut next_refresh = None;
    let ids = match &node {
        None => apply_list(ctx, candidates.clone(), list).await?,
        Some(_) if key.is_none() && candidates.is_empty() => Vec::new(),
        Some(node) => {
            let predicates = node
                .clone()
                .disjuncts()
                .iter()
                .map(|d| Ok(Predicate::and(vec![scope.clone(), compiler.compile(d)?])))
                .collect::<EngineResult<Vec<_>>>()?;
            let index = ctx.config.search_index.clone();
            let ids = if predicates.len() == 1 && sort.len() <= 1 {
                let query = SearchQuery::new(predicates[0].clone());
                queries.push(query.text.clone());
                let args = search_args(list);
                ctx.search().search(&index, &query, &args).await?
            } else {
                let mut seen = BTreeSet::new();
                let mut union = Vec::new();
                for predicate in &predicates {
                    let query = SearchQuery::new(predicate.clone());
                    queries.push(query.text.clone());
                    for id in ctx.search().search(&index, &query, &SearchArgs::default()).await? {
                        if seen.insert(id.clone()) {
                            union.push(id);
                        }
                    }
                }
                apply_list(ctx, union, list).await?
            };
            next_refresh = next_crossing(ctx, &schema, node, scope.clone()).await?;
            ids
        }
    };
    debug!(path = %path, traverse = ?traverse, matched = ids.len(), "query executed");

    let types = leaf_values(node.as_ref(), "type");
    Footprint {
        path: path.as_str(),
        traverse: &traverse,
        origins: &origins,
        candidates: &candidates,
        node: node.as_ref(),
        sort,
        member_key: key.as_deref(),
        queries,
        next_refresh,
    }
    .record(ctx);

    Ok(Matches {
        ids,
        member_key: key,
        types,
    })
}

/// Follows `edge` from every origin, keeping first occurrences.
async fn traverse_edge(
    ctx: &mut GetContext,
    edge: &str,
    origins: &[String],
) -> EngineResult<Vec<String>> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for origin in origins {
        ctx.record_field(edge, origin);
        let next = if edge == ANCESTORS {
            stored_ancestors(ctx.store(), origin).await?
        } else {
            ctx.store().set_members(&set_key(origin, edge)).await?
        };
        for id in next {
            if seen.insert(id.clone()) {
                out.push(id);
            }
        }
    }
    Ok(out)
}

fn search_args(list: Option<&ListSpec>) -> SearchArgs {
    let Some(list) = list else {
        return SearchArgs::default();
    };
    SearchArgs {
        sort: list.sort.first().map(|s| SearchSort {
            field: s.field.clone(),
            direction: match s.order {
                SortOrder::Asc => SortDirection::Asc,
                SortOrder::Desc => SortDirection::Desc,
            },
        }),
        offset: list.offset,
        limit: list.limit,
    }
}

/// Sorts, skips and truncates in memory.
async fn apply_list(
    ctx: &mut GetContext,
    mut ids: Vec<String>,
    list: Option<&ListSpec>,
) -> EngineResult<Vec<String>> {
    let Some(list) = list else {
        return Ok(ids);
    };
    if !list.sort.is_empty() {
        let mut keyed = Vec::with_capacity(ids.len());
        for id in ids {
            let mut values = Vec::with_capacity(list.sort.len());
            for s in &list.sort {
                values.push(ctx.store().hash_get(&id, &s.field).await?);
            }
            keyed.push((id, values));
        }
        keyed.sort_by(|(_, a), (_, b)| {
            list.sort
                .iter()
                .zip(a.iter().zip(b.iter()))
                .map(|(s, (x, y))| compare_sort_values(x.as_deref(), y.as_deref(), s.order))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        ids = keyed.into_iter().map(|(id, _)| id).collect();
    }
    Ok(ids
        .into_iter()
        .skip(list.offset)
        .take(list.limit.unwrap_or(usize::MAX))
        .collect())
}

/// Numeric when both parse, lexicographic otherwise. Missing values sort
/// last in either direction.
fn compare_sort_values(a: Option<&str>, b: Option<&str>, order: SortOrder) -> Ordering {
    let (a, b) = match (a, b) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return Ordering::Greater,
        (Some(_), None) => return Ordering::Less,
        (Some(a), Some(b)) => (a, b),
    };
    let ordering = match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    };
    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sort_values_go_last() {
        assert_eq!(
            compare_sort_values(None, Some("1"), SortOrder::Desc),
            Ordering::Greater
        );
        assert_eq!(
            compare_sort_values(Some("9"), Some("10"), SortOrder::Asc),
            Ordering::Less
        );
        assert_eq!(
            compare_sort_values(Some("9"), Some("10"), SortOrder::Desc),
            Ordering::Greater
        );
    }
}
