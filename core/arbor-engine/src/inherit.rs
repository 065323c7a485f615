//! Ancestor-walk resolution for `$inherit`.
//!
//! Candidates are ordered by descending depth, where depth is the longest
//! parent path to root. Equal depths are ordered by id. The first candidate
//! that satisfies the lookup wins.

use crate::error::EngineResult;
use crate::get::{get_field, with_field, GetContext};
use crate::hierarchy::{ANCESTORS, PARENTS};
use crate::resolve::resolve;
use crate::result::{get_nested, is_empty_value, set_nested};
use arbor_model::{FieldSource, GetSpec, Inherit};
use arbor_storage::set_key;
use arbor_types::FieldPath;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Every ancestor of `id`, nearest (deepest) first.
pub(crate) async fn ancestors_by_depth(ctx: &GetContext, id: &str) -> EngineResult<Vec<String>> {
    let mut parents_of: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut queue = VecDeque::from([id.to_string()]);
    while let Some(current) = queue.pop_front() {
        if parents_of.contains_key(&current) {
            continue;
        }
        let parents = ctx.store().set_members(&set_key(&current, PARENTS)).await?;
        queue.extend(parents.iter().cloned());
        parents_of.insert(current, parents);
    }

    let mut depths: HashMap<&str, usize> = HashMap::new();
    for node in parents_of.keys() {
        depth(node, &parents_of, &mut depths, &mut Vec::new());
    }

    let mut ancestors: Vec<(&str, usize)> = depths
        .into_iter()
        .filter(|(node, _)| *node != id)
        .collect();
    ancestors.sort_by(|(a, da), (b, db)| db.cmp(da).then_with(|| a.cmp(b)));
    Ok(ancestors.into_iter().map(|(a, _)| a.to_string()).collect())
}

fn depth<'a>(
    node: &'a str,
    parents_of: &'a BTreeMap<String, Vec<String>>,
    memo: &mut HashMap<&'a str, usize>,
    stack: &mut Vec<&'a str>,
) -> usize {
    if let Some(d) = memo.get(node) {
        return *d;
    }
    if stack.contains(&node) {
        return 0;
    }
    stack.push(node);
    let d = parents_of
        .get(node)
        .into_iter()
        .flatten()
        .map(|p| depth(p, parents_of, memo, stack) + 1)
        .max()
        .unwrap_or(0);
    stack.pop();
    memo.insert(node, d);
    d
}

async fn candidates(
    ctx: &mut GetContext,
    id: &str,
    mode: &Inherit,
) -> EngineResult<Vec<String>> {
    let all = ancestors_by_depth(ctx, id).await?;
    match mode {
        Inherit::Ancestors => Ok(all),
        Inherit::Type { types, .. } | Inherit::Item { types, .. } => {
            if types.is_empty() {
                return Ok(all);
            }
            let schema = ctx.schema.clone();
            Ok(all
                .into_iter()
                .filter(|a| {
                    schema
                        .type_name_for_id(a)
                        .is_some_and(|t| types.iter().any(|wanted| wanted == t))
                })
                .collect())
        }
        Inherit::Name { names, .. } => {
            let mut out = Vec::new();
            for a in all {
                ctx.record_field("name", &a);
                let name = ctx.store().hash_get(&a, "name").await?;
                if name.is_some_and(|n| names.contains(&n)) {
                    out.push(a);
                }
            }
            Ok(out)
        }
    }
}

/// Fills `field` of `result` from the ancestors of `id`.
pub(crate) async fn inherit(
    ctx: &mut GetContext,
    spec: &GetSpec,
    mode: &Inherit,
    result: &mut Value,
    id: &str,
    field: &FieldPath,
    alias: Option<&FieldSource>,
) -> EngineResult<bool> {
    ctx.record_field(ANCESTORS, id);
    let candidates = candidates(ctx, id, mode).await?;

    if let Inherit::Item { required, .. } = mode {
        return inherit_item(ctx, spec, required, result, field, &candidates).await;
    }

    let merge = mode.merge();
    for ancestor in &candidates {
        let complete = match alias {
            Some(source) => with_field(ctx, result, ancestor, field, source).await?,
            None => resolve(ctx, result, ancestor, field, merge).await?,
        };
        if complete {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Re-runs the nested specification at the nearest ancestor of the wanted
/// type that has every required field, or at the last candidate.
async fn inherit_item(
    ctx: &mut GetContext,
    spec: &GetSpec,
    required: &[String],
    result: &mut Value,
    field: &FieldPath,
    candidates: &[String],
) -> EngineResult<bool> {
    if candidates.is_empty() {
        set_nested(result, field, Value::Object(Map::new()));
        return Ok(false);
    }

    let item_spec = GetSpec {
        inherit: None,
        ..spec.clone()
    };
    for (i, ancestor) in candidates.iter().enumerate() {
        let mut intermediate = Value::Object(Map::new());
        let mut complete =
            get_field(ctx, &item_spec, &mut intermediate, ancestor, &FieldPath::root()).await?;
        if !required.is_empty() {
            complete = required
                .iter()
                .all(|r| !is_empty_value(get_nested(&intermediate, &FieldPath::parse(r))));
        }
        if complete || i + 1 == candidates.len() {
            set_nested(result, field, intermediate);
            return Ok(complete);
        }
    }
    Ok(false)
}
