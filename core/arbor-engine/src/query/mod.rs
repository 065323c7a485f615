//! `$list` / `$find` evaluation.
//!
//! A query starts at the entity that holds the field, traverses an edge
//! (`children`, `descendants`, `ancestors`, any references field, or an
//! explicit id list), filters the candidates through the search index and
//! resolves each match with the per-item part of the specification.
//!
//! - `ast`: `$filter` → boolean tree
//! - `compile`: tree → search predicate
//! - `execute`: traversal, search, sort/offset/limit
//! - `footprint`: what the query depends on, for subscriptions

mod ast;
mod compile;
mod execute;
mod footprint;

use crate::error::{EngineError, EngineResult};
use crate::get::{get_field, DepScope, GetContext};
use arbor_model::{FindSpec, GetSpec};
use arbor_types::FieldPath;
use execute::Matches;
use serde_json::{Map, Value};
use std::mem;

/// Evaluates the `$list` or `$find` of `spec` placed at `field` of `id`.
/// A list yields an array, a find the first match or `{}`.
pub(crate) async fn run(
    ctx: &mut GetContext,
    spec: &GetSpec,
    id: &str,
    field: &FieldPath,
) -> EngineResult<Value> {
    if let Some(err) = &spec.query_error {
        return Err(EngineError::InvalidQuery(err.clone()));
    }
    if field.is_empty() {
        return Err(EngineError::InvalidQuery(
            "$list and $find must be placed under a field".to_string(),
        ));
    }
    if spec.list.is_some() && spec.find.is_some() {
        return Err(EngineError::InvalidQuery(
            "If using $list put $find in list".to_string(),
        ));
    }

    let enclosing = match &spec.field {
        Some(source) => source.paths.first().cloned().unwrap_or_else(|| field.as_str().to_string()),
        None => field.as_str().to_string(),
    };
    let bare = FindSpec {
        traverse: None,
        filters: Vec::new(),
        find: None,
    };
    let (find, list) = match (&spec.list, &spec.find) {
        (Some(list), _) => (list.find.as_ref().unwrap_or(&bare), Some(list)),
        (None, Some(find)) => (find, None),
        (None, None) => return Ok(Value::Null),
    };

    let origins = vec![id.to_string()];
    let matches = execute::find_ids(ctx, find, origins, &enclosing, list, field, false).await?;

    let item = spec.item_spec();
    let limit = if list.is_some() { usize::MAX } else { 1 };
    let mut items = Vec::new();
    for id in matches.ids.iter().take(limit) {
        items.push(resolve_item(ctx, &item, id, &matches).await?);
    }

    if list.is_some() {
        Ok(Value::Array(items))
    } else {
        Ok(items
            .into_iter()
            .next()
            .unwrap_or_else(|| Value::Object(Map::new())))
    }
}

/// Resolves one match, recording its reads against the member set when the
/// match came from a descendants traversal.
async fn resolve_item(
    ctx: &mut GetContext,
    item: &GetSpec,
    id: &str,
    matches: &Matches,
) -> EngineResult<Value> {
    let scope = match &matches.member_key {
        Some(key) => DepScope::Members {
            key: key.clone(),
            types: matches.types.clone(),
        },
        None => DepScope::Entity,
    };
    let previous = mem::replace(&mut ctx.scope, scope);
    let mut value = Value::Object(Map::new());
    let resolved = get_field(ctx, item, &mut value, id, &FieldPath::root()).await;
    ctx.scope = previous;
    resolved?;
    Ok(value)
}
