//! Field resolver: reads one field of one entity into a result object,
//! dispatching on the declared field type.
//!
//! Every resolver reports whether the field is complete. Incomplete fields
//! drive `$inherit` and `$default` fallback in the caller.

use crate::get::GetContext;
use crate::hierarchy::{parse_ancestors, ANCESTORS, CHILDREN};
use crate::result::{get_nested, is_empty_value, set_nested, take_nested};
use crate::error::EngineResult;
use arbor_model::{FieldSchema, FieldType};
use arbor_storage::{keys, set_key};
use arbor_types::{is_under, FieldPath};
use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Map, Number, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

const MAX_REF_DEPTH: u8 = 8;
const OBJECT_REF_SUFFIX: &str = "$ref";

/// Resolves `field` of entity `id` into `result` at the same path.
///
/// With `merge`, object properties already present in `result` are kept
/// and the field is complete only once every declared property is filled.
pub(crate) fn resolve<'a>(
    ctx: &'a mut GetContext,
    result: &'a mut Value,
    id: &'a str,
    field: &'a FieldPath,
    merge: bool,
) -> BoxFuture<'a, EngineResult<bool>> {
    async move {
        if field.is_empty() {
            return Ok(false);
        }
        let schema = Arc::clone(&ctx.schema);
        let Some(field_schema) = schema.field_schema(id, field) else {
            return Ok(false);
        };
        ctx.record_field(field.as_str(), id);

        match field_schema.field_type {
            FieldType::Id => {
                set_nested(result, field, Value::String(id.to_string()));
                Ok(true)
            }
            FieldType::Number | FieldType::Float | FieldType::Timestamp => {
                resolve_number(ctx, result, id, field, false).await
            }
            FieldType::Int => resolve_number(ctx, result, id, field, true).await,
            FieldType::Boolean => resolve_boolean(ctx, result, id, field).await,
            FieldType::Object => resolve_object(ctx, result, id, field, merge, field_schema).await,
            FieldType::Set | FieldType::References => resolve_set(ctx, result, id, field).await,
            FieldType::Json => resolve_json(ctx, result, id, field).await,
            FieldType::Array => resolve_array(ctx, result, id, field).await,
            FieldType::Text => resolve_text(ctx, result, id, field).await,
            FieldType::Geo => resolve_geo(ctx, result, id, field).await,
            FieldType::Ancestors => resolve_ancestors(ctx, result, id, field).await,
            FieldType::Descendants => resolve_descendants(ctx, result, id, field).await,
            FieldType::String
            | FieldType::Digest
            | FieldType::Reference
            | FieldType::Url
            | FieldType::Email
            | FieldType::Phone
            | FieldType::Type => resolve_string(ctx, result, id, field).await,
        }
    }
    .boxed()
}

enum Raw {
    Missing,
    /// The value was a reference and has been resolved (or not).
    Redirected(bool),
    Value(String),
}

async fn read_raw(
    ctx: &mut GetContext,
    result: &mut Value,
    id: &str,
    field: &FieldPath,
) -> EngineResult<Raw> {
    match ctx.store().hash_get(id, field.as_str()).await? {
        None => Ok(Raw::Missing),
        Some(v) => match v.strip_prefix(keys::REF_MARKER) {
            Some(target) => {
                let target = target.to_string();
                Ok(Raw::Redirected(
                    resolve_ref(ctx, result, id, field, &target).await?,
                ))
            }
            None => Ok(Raw::Value(v)),
        },
    }
}

/// Resolves `target` on the same entity and places the value at `field`.
async fn resolve_ref(
    ctx: &mut GetContext,
    result: &mut Value,
    id: &str,
    field: &FieldPath,
    target: &str,
) -> EngineResult<bool> {
    let target_path = FieldPath::parse(target);
    if target_path == *field || ctx.ref_depth >= MAX_REF_DEPTH {
        warn!(id, field = %field, target, "reference loop, giving up");
        return Ok(false);
    }
    if let Some(meta) = ctx.meta.as_mut() {
        meta.record_ref(target, field.as_str());
    }

    let mut intermediate = Value::Object(Map::new());
    ctx.ref_depth += 1;
    let found = resolve(ctx, &mut intermediate, id, &target_path, false).await;
    ctx.ref_depth -= 1;
    if !found? {
        return Ok(false);
    }
    match take_nested(&mut intermediate, &target_path) {
        Some(value) => {
            set_nested(result, field, value);
            Ok(true)
        }
        None => Ok(false),
    }
}

pub(crate) fn number_value(raw: &str, floor: bool) -> Option<Value> {
    if let Ok(i) = raw.parse::<i64>() {
        return Some(Value::from(i));
    }
    let f = raw.parse::<f64>().ok()?;
    if floor {
        return Some(Value::from(f.floor() as i64));
    }
    Number::from_f64(f).map(Value::Number)
}

async fn resolve_number(
    ctx: &mut GetContext,
    result: &mut Value,
    id: &str,
    field: &FieldPath,
    floor: bool,
) -> EngineResult<bool> {
    match read_raw(ctx, result, id, field).await? {
        Raw::Missing => Ok(false),
        Raw::Redirected(found) => Ok(found),
        Raw::Value(raw) => match number_value(&raw, floor) {
            Some(v) => {
                set_nested(result, field, v);
                Ok(true)
            }
            None => Ok(false),
        },
    }
}

async fn resolve_boolean(
    ctx: &mut GetContext,
    result: &mut Value,
    id: &str,
    field: &FieldPath,
) -> EngineResult<bool> {
    match read_raw(ctx, result, id, field).await? {
        Raw::Missing => Ok(false),
        Raw::Redirected(found) => Ok(found),
        Raw::Value(raw) => {
            set_nested(result, field, Value::Bool(raw == "true"));
            Ok(true)
        }
    }
}

async fn resolve_string(
    ctx: &mut GetContext,
    result: &mut Value,
    id: &str,
    field: &FieldPath,
) -> EngineResult<bool> {
    match read_raw(ctx, result, id, field).await? {
        Raw::Missing => Ok(false),
        Raw::Redirected(found) => Ok(found),
        Raw::Value(raw) if raw.is_empty() => Ok(false),
        Raw::Value(raw) => {
            set_nested(result, field, Value::String(raw));
            Ok(true)
        }
    }
}

async fn resolve_json(
    ctx: &mut GetContext,
    result: &mut Value,
    id: &str,
    field: &FieldPath,
) -> EngineResult<bool> {
    match read_raw(ctx, result, id, field).await? {
        Raw::Missing => Ok(false),
        Raw::Redirected(found) => Ok(found),
        Raw::Value(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(v) => {
                let complete = !is_empty_value(Some(&v));
                set_nested(result, field, v);
                Ok(complete)
            }
            Err(_) => {
                set_nested(result, field, Value::Array(Vec::new()));
                Ok(false)
            }
        },
    }
}

async fn resolve_array(
    ctx: &mut GetContext,
    result: &mut Value,
    id: &str,
    field: &FieldPath,
) -> EngineResult<bool> {
    let raw = ctx.store().hash_get(id, field.as_str()).await?;
    let items = raw
        .and_then(|r| serde_json::from_str::<Vec<Value>>(&r).ok())
        .unwrap_or_default();
    let complete = !items.is_empty();
    set_nested(result, field, Value::Array(items));
    Ok(complete)
}

async fn resolve_set(
    ctx: &mut GetContext,
    result: &mut Value,
    id: &str,
    field: &FieldPath,
) -> EngineResult<bool> {
    let members = ctx.store().set_members(&set_key(id, field.as_str())).await?;
    let complete = !members.is_empty();
    set_nested(
        result,
        field,
        Value::Array(members.into_iter().map(Value::String).collect()),
    );
    Ok(complete)
}

async fn resolve_geo(
    ctx: &mut GetContext,
    result: &mut Value,
    id: &str,
    field: &FieldPath,
) -> EngineResult<bool> {
    let Some(raw) = ctx.store().hash_get(id, field.as_str()).await? else {
        return Ok(false);
    };
    let mut parts = raw.split(',').map(|p| p.trim().parse::<f64>());
    match (parts.next(), parts.next()) {
        (Some(Ok(lon)), Some(Ok(lat))) => {
            set_nested(result, field, json!({ "lat": lat, "lon": lon }));
            Ok(true)
        }
        _ => Ok(false),
    }
}

async fn resolve_ancestors(
    ctx: &mut GetContext,
    result: &mut Value,
    id: &str,
    field: &FieldPath,
) -> EngineResult<bool> {
    let ancestors = ctx
        .store()
        .hash_get(id, ANCESTORS)
        .await?
        .map(|raw| parse_ancestors(&raw))
        .unwrap_or_default();
    set_nested(
        result,
        field,
        Value::Array(ancestors.into_iter().map(Value::String).collect()),
    );
    Ok(true)
}

/// Transitive closure over `children`, depth first, each id once.
pub(crate) async fn descendants_of(ctx: &GetContext, id: &str) -> EngineResult<Vec<String>> {
    let mut visited = BTreeSet::new();
    let mut out = Vec::new();
    let mut stack = vec![id.to_string()];
    visited.insert(id.to_string());
    while let Some(current) = stack.pop() {
        let children = ctx.store().set_members(&set_key(&current, CHILDREN)).await?;
        for child in children.into_iter().rev() {
            if visited.insert(child.clone()) {
                out.push(child.clone());
                stack.push(child);
            }
        }
    }
    Ok(out)
}

async fn resolve_descendants(
    ctx: &mut GetContext,
    result: &mut Value,
    id: &str,
    field: &FieldPath,
) -> EngineResult<bool> {
    let descendants = descendants_of(ctx, id).await?;
    set_nested(
        result,
        field,
        Value::Array(descendants.into_iter().map(Value::String).collect()),
    );
    Ok(true)
}

/// Language order for fallback: configured languages, then stored keys.
fn fallback_languages(languages: &[String], stored: &BTreeMap<String, String>) -> Vec<String> {
    let mut order: Vec<String> = languages.to_vec();
    for lang in stored.keys() {
        if !order.contains(lang) {
            order.push(lang.clone());
        }
    }
    order
}

async fn resolve_text(
    ctx: &mut GetContext,
    result: &mut Value,
    id: &str,
    field: &FieldPath,
) -> EngineResult<bool> {
    let prefix = format!("{}.", field.as_str());
    let stored: BTreeMap<String, String> = ctx
        .store()
        .hash_get_all(id)
        .await?
        .into_iter()
        .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|lang| (lang.to_string(), v)))
        .filter(|(lang, _)| !lang.contains('.'))
        .collect();

    if let Some(language) = ctx.language.clone() {
        if let Some(v) = stored.get(&language).filter(|v| !v.is_empty()) {
            set_nested(result, field, Value::String(v.clone()));
            return Ok(true);
        }
        for lang in fallback_languages(&ctx.schema.languages, &stored) {
            if let Some(v) = stored.get(&lang).filter(|v| !v.is_empty()) {
                set_nested(result, field, Value::String(v.clone()));
                return Ok(true);
            }
        }
        return Ok(false);
    }

    if stored.is_empty() {
        return Ok(false);
    }
    let complete = stored.values().any(|v| !v.is_empty());
    let map: Map<String, Value> = stored
        .into_iter()
        .map(|(lang, v)| (lang, Value::String(v)))
        .collect();
    set_nested(result, field, Value::Object(map));
    Ok(complete)
}

async fn resolve_object(
    ctx: &mut GetContext,
    result: &mut Value,
    id: &str,
    field: &FieldPath,
    merge: bool,
    field_schema: &FieldSchema,
) -> EngineResult<bool> {
    let keys: Vec<String> = ctx
        .store()
        .hash_keys(id)
        .await?
        .into_iter()
        .filter(|k| is_under(field.as_str(), k))
        .collect();

    let ref_key = field.join(OBJECT_REF_SUFFIX);
    if keys.iter().any(|k| k.as_str() == ref_key.as_str()) {
        if let Some(target) = ctx.store().hash_get(id, ref_key.as_str()).await? {
            return resolve_ref(ctx, result, id, field, &target).await;
        }
    }

    let mut own = Value::Object(Map::new());
    let mut complete = !keys.is_empty();
    for key in &keys {
        let path = FieldPath::parse(key);
        let target: &mut Value = if merge { &mut own } else { &mut *result };
        if !resolve(ctx, target, id, &path, false).await? {
            complete = false;
        }
    }

    if !merge {
        return Ok(complete);
    }

    // Fill only the properties that are still empty in the result.
    let mut props: BTreeSet<String> = keys
        .iter()
        .filter_map(|k| k[field.as_str().len() + 1..].split('.').next())
        .map(str::to_string)
        .collect();
    props.extend(field_schema.properties.keys().cloned());
    for prop in &props {
        let path = field.join(prop);
        if is_empty_value(get_nested(result, &path)) {
            if let Some(v) = take_nested(&mut own, &path) {
                set_nested(result, &path, v);
            }
        }
    }
    if field_schema.properties.is_empty() {
        return Ok(false);
    }
    Ok(field_schema
        .properties
        .keys()
        .all(|prop| !is_empty_value(get_nested(result, &field.join(prop)))))
}
