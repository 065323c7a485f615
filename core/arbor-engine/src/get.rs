//! Get orchestration: walks a get-specification and assembles the result.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::hierarchy::PARENTS;
use crate::inherit::inherit;
use crate::meta::GetMeta;
use crate::query;
use crate::resolve::resolve;
use crate::result::{get_nested, is_empty_value, set_nested, take_nested};
use arbor_model::{FieldSource, GetSpec, Schema, Selection};
use arbor_storage::{keys, set_key, SearchIndex, StoreAdapter};
use arbor_types::{FieldPath, ROOT_ID};
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::error;

/// Result key carrying the serialized [`GetMeta`] when `$includeMeta` is set.
pub const META_KEY: &str = "$meta";
const RAW_ANCESTORS_KEY: &str = "rawAncestors";

/// How field reads are recorded in the metadata.
#[derive(Debug, Clone)]
pub(crate) enum DepScope {
    /// Reads depend on the exact entity.
    Entity,
    /// Reads happen on members of a descendants traversal and are recorded
    /// against the member key instead of individual ids.
    Members { key: String, types: Vec<String> },
}

/// State shared by one get evaluation.
pub(crate) struct GetContext {
    store: Arc<dyn StoreAdapter>,
    search: Arc<dyn SearchIndex>,
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) schema: Arc<Schema>,
    pub(crate) language: Option<String>,
    pub(crate) meta: Option<GetMeta>,
    pub(crate) scope: DepScope,
    pub(crate) ref_depth: u8,
    /// Evaluation time, fixed for the whole get.
    pub(crate) now: i64,
    errors: BTreeMap<String, String>,
}

impl GetContext {
    pub(crate) fn new(
        store: Arc<dyn StoreAdapter>,
        search: Arc<dyn SearchIndex>,
        config: Arc<EngineConfig>,
        schema: Arc<Schema>,
        language: Option<String>,
        collect_meta: bool,
    ) -> Self {
        let now = config.clock.now_millis();
        Self {
            store,
            search,
            config,
            schema,
            language,
            meta: collect_meta.then(GetMeta::default),
            scope: DepScope::Entity,
            ref_depth: 0,
            now,
            errors: BTreeMap::new(),
        }
    }

    pub(crate) fn store(&self) -> &dyn StoreAdapter {
        self.store.as_ref()
    }

    pub(crate) fn search(&self) -> &dyn SearchIndex {
        self.search.as_ref()
    }

    /// Notes that the result depends on `field` of `id`.
    pub(crate) fn record_field(&mut self, field: &str, id: &str) {
        if field == "id" || field == "type" {
            return;
        }
        let Some(meta) = self.meta.as_mut() else {
            return;
        };
        match &self.scope {
            DepScope::Entity => meta.record_ids(field, [&id.to_string()]),
            DepScope::Members { key, types } => meta.record_member(field, key, types),
        }
    }

    /// Logs an error that degrades the field at `path`.
    pub(crate) fn report_error(&mut self, path: &FieldPath, err: &EngineError) {
        error!(path = %path, error = %err, "field left out of result");
        self.errors.insert(path.as_str().to_string(), err.to_string());
    }
}

/// Evaluates a top-level specification.
pub(crate) async fn execute_get(
    mut ctx: GetContext,
    spec: &GetSpec,
) -> EngineResult<(Value, GetMeta)> {
    let mut result = Value::Object(Map::new());

    let id = match (&spec.alias, &spec.id) {
        (Some(alias), _) => {
            ctx.record_field(alias, keys::ALIASES);
            match ctx.store().hash_get(keys::ALIASES, alias).await? {
                Some(id) => id,
                None => return Ok((result, ctx.meta.unwrap_or_default())),
            }
        }
        (None, Some(id)) => id.clone(),
        (None, None) => ROOT_ID.to_string(),
    };

    get_field(&mut ctx, spec, &mut result, &id, &FieldPath::root()).await?;

    if spec.raw_ancestors {
        let raw = raw_ancestors(&mut ctx, &id).await?;
        set_nested(
            &mut result,
            &FieldPath::parse(RAW_ANCESTORS_KEY),
            Value::Array(raw.into_iter().map(Value::String).collect()),
        );
    }

    let mut meta = ctx.meta.take().unwrap_or_default();
    meta.errors.append(&mut ctx.errors);
    if spec.include_meta {
        set_nested(
            &mut result,
            &FieldPath::parse(META_KEY),
            serde_json::to_value(&meta)?,
        );
    }
    Ok((result, meta))
}

/// Every entity reachable over `parents`, breadth first.
async fn raw_ancestors(ctx: &mut GetContext, id: &str) -> EngineResult<Vec<String>> {
    let mut seen = BTreeSet::from([id.to_string()]);
    let mut out = Vec::new();
    let mut queue = VecDeque::from([id.to_string()]);
    while let Some(current) = queue.pop_front() {
        ctx.record_field(PARENTS, &current);
        for parent in ctx.store().set_members(&set_key(&current, PARENTS)).await? {
            if seen.insert(parent.clone()) {
                out.push(parent.clone());
                queue.push_back(parent);
            }
        }
    }
    Ok(out)
}

/// Applies `spec` to `field` of entity `id`, writing into `result` at the
/// same path. Returns whether the field came out complete.
pub(crate) fn get_field<'a>(
    ctx: &'a mut GetContext,
    spec: &'a GetSpec,
    result: &'a mut Value,
    id: &'a str,
    field: &'a FieldPath,
) -> BoxFuture<'a, EngineResult<bool>> {
    async move {
        if let Some(value) = &spec.value {
            set_nested(result, field, value.clone());
            return Ok(true);
        }

        if let (Some(other), false) = (&spec.id, field.is_empty()) {
            let nested = GetSpec {
                id: None,
                ..spec.clone()
            };
            let mut intermediate = Value::Object(Map::new());
            get_field(ctx, &nested, &mut intermediate, other, &FieldPath::root()).await?;
            set_nested(result, field, intermediate);
            return Ok(true);
        }

        if spec.list.is_some() || spec.find.is_some() || spec.query_error.is_some() {
            match query::run(ctx, spec, id, field).await {
                Ok(value) => set_nested(result, field, value),
                Err(err) if err.is_query_error() => ctx.report_error(field, &err),
                Err(err) => return Err(err),
            }
            return Ok(true);
        }

        let mut complete = true;
        let mut has_keys = false;
        if let Some(source) = &spec.field {
            if with_field(ctx, result, id, field, source).await? {
                return Ok(true);
            }
            complete = false;
        } else {
            for (key, selection) in expand_all(ctx, spec, id, field).iter() {
                has_keys = true;
                let path = field.join(key);
                let found = match selection {
                    Selection::Include => resolve(ctx, result, id, &path, false).await?,
                    Selection::Exclude => true,
                    Selection::Nested(nested) => {
                        get_field(ctx, nested, result, id, &path).await?
                    }
                    Selection::Array(items) => get_array(ctx, items, result, id, &path).await?,
                };
                if !found {
                    complete = false;
                }
            }
        }

        if let Some(mode) = &spec.inherit {
            if !complete || !has_keys {
                if spec.field.is_none() && !has_keys {
                    complete = resolve(ctx, result, id, field, mode.merge()).await?;
                }
                if !complete {
                    complete =
                        inherit(ctx, spec, mode, result, id, field, spec.field.as_ref()).await?;
                }
            }
        }

        if let Some(default) = &spec.default {
            let present = if spec.field.is_some() || has_keys || spec.inherit.is_some() {
                !is_empty_value(get_nested(result, field))
            } else {
                resolve(ctx, result, id, field, false).await?
            };
            if !present {
                set_nested(result, field, default.clone());
            }
        }

        Ok(complete)
    }
    .boxed()
}

/// The explicit selections plus, with `$all`, every schema field not
/// mentioned explicitly.
fn expand_all<'s>(
    ctx: &GetContext,
    spec: &'s GetSpec,
    id: &str,
    field: &FieldPath,
) -> Cow<'s, [(String, Selection)]> {
    if !spec.all {
        return Cow::Borrowed(&spec.selections);
    }
    let mut selections = spec.selections.clone();
    for name in ctx.schema.all_fields(id, field) {
        if spec.selection(&name).is_none() {
            selections.push((name, Selection::Include));
        }
    }
    Cow::Owned(selections)
}

/// Resolves the first complete `$field` candidate of `id` and places it at
/// `field`.
pub(crate) async fn with_field(
    ctx: &mut GetContext,
    result: &mut Value,
    id: &str,
    field: &FieldPath,
    source: &FieldSource,
) -> EngineResult<bool> {
    for raw in &source.paths {
        let path = FieldPath::parse(&interpolate(ctx, id, raw).await?);
        if path.is_empty() {
            continue;
        }
        let mut intermediate = Value::Object(Map::new());
        let found = match &source.value {
            Some(nested) => get_field(ctx, nested, &mut intermediate, id, &path).await?,
            None => resolve(ctx, &mut intermediate, id, &path, false).await?,
        };
        if !found {
            continue;
        }
        if let Some(value) = take_nested(&mut intermediate, &path) {
            set_nested(result, field, value);
            return Ok(true);
        }
    }
    Ok(false)
}

/// Substitutes `${name}` with the stored value of `name` on `id`.
async fn interpolate(ctx: &mut GetContext, id: &str, raw: &str) -> EngineResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = &rest[start + 2..start + 2 + len];
        ctx.record_field(name, id);
        if let Some(value) = ctx.store().hash_get(id, name).await? {
            out.push_str(&value);
        }
        rest = &rest[start + 3 + len..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Evaluates each item specification at `field` and collects the values.
async fn get_array(
    ctx: &mut GetContext,
    items: &[GetSpec],
    result: &mut Value,
    id: &str,
    field: &FieldPath,
) -> EngineResult<bool> {
    let mut values = Vec::with_capacity(items.len());
    let mut complete = true;
    for item in items {
        let mut intermediate = Value::Object(Map::new());
        if !get_field(ctx, item, &mut intermediate, id, field).await? {
            complete = false;
        }
        values.push(
            take_nested(&mut intermediate, field).unwrap_or_else(|| Value::Object(Map::new())),
        );
    }
    set_nested(result, field, Value::Array(values));
    Ok(complete)
}
