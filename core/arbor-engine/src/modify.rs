//! Writes: entity creation, typed field writes, hierarchy edges and
//! deletion.
//!
//! A [`Batch`] applies a sequence of [`ModifyOp`]s, remembers which
//! entities had an edge change, and on commit recomputes their ancestor
//! lists and publishes one change event per written field.

use crate::error::{EngineError, EngineResult};
use crate::hierarchy::{recompute_ancestors, ANCESTORS, CHILDREN, PARENTS};
use crate::schema_store::sha256_hex;
use arbor_model::{FieldSchema, FieldType, Schema, ROOT_TYPE};
use arbor_storage::{keys, set_key, StoreAdapter};
use arbor_types::{is_under, ChangeEvent, EntityId, FieldPath, EVENTS_CHANNEL, ROOT_ID};
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::mem;
use tracing::debug;

const ALIASES_FIELD: &str = "aliases";

/// One write in a `modify` batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ModifyOp {
    /// Create or update the entity described by the payload.
    Update(Value),
    /// Delete an entity. With `hierarchy`, children left without a parent
    /// are deleted too; otherwise they are attached to root.
    Delete { id: String, hierarchy: bool },
}

fn invalid(reason: impl Into<String>) -> EngineError {
    EngineError::InvalidPayload(reason.into())
}

/// Ids named by a set payload entry list.
fn string_list(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.clone()],
    }
}

pub(crate) struct Batch<'a> {
    store: &'a dyn StoreAdapter,
    schema: &'a Schema,
    now: i64,
    /// `$language` of the payload being applied.
    language: Option<String>,
    events: Vec<ChangeEvent>,
    touched: BTreeSet<String>,
    deleted: BTreeSet<String>,
}

impl<'a> Batch<'a> {
    pub(crate) fn new(store: &'a dyn StoreAdapter, schema: &'a Schema, now: i64) -> Self {
        Self {
            store,
            schema,
            now,
            language: None,
            events: Vec::new(),
            touched: BTreeSet::new(),
            deleted: BTreeSet::new(),
        }
    }

    /// Applies one operation and returns the id it affected.
    pub(crate) async fn apply(&mut self, op: &ModifyOp) -> EngineResult<String> {
        match op {
            ModifyOp::Update(payload) => self.set(payload, true).await,
            ModifyOp::Delete { id, hierarchy } => {
                self.delete(id, *hierarchy).await?;
                Ok(id.clone())
            }
        }
    }

    fn emit(&mut self, event: ChangeEvent) {
        if !self.events.contains(&event) {
            self.events.push(event);
        }
    }

    /// Creates or updates one entity. New entities without `parents` are
    /// attached to root when `attach_to_root` is set.
    fn set<'b>(
        &'b mut self,
        payload: &'b Value,
        attach_to_root: bool,
    ) -> BoxFuture<'b, EngineResult<String>> {
        async move {
            let obj = payload
                .as_object()
                .ok_or_else(|| invalid("payload must be an object"))?;
            let requested_type = obj.get("type").and_then(Value::as_str);
            let id = self.entity_id(obj, requested_type).await?;

            let schema = self.schema;
            let type_name = schema
                .type_name_for_id(&id)
                .ok_or_else(|| invalid(format!("no type is declared for id {id}")))?;
            if let Some(requested) = requested_type.filter(|t| *t != type_name) {
                return Err(invalid(format!(
                    "{id} is a {type_name}, not a {requested}"
                )));
            }

            let created = self.store.hash_set_if_absent(&id, "type", type_name).await?;
            if created {
                self.store.hash_set(&id, "id", &id).await?;
                self.emit(ChangeEvent::created(&id));
                debug!(id, type_name, "entity created");
            }

            let language = obj.get("$language").and_then(Value::as_str).map(str::to_string);
            let previous = mem::replace(&mut self.language, language);
            let mut written = Ok(());
            for (key, value) in obj {
                if key.starts_with('$') || key == "id" || key == "type" {
                    continue;
                }
                written = self.write_field(&id, &FieldPath::parse(key), value).await;
                if written.is_err() {
                    break;
                }
            }
            self.language = previous;
            written?;

            if let Some(alias) = obj.get("$alias").and_then(Value::as_str) {
                self.add_aliases(&id, &[alias.to_string()]).await?;
            }
            if created && attach_to_root && id != ROOT_ID && !obj.contains_key(PARENTS) {
                self.link(ROOT_ID, &id).await?;
            }
            Ok(id)
        }
        .boxed()
    }

    async fn entity_id(
        &self,
        obj: &Map<String, Value>,
        requested_type: Option<&str>,
    ) -> EngineResult<String> {
        if let Some(id) = obj.get("$id").and_then(Value::as_str) {
            return Ok(EntityId::parse(id)?.into_string());
        }
        if let Some(alias) = obj.get("$alias").and_then(Value::as_str) {
            if let Some(id) = self.store.hash_get(keys::ALIASES, alias).await? {
                return Ok(id);
            }
        }
        let Some(type_name) = requested_type else {
            return Err(invalid("payload needs $id, $alias or type"));
        };
        if type_name == ROOT_TYPE {
            return Ok(ROOT_ID.to_string());
        }
        let prefix = self
            .schema
            .prefix_for_type(type_name)
            .ok_or_else(|| invalid(format!("unknown type {type_name}")))?;
        Ok(EntityId::generate(prefix).into_string())
    }

    fn write_field<'b>(
        &'b mut self,
        id: &'b str,
        path: &'b FieldPath,
        value: &'b Value,
    ) -> BoxFuture<'b, EngineResult<()>> {
        async move {
            let schema = self.schema;
            let field_schema = schema
                .field_schema(id, path)
                .ok_or_else(|| invalid(format!("{path} is not a field of {id}")))?;
            if matches!(
                field_schema.field_type,
                FieldType::Id | FieldType::Type | FieldType::Ancestors | FieldType::Descendants
            ) {
                return Err(invalid(format!("{path} is read-only")));
            }

            if value.is_null() {
                return self.delete_field(id, path, field_schema).await;
            }
            if let Value::Object(op) = value {
                if op.get("$delete") == Some(&Value::Bool(true)) {
                    return self.delete_field(id, path, field_schema).await;
                }
                if let Some(target) = op.get("$ref").and_then(Value::as_str) {
                    return self.write_ref(id, path, field_schema, target).await;
                }
                if let Some(delta) = op.get("$increment") {
                    let delta = delta
                        .as_f64()
                        .ok_or_else(|| invalid(format!("$increment of {path} must be a number")))?;
                    if !field_schema.field_type.is_numeric() {
                        return Err(invalid(format!("cannot increment {path}")));
                    }
                    if let Some(default) = op.get("$default") {
                        if self.store.hash_get(id, path.as_str()).await?.is_none() {
                            self.write_scalar(id, path, field_schema, default).await?;
                            return Ok(());
                        }
                    }
                    self.store.hash_increment(id, path.as_str(), delta).await?;
                    self.emit(ChangeEvent::update(id, path.as_str()));
                    return Ok(());
                }
                if let Some(default) = op.get("$default") {
                    if self.is_absent(id, path, field_schema).await? {
                        self.write_field(id, path, default).await?;
                    }
                    return Ok(());
                }
                if !field_schema.field_type.is_set() {
                    if let Some(inner) = op.get("$value") {
                        return self.write_field(id, path, inner).await;
                    }
                }
            }

            match field_schema.field_type {
                FieldType::Object => self.write_object(id, path, value).await,
                FieldType::Text => self.write_text(id, path, value).await,
                FieldType::Set | FieldType::References => self.write_set(id, path, value).await,
                _ => self.write_scalar(id, path, field_schema, value).await,
            }
        }
        .boxed()
    }

    async fn write_ref(
        &mut self,
        id: &str,
        path: &FieldPath,
        field_schema: &FieldSchema,
        target: &str,
    ) -> EngineResult<()> {
        if field_schema.field_type == FieldType::Object {
            self.store
                .hash_set(id, path.join("$ref").as_str(), target)
                .await?;
        } else {
            let marker = format!("{}{target}", keys::REF_MARKER);
            self.store.hash_set(id, path.as_str(), &marker).await?;
        }
        self.emit(ChangeEvent::update(id, path.as_str()));
        Ok(())
    }

    async fn write_scalar(
        &mut self,
        id: &str,
        path: &FieldPath,
        field_schema: &FieldSchema,
        value: &Value,
    ) -> EngineResult<()> {
        let mismatch = || invalid(format!("cannot write {value} to {path}"));
        let raw = match (field_schema.field_type, value) {
            (FieldType::Timestamp, Value::String(s)) if s == "now" => self.now.to_string(),
            (FieldType::Int, v) => {
                let n = number(v).ok_or_else(mismatch)?;
                (n.floor() as i64).to_string()
            }
            (FieldType::Number | FieldType::Float | FieldType::Timestamp, v) => {
                let n = number(v).ok_or_else(mismatch)?;
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    (n as i64).to_string()
                } else {
                    n.to_string()
                }
            }
            (FieldType::Boolean, Value::Bool(b)) => b.to_string(),
            (FieldType::Json, v) => serde_json::to_string(v)?,
            (FieldType::Array, Value::Array(_)) => serde_json::to_string(value)?,
            (FieldType::Geo, Value::Object(geo)) => {
                let lat = geo.get("lat").and_then(Value::as_f64).ok_or_else(mismatch)?;
                let lon = geo.get("lon").and_then(Value::as_f64).ok_or_else(mismatch)?;
                format!("{lon},{lat}")
            }
            (FieldType::Digest, Value::String(s)) => sha256_hex(s.as_bytes()),
            (_, Value::String(s)) => s.clone(),
            (FieldType::String | FieldType::Reference, Value::Number(n)) => n.to_string(),
            _ => return Err(mismatch()),
        };
        self.store.hash_set(id, path.as_str(), &raw).await?;
        self.emit(ChangeEvent::update(id, path.as_str()));
        Ok(())
    }

    async fn write_text(&mut self, id: &str, path: &FieldPath, value: &Value) -> EngineResult<()> {
        match value {
            Value::String(s) => {
                let language = self.language.clone().ok_or_else(|| {
                    invalid(format!("{path} needs $language or an object of languages"))
                })?;
                let key = path.join(&language);
                self.store.hash_set(id, key.as_str(), s).await?;
                self.emit(ChangeEvent::update(id, key.as_str()));
            }
            Value::Object(languages) => {
                for (language, text) in languages {
                    let key = path.join(language);
                    match text {
                        Value::String(s) => self.store.hash_set(id, key.as_str(), s).await?,
                        Value::Null => {
                            self.store.hash_delete(id, key.as_str()).await?;
                        }
                        other => return Err(invalid(format!("cannot write {other} to {key}"))),
                    }
                    self.emit(ChangeEvent::update(id, key.as_str()));
                }
            }
            other => return Err(invalid(format!("cannot write {other} to {path}"))),
        }
        Ok(())
    }

    async fn write_object(&mut self, id: &str, path: &FieldPath, value: &Value) -> EngineResult<()> {
        let Value::Object(props) = value else {
            return Err(invalid(format!("{path} expects an object")));
        };
        if props.get("$merge") == Some(&Value::Bool(false)) {
            for key in self.keys_under(id, path).await? {
                let rest = &key[path.as_str().len() + 1..];
                let prop = rest.split('.').next().unwrap_or(rest);
                if !props.contains_key(prop) {
                    self.remove_hash_field(id, &key).await?;
                }
            }
        }
        for (prop, v) in props {
            if prop.starts_with('$') {
                continue;
            }
            self.write_field(id, &path.join(prop), v).await?;
        }
        Ok(())
    }

    async fn write_set(&mut self, id: &str, path: &FieldPath, value: &Value) -> EngineResult<()> {
        let (reset, add, remove) = match value {
            Value::Array(items) => (Some(items.clone()), Vec::new(), Vec::new()),
            Value::Object(op) => (
                op.get("$value").map(|v| string_list(Some(v))),
                string_list(op.get("$add")),
                string_list(op.get("$delete")),
            ),
            Value::String(_) => (Some(vec![value.clone()]), Vec::new(), Vec::new()),
            other => return Err(invalid(format!("cannot write {other} to {path}"))),
        };
        let field = path.as_str();
        let current: BTreeSet<String> = self
            .store
            .set_members(&set_key(id, field))
            .await?
            .into_iter()
            .collect();

        let (to_add, to_remove) = match reset {
            Some(items) => {
                let wanted = self.member_ids(field, &items).await?;
                let wanted_set: BTreeSet<&String> = wanted.iter().collect();
                let to_remove: Vec<String> = current
                    .iter()
                    .filter(|m| !wanted_set.contains(m))
                    .cloned()
                    .collect();
                let to_add: Vec<String> =
                    wanted.into_iter().filter(|m| !current.contains(m)).collect();
                (to_add, to_remove)
            }
            None => (
                self.member_ids(field, &add).await?,
                self.member_ids(field, &remove).await?,
            ),
        };

        match field {
            PARENTS => {
                for parent in &to_add {
                    self.link(parent, id).await?;
                }
                for parent in &to_remove {
                    self.unlink(parent, id).await?;
                }
                self.adopt_orphan(id).await?;
            }
            CHILDREN => {
                for child in &to_add {
                    self.link(id, child).await?;
                }
                for child in &to_remove {
                    self.unlink(id, child).await?;
                    self.adopt_orphan(child).await?;
                }
            }
            _ => {
                let key = set_key(id, field);
                if !to_add.is_empty() {
                    self.store.set_add(&key, &to_add).await?;
                }
                if !to_remove.is_empty() {
                    self.store.set_remove(&key, &to_remove).await?;
                }
                self.store.hash_set(id, field, keys::SET_MARKER).await?;
                if field == ALIASES_FIELD {
                    self.register_aliases(id, &to_add, &to_remove).await?;
                }
                self.emit(ChangeEvent::update(id, field));
            }
        }
        Ok(())
    }

    /// Turns set payload entries into member ids. Objects are only allowed
    /// under `children`, where they are written as entities first.
    async fn member_ids(&mut self, field: &str, items: &[Value]) -> EngineResult<Vec<String>> {
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let id = match item {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Object(_) if field == CHILDREN => self.set(item, false).await?,
                other => return Err(invalid(format!("cannot add {other} to {field}"))),
            };
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn link(&mut self, parent: &str, child: &str) -> EngineResult<()> {
        if parent == child {
            return Err(invalid(format!("{child} cannot be its own parent")));
        }
        self.store
            .set_add(&set_key(child, PARENTS), &[parent.to_string()])
            .await?;
        self.store
            .set_add(&set_key(parent, CHILDREN), &[child.to_string()])
            .await?;
        self.touched.insert(child.to_string());
        self.emit(ChangeEvent::update(child, PARENTS));
        self.emit(ChangeEvent::update(parent, CHILDREN));
        Ok(())
    }

    async fn unlink(&mut self, parent: &str, child: &str) -> EngineResult<()> {
        self.store
            .set_remove(&set_key(child, PARENTS), &[parent.to_string()])
            .await?;
        self.store
            .set_remove(&set_key(parent, CHILDREN), &[child.to_string()])
            .await?;
        self.touched.insert(child.to_string());
        self.emit(ChangeEvent::update(child, PARENTS));
        self.emit(ChangeEvent::update(parent, CHILDREN));
        Ok(())
    }

    /// Attaches `id` to root when it has no parent left.
    async fn adopt_orphan(&mut self, id: &str) -> EngineResult<()> {
        if id == ROOT_ID || self.deleted.contains(id) {
            return Ok(());
        }
        if self.store.set_members(&set_key(id, PARENTS)).await?.is_empty() {
            self.link(ROOT_ID, id).await?;
        }
        Ok(())
    }

    async fn add_aliases(&mut self, id: &str, aliases: &[String]) -> EngineResult<()> {
        self.store.set_add(&set_key(id, ALIASES_FIELD), aliases).await?;
        self.store.hash_set(id, ALIASES_FIELD, keys::SET_MARKER).await?;
        self.register_aliases(id, aliases, &[]).await?;
        self.emit(ChangeEvent::update(id, ALIASES_FIELD));
        Ok(())
    }

    async fn register_aliases(
        &mut self,
        id: &str,
        added: &[String],
        removed: &[String],
    ) -> EngineResult<()> {
        for alias in added {
            self.store.hash_set(keys::ALIASES, alias, id).await?;
            self.emit(ChangeEvent::update(keys::ALIASES, alias.as_str()));
        }
        for alias in removed {
            if self.store.hash_get(keys::ALIASES, alias).await?.as_deref() == Some(id) {
                self.store.hash_delete(keys::ALIASES, alias).await?;
                self.emit(ChangeEvent::update(keys::ALIASES, alias.as_str()));
            }
        }
        Ok(())
    }

    async fn keys_under(&self, id: &str, path: &FieldPath) -> EngineResult<Vec<String>> {
        Ok(self
            .store
            .hash_keys(id)
            .await?
            .into_iter()
            .filter(|k| is_under(path.as_str(), k))
            .collect())
    }

    async fn remove_hash_field(&mut self, id: &str, key: &str) -> EngineResult<()> {
        if self.store.hash_get(id, key).await?.as_deref() == Some(keys::SET_MARKER) {
            self.store.delete_key(&set_key(id, key)).await?;
        }
        self.store.hash_delete(id, key).await?;
        self.emit(ChangeEvent::update(id, key));
        Ok(())
    }

    async fn is_absent(
        &self,
        id: &str,
        path: &FieldPath,
        field_schema: &FieldSchema,
    ) -> EngineResult<bool> {
        Ok(match field_schema.field_type {
            FieldType::Set | FieldType::References => self
                .store
                .set_members(&set_key(id, path.as_str()))
                .await?
                .is_empty(),
            FieldType::Object | FieldType::Text => self.keys_under(id, path).await?.is_empty(),
            _ => self.store.hash_get(id, path.as_str()).await?.is_none(),
        })
    }

    async fn delete_field(
        &mut self,
        id: &str,
        path: &FieldPath,
        field_schema: &FieldSchema,
    ) -> EngineResult<()> {
        match field_schema.field_type {
            FieldType::Set | FieldType::References => {
                self.write_set(id, path, &Value::Array(Vec::new())).await?;
                if path.as_str() != PARENTS && path.as_str() != CHILDREN {
                    self.store.delete_key(&set_key(id, path.as_str())).await?;
                    self.store.hash_delete(id, path.as_str()).await?;
                }
            }
            FieldType::Object | FieldType::Text => {
                for key in self.keys_under(id, path).await? {
                    self.remove_hash_field(id, &key).await?;
                }
                self.store.hash_delete(id, path.as_str()).await?;
                self.emit(ChangeEvent::update(id, path.as_str()));
            }
            _ => {
                self.store.hash_delete(id, path.as_str()).await?;
                self.emit(ChangeEvent::update(id, path.as_str()));
            }
        }
        Ok(())
    }

    /// Deletes `id` and unlinks it from its neighbours. Returns whether
    /// anything was deleted.
    pub(crate) async fn delete(&mut self, id: &str, hierarchy: bool) -> EngineResult<bool> {
        if id == ROOT_ID {
            return Err(invalid("the root entity cannot be deleted"));
        }
        let mut pending = vec![id.to_string()];
        let mut any = false;
        while let Some(id) = pending.pop() {
            if self.deleted.contains(&id) || !self.store.exists(&id).await? {
                continue;
            }
            for parent in self.store.set_members(&set_key(&id, PARENTS)).await? {
                self.store
                    .set_remove(&set_key(&parent, CHILDREN), &[id.clone()])
                    .await?;
                self.emit(ChangeEvent::update(&parent, CHILDREN));
            }
            for child in self.store.set_members(&set_key(&id, CHILDREN)).await? {
                self.store
                    .set_remove(&set_key(&child, PARENTS), &[id.clone()])
                    .await?;
                self.emit(ChangeEvent::update(&child, PARENTS));
                self.touched.insert(child.clone());
                if self.store.set_members(&set_key(&child, PARENTS)).await?.is_empty() {
                    if hierarchy {
                        pending.push(child);
                    } else {
                        self.link(ROOT_ID, &child).await?;
                    }
                }
            }
            let aliases = self.store.set_members(&set_key(&id, ALIASES_FIELD)).await?;
            self.register_aliases(&id, &[], &aliases).await?;

            for (key, value) in self.store.hash_get_all(&id).await? {
                if value == keys::SET_MARKER {
                    self.store.delete_key(&set_key(&id, &key)).await?;
                }
            }
            for edge in [PARENTS, CHILDREN] {
                self.store.delete_key(&set_key(&id, edge)).await?;
            }
            self.store.delete_key(&id).await?;

            debug!(id, "entity deleted");
            self.touched.remove(&id);
            self.emit(ChangeEvent::deleted(&id));
            self.deleted.insert(id);
            any = true;
        }
        Ok(any)
    }

    /// Recomputes ancestors for every entity with a changed edge and
    /// publishes the collected change events.
    pub(crate) async fn commit(mut self) -> EngineResult<Vec<ChangeEvent>> {
        let touched: Vec<String> = self.touched.difference(&self.deleted).cloned().collect();
        if !touched.is_empty() {
            for id in recompute_ancestors(self.store, &touched).await? {
                self.emit(ChangeEvent::update(id, ANCESTORS));
            }
        }
        for event in &self.events {
            self.store.publish(EVENTS_CHANNEL, &event.encode()?).await?;
        }
        Ok(self.events)
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
