//! Typed get-specification.
//!
//! A get-specification is a nested JSON object keyed by field name (`true`
//! to include, `false` to exclude, an object for a nested spec, an array
//! for per-item specs) plus `$`-prefixed operators. [`GetSpec::from_value`]
//! validates the shape once so the engine can walk it without re-checking.

use crate::filter::FindSpec;
use crate::{ModelError, ModelResult};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetSpec {
    pub id: Option<String>,
    pub alias: Option<String>,
    pub language: Option<String>,
    /// Accepted and carried; reads are never versioned.
    pub version: Option<String>,
    pub include_meta: bool,
    pub raw_ancestors: bool,
    pub field: Option<FieldSource>,
    pub inherit: Option<Inherit>,
    pub list: Option<ListSpec>,
    pub find: Option<FindSpec>,
    /// Parse failure of the `$list`/`$find` clause. Reported against this
    /// field at evaluation time so sibling fields still resolve.
    pub query_error: Option<String>,
    pub default: Option<Value>,
    pub value: Option<Value>,
    pub all: bool,
    /// Field selections in key order of the originating object.
    pub selections: Vec<(String, Selection)>,
}

/// What a get-specification says about one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Include,
    Exclude,
    Nested(Box<GetSpec>),
    Array(Vec<GetSpec>),
}

/// Where `$field` takes the value from.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSource {
    /// Candidate paths; the first that resolves complete wins. May contain
    /// `${field}` variables.
    pub paths: Vec<String>,
    /// Nested specification applied at the aliased path.
    pub value: Option<Box<GetSpec>>,
}

/// Ancestor-walk mode.
#[derive(Debug, Clone, PartialEq)]
pub enum Inherit {
    /// Walk every ancestor, nearest first.
    Ancestors,
    /// Only ancestors whose type is listed.
    Type { types: Vec<String>, merge: bool },
    /// Only ancestors whose `name` field is listed.
    Name { names: Vec<String>, merge: bool },
    /// Re-run the nested spec on the nearest ancestor of a listed type that
    /// has every required field.
    Item {
        types: Vec<String>,
        required: Vec<String>,
    },
}

impl Inherit {
    pub fn merge(&self) -> bool {
        matches!(
            self,
            Self::Type { merge: true, .. } | Self::Name { merge: true, .. }
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListSpec {
    pub sort: Vec<Sort>,
    pub offset: usize,
    pub limit: Option<usize>,
    pub find: Option<FindSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

const TOP_LEVEL_ONLY: &[&str] = &[
    "$id",
    "$alias",
    "$language",
    "$version",
    "$includeMeta",
    "$rawAncestors",
];

impl GetSpec {
    /// Parses a top-level get-specification.
    pub fn from_value(value: &Value) -> ModelResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| ModelError::spec("", "get specification must be an object"))?;
        Self::parse_object(obj, "", true)
    }

    /// Parses a nested get-specification found at `path`.
    pub fn from_nested(value: &Value, path: &str) -> ModelResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| ModelError::spec(path, "nested specification must be an object"))?;
        Self::parse_object(obj, path, false)
    }

    fn parse_object(obj: &Map<String, Value>, path: &str, top_level: bool) -> ModelResult<Self> {
        let mut spec = GetSpec::default();

        for (key, v) in obj {
            if !key.starts_with('$') {
                let child_path = join_path(path, key);
                let selection = match v {
                    Value::Bool(true) => Selection::Include,
                    Value::Bool(false) => Selection::Exclude,
                    Value::Object(o) => {
                        Selection::Nested(Box::new(Self::parse_object(o, &child_path, false)?))
                    }
                    Value::Array(items) => Selection::Array(
                        items
                            .iter()
                            .map(|i| Self::from_nested(i, &child_path))
                            .collect::<ModelResult<_>>()?,
                    ),
                    _ => {
                        return Err(ModelError::spec(
                            &child_path,
                            "field selection must be a boolean, an object or an array",
                        ));
                    }
                };
                spec.selections.push((key.clone(), selection));
                continue;
            }

            // `$id` is also accepted in nested fields: the nested spec is
            // evaluated against that entity.
            if !top_level && key != "$id" && TOP_LEVEL_ONLY.contains(&key.as_str()) {
                return Err(ModelError::spec(
                    path,
                    format!("operator {key} is only supported at the top level"),
                ));
            }

            match key.as_str() {
                "$id" => spec.id = Some(expect_str(v, path, key)?),
                "$alias" => spec.alias = Some(expect_str(v, path, key)?),
                "$language" => spec.language = Some(expect_str(v, path, key)?),
                "$version" => spec.version = Some(expect_str(v, path, key)?),
                "$includeMeta" => spec.include_meta = expect_bool(v, path, key)?,
                "$rawAncestors" => spec.raw_ancestors = expect_bool(v, path, key)?,
                "$all" => spec.all = expect_bool(v, path, key)?,
                "$default" => spec.default = Some(v.clone()),
                "$value" => spec.value = Some(v.clone()),
                "$field" => spec.field = Some(parse_field(v, path)?),
                "$inherit" => spec.inherit = parse_inherit(v, path)?,
                "$list" => match parse_list(v, path) {
                    Ok(list) => spec.list = list,
                    Err(err) => spec.query_error = Some(err.to_string()),
                },
                "$find" => match FindSpec::from_value(v, &join_path(path, "$find")) {
                    Ok(find) => spec.find = Some(find),
                    Err(err) => spec.query_error = Some(err.to_string()),
                },
                other => {
                    return Err(ModelError::spec(
                        path,
                        format!("operator {other} is not supported"),
                    ));
                }
            }
        }

        if top_level && spec.id.is_none() && spec.alias.is_none() {
            spec.id = Some(arbor_types::ROOT_ID.to_string());
        }

        Ok(spec)
    }

    /// Returns the selection for `field`, if any.
    pub fn selection(&self, field: &str) -> Option<&Selection> {
        self.selections
            .iter()
            .find(|(k, _)| k == field)
            .map(|(_, s)| s)
    }

    /// Returns whether the caller explicitly asked for `field`.
    pub fn includes(&self, field: &str) -> bool {
        matches!(
            self.selection(field),
            Some(Selection::Include | Selection::Nested(_) | Selection::Array(_))
        )
    }

    /// Copy of this spec with only the per-item shape: field selections and
    /// `$all`/`$language`. Used for list/find items and item inheritance.
    pub fn item_spec(&self) -> GetSpec {
        GetSpec {
            language: self.language.clone(),
            all: self.all,
            selections: self.selections.clone(),
            ..GetSpec::default()
        }
    }

    /// Returns whether any selection or operator would produce output.
    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
            && !self.all
            && self.field.is_none()
            && self.inherit.is_none()
            && self.list.is_none()
            && self.find.is_none()
            && self.query_error.is_none()
            && self.value.is_none()
            && self.default.is_none()
    }
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn expect_str(v: &Value, path: &str, key: &str) -> ModelResult<String> {
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| ModelError::spec(path, format!("{key} must be a string")))
}

fn expect_bool(v: &Value, path: &str, key: &str) -> ModelResult<bool> {
    v.as_bool()
        .ok_or_else(|| ModelError::spec(path, format!("{key} must be a boolean")))
}

fn string_or_list(v: &Value, path: &str, what: &str) -> ModelResult<Vec<String>> {
    match v {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|i| {
                i.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ModelError::spec(path, format!("{what} must contain strings")))
            })
            .collect(),
        _ => Err(ModelError::spec(
            path,
            format!("{what} must be a string or a list of strings"),
        )),
    }
}

fn parse_field(v: &Value, path: &str) -> ModelResult<FieldSource> {
    match v {
        Value::Object(o) => {
            let mut source = FieldSource {
                paths: Vec::new(),
                value: None,
            };
            for (key, inner) in o {
                match key.as_str() {
                    "path" => source.paths = string_or_list(inner, path, "$field.path")?,
                    "value" => {
                        source.value = Some(Box::new(GetSpec::from_nested(
                            inner,
                            &join_path(path, "$field.value"),
                        )?))
                    }
                    other => {
                        return Err(ModelError::spec(
                            path,
                            format!("unsupported option {other} in $field"),
                        ));
                    }
                }
            }
            if source.paths.is_empty() {
                return Err(ModelError::spec(path, "$field requires a path"));
            }
            Ok(source)
        }
        _ => Ok(FieldSource {
            paths: string_or_list(v, path, "$field")?,
            value: None,
        }),
    }
}

fn parse_inherit(v: &Value, path: &str) -> ModelResult<Option<Inherit>> {
    let obj = match v {
        Value::Bool(true) => return Ok(Some(Inherit::Ancestors)),
        Value::Bool(false) => return Ok(None),
        Value::Object(o) => o,
        _ => {
            return Err(ModelError::spec(
                path,
                "$inherit must be a boolean or an object",
            ));
        }
    };

    let merge = match obj.get("$merge") {
        Some(m) => expect_bool(m, path, "$merge")?,
        None => false,
    };

    for key in obj.keys() {
        if !matches!(key.as_str(), "$type" | "$name" | "$item" | "$required" | "$merge") {
            return Err(ModelError::spec(
                path,
                format!("unsupported option {key} in $inherit"),
            ));
        }
    }

    match (obj.get("$type"), obj.get("$name"), obj.get("$item")) {
        (Some(t), None, None) => Ok(Some(Inherit::Type {
            types: string_or_list(t, path, "$inherit.$type")?,
            merge,
        })),
        (None, Some(n), None) => Ok(Some(Inherit::Name {
            names: string_or_list(n, path, "$inherit.$name")?,
            merge,
        })),
        (None, None, Some(i)) => {
            if merge {
                return Err(ModelError::spec(
                    path,
                    "$merge is not supported with $inherit.$item",
                ));
            }
            let required = match obj.get("$required") {
                Some(r) => string_or_list(r, path, "$inherit.$required")?,
                None => Vec::new(),
            };
            Ok(Some(Inherit::Item {
                types: string_or_list(i, path, "$inherit.$item")?,
                required,
            }))
        }
        (None, None, None) if merge => Ok(Some(Inherit::Type {
            types: Vec::new(),
            merge,
        })),
        (None, None, None) => Ok(Some(Inherit::Ancestors)),
        _ => Err(ModelError::spec(
            path,
            "$inherit accepts only one of $type, $name or $item",
        )),
    }
}

fn parse_sort(v: &Value, path: &str) -> ModelResult<Sort> {
    let obj = v
        .as_object()
        .ok_or_else(|| ModelError::spec(path, "$sort must be an object"))?;
    let mut field = None;
    let mut order = SortOrder::Asc;
    for (key, inner) in obj {
        match key.as_str() {
            "$field" => field = Some(expect_str(inner, path, "$sort.$field")?),
            "$order" => {
                order = match inner.as_str() {
                    Some("asc") => SortOrder::Asc,
                    Some("desc") => SortOrder::Desc,
                    _ => return Err(ModelError::spec(path, "$order must be asc or desc")),
                }
            }
            other => {
                return Err(ModelError::spec(
                    path,
                    format!("unsupported option {other} in $sort"),
                ));
            }
        }
    }
    Ok(Sort {
        field: field.ok_or_else(|| ModelError::spec(path, "$sort requires $field"))?,
        order,
    })
}

fn parse_list(v: &Value, path: &str) -> ModelResult<Option<ListSpec>> {
    let obj = match v {
        Value::Bool(true) => return Ok(Some(ListSpec::default())),
        Value::Bool(false) => return Ok(None),
        Value::Object(o) => o,
        _ => return Err(ModelError::spec(path, "$list must be a boolean or an object")),
    };

    let mut list = ListSpec::default();
    for (key, inner) in obj {
        match key.as_str() {
            "$offset" => {
                list.offset = inner
                    .as_u64()
                    .ok_or_else(|| ModelError::spec(path, "$offset has to be a number"))?
                    as usize
            }
            "$limit" => {
                list.limit = Some(
                    inner
                        .as_u64()
                        .ok_or_else(|| ModelError::spec(path, "$limit has to be a number"))?
                        as usize,
                )
            }
            "$sort" => {
                list.sort = match inner {
                    Value::Array(items) => items
                        .iter()
                        .map(|s| parse_sort(s, path))
                        .collect::<ModelResult<_>>()?,
                    _ => vec![parse_sort(inner, path)?],
                }
            }
            "$find" => {
                list.find = Some(FindSpec::from_value(
                    inner,
                    &join_path(path, "$list.$find"),
                )?)
            }
            other => {
                return Err(ModelError::spec(
                    path,
                    format!("operator {other} not allowed in $list"),
                ));
            }
        }
    }
    Ok(Some(list))
}
