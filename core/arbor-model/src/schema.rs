use crate::{ModelError, ModelResult};
use arbor_types::{type_prefix, FieldPath, ROOT_ID};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Name of the root entity's type.
pub const ROOT_TYPE: &str = "root";

/// The full schema: languages, per-type field declarations and the
/// id-prefix mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub types: BTreeMap<String, TypeSchema>,
    #[serde(default)]
    pub root_type: TypeSchema,
    #[serde(default)]
    pub prefix_to_type: BTreeMap<String, String>,
    /// Content hash of the stored schema; used to detect concurrent updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

/// Field declarations of one entity type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeSchema {
    /// Two-character id prefix. Assigned from the type name when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSchema>,
}

/// Declaration of a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Sub-fields of an `object` field.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, FieldSchema>,
    /// Item declaration of a `set` or `array` field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<FieldSchema>>,
    /// Search-index flags. Absent means the field is not indexed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchSpec>,
}

impl FieldSchema {
    /// A plain field of the given type.
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            properties: BTreeMap::new(),
            items: None,
            search: None,
        }
    }

    /// Shorthand for an object field with nested properties.
    pub fn object(properties: impl IntoIterator<Item = (&'static str, FieldSchema)>) -> Self {
        Self {
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            ..Self::new(FieldType::Object)
        }
    }

    /// Shorthand for a set of items of the given type.
    pub fn set_of(item: FieldType) -> Self {
        Self {
            items: Some(Box::new(Self::new(item))),
            ..Self::new(FieldType::Set)
        }
    }

    /// Shorthand for an array (stored as one serialized block) of items.
    pub fn array_of(item: FieldType) -> Self {
        Self {
            items: Some(Box::new(Self::new(item))),
            ..Self::new(FieldType::Array)
        }
    }

    /// Marks the field as indexed with the given search kinds.
    #[must_use]
    pub fn indexed(mut self, kinds: impl IntoIterator<Item = SearchKind>) -> Self {
        self.search = Some(SearchSpec {
            index: None,
            kinds: kinds.into_iter().collect(),
        });
        self
    }

    /// Returns whether the field takes part in the search index.
    pub fn is_searchable(&self) -> bool {
        self.search.as_ref().is_some_and(|s| !s.kinds.is_empty())
    }
}

/// The closed set of field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Id,
    String,
    Digest,
    Number,
    Float,
    Int,
    Boolean,
    Object,
    Set,
    Reference,
    References,
    Json,
    Array,
    Text,
    Timestamp,
    Url,
    Email,
    Phone,
    Geo,
    Type,
    Ancestors,
    Descendants,
}

impl FieldType {
    /// Stored as a number and compared numerically.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Number | Self::Float | Self::Int | Self::Timestamp)
    }

    /// Stored as a set under `<id>.<field>`.
    pub fn is_set(self) -> bool {
        matches!(self, Self::Set | Self::References)
    }

    /// Computed from the hierarchy rather than stored verbatim.
    pub fn is_computed(self) -> bool {
        matches!(self, Self::Ancestors | Self::Descendants)
    }
}

/// Search-index declaration of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSpec {
    /// Index name; the default index when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(rename = "type", default)]
    pub kinds: Vec<SearchKind>,
}

/// How an indexed field is searchable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchKind {
    Text,
    Tag,
    Numeric,
    Sortable,
    Geo,
}

/// Fields every type has, whether or not the schema declares them.
fn default_fields() -> &'static BTreeMap<String, FieldSchema> {
    static DEFAULTS: OnceLock<BTreeMap<String, FieldSchema>> = OnceLock::new();
    DEFAULTS.get_or_init(|| {
        [
            ("id", FieldSchema::new(FieldType::Id)),
            (
                "type",
                FieldSchema::new(FieldType::Type).indexed([SearchKind::Tag]),
            ),
            ("parents", FieldSchema::new(FieldType::References)),
            ("children", FieldSchema::new(FieldType::References)),
            (
                "ancestors",
                FieldSchema::new(FieldType::Ancestors).indexed([SearchKind::Tag]),
            ),
            ("descendants", FieldSchema::new(FieldType::Descendants)),
            ("aliases", FieldSchema::set_of(FieldType::String)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    })
}

fn text_language_field() -> &'static FieldSchema {
    static LANGUAGE: OnceLock<FieldSchema> = OnceLock::new();
    LANGUAGE.get_or_init(|| FieldSchema::new(FieldType::String))
}

impl Schema {
    /// Resolves the type name of an entity id via its prefix.
    pub fn type_name_for_id(&self, id: &str) -> Option<&str> {
        if id == ROOT_ID {
            return Some(ROOT_TYPE);
        }
        type_prefix(id)
            .and_then(|p| self.prefix_to_type.get(p))
            .map(String::as_str)
    }

    /// Returns the declaration of a type (`root` included).
    pub fn type_schema(&self, type_name: &str) -> Option<&TypeSchema> {
        if type_name == ROOT_TYPE {
            Some(&self.root_type)
        } else {
            self.types.get(type_name)
        }
    }

    /// Returns the declaration of the type of an entity id.
    pub fn type_schema_for_id(&self, id: &str) -> Option<&TypeSchema> {
        self.type_name_for_id(id).and_then(|t| self.type_schema(t))
    }

    /// Returns the id prefix of a type.
    pub fn prefix_for_type(&self, type_name: &str) -> Option<&str> {
        self.types.get(type_name).and_then(|t| t.prefix.as_deref())
    }

    /// Looks up the declaration of a (possibly nested) field of an entity.
    ///
    /// Walks `object` properties segment by segment. A single segment below a
    /// `text` field addresses one language and resolves as a string. Default
    /// hierarchy fields apply to every type unless the type overrides them.
    pub fn field_schema(&self, id: &str, path: &FieldPath) -> Option<&FieldSchema> {
        let fields = self.type_schema_for_id(id).map(|t| &t.fields);
        let segments = path.segments();
        let first = segments.first()?;
        let mut current = fields
            .and_then(|f| f.get(first))
            .or_else(|| default_fields().get(first))?;

        for (i, segment) in segments.iter().enumerate().skip(1) {
            current = match current.field_type {
                FieldType::Object => current.properties.get(segment)?,
                FieldType::Text if i + 1 == segments.len() => text_language_field(),
                _ => return None,
            };
        }
        Some(current)
    }

    /// Returns whether `path` addresses one language of a `text` field.
    pub fn is_text_language(&self, id: &str, path: &FieldPath) -> bool {
        path.parent()
            .filter(|p| !p.is_empty())
            .and_then(|p| self.field_schema(id, &p))
            .is_some_and(|f| f.field_type == FieldType::Text)
    }

    /// Finds the search declaration of a top-level or nested field in any type.
    ///
    /// Types are scanned in name order, the root type last; the first indexed
    /// declaration wins.
    pub fn search_spec(&self, field: &str) -> Option<&SearchSpec> {
        let path = FieldPath::parse(field);
        self.types
            .values()
            .chain(std::iter::once(&self.root_type))
            .filter_map(|t| lookup_nested(&t.fields, &path))
            .chain(lookup_nested(default_fields(), &path))
            .find_map(|f| f.search.as_ref().filter(|s| !s.kinds.is_empty()))
    }

    /// Returns the declared type of a field in any type, for entity-agnostic
    /// decisions such as sort comparison.
    pub fn field_type_anywhere(&self, field: &str) -> Option<FieldType> {
        let path = FieldPath::parse(field);
        self.types
            .values()
            .chain(std::iter::once(&self.root_type))
            .filter_map(|t| lookup_nested(&t.fields, &path))
            .chain(lookup_nested(default_fields(), &path))
            .map(|f| f.field_type)
            .next()
    }

    /// Lists the field names selectable with `$all` at `path` on an entity.
    pub fn all_fields(&self, id: &str, path: &FieldPath) -> Vec<String> {
        let fields = if path.is_empty() {
            self.type_schema_for_id(id).map(|t| &t.fields)
        } else {
            self.field_schema(id, path)
                .filter(|f| f.field_type == FieldType::Object)
                .map(|f| &f.properties)
        };
        let mut names: Vec<String> = fields
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default();
        if path.is_empty() {
            for default in ["id", "type"] {
                if !names.iter().any(|n| n == default) {
                    names.push(default.to_string());
                }
            }
        }
        names
    }

    /// Merges an update into this schema.
    ///
    /// New languages, types and fields are added; existing declarations are
    /// extended, never removed. Types without a prefix receive the first two
    /// characters of their name. Two types may not share a prefix.
    pub fn merge(&mut self, update: Schema) -> ModelResult<()> {
        for lang in update.languages {
            if !self.languages.contains(&lang) {
                self.languages.push(lang);
            }
        }

        merge_fields(&mut self.root_type.fields, update.root_type.fields)?;

        for (name, incoming) in update.types {
            if name == ROOT_TYPE {
                return Err(ModelError::InvalidSchema(
                    "`root` is reserved, use rootType".to_string(),
                ));
            }
            let existing = self.types.entry(name.clone()).or_default();
            if existing.prefix.is_none() {
                let prefix = match incoming.prefix {
                    Some(p) => p,
                    None => name.chars().take(2).collect(),
                };
                if prefix.chars().count() != 2 {
                    return Err(ModelError::InvalidSchema(format!(
                        "prefix for type {name} must be two characters, got {prefix:?}"
                    )));
                }
                if let Some(owner) = self.prefix_to_type.get(&prefix) {
                    if owner != &name {
                        return Err(ModelError::InvalidSchema(format!(
                            "prefix {prefix} of type {name} already used by {owner}"
                        )));
                    }
                }
                self.prefix_to_type.insert(prefix.clone(), name.clone());
                existing.prefix = Some(prefix);
            } else if let Some(p) = incoming.prefix {
                if existing.prefix.as_deref() != Some(p.as_str()) {
                    return Err(ModelError::InvalidSchema(format!(
                        "cannot change prefix of type {name}"
                    )));
                }
            }
            merge_fields(&mut existing.fields, incoming.fields)?;
        }
        Ok(())
    }
}

fn lookup_nested<'a>(
    fields: &'a BTreeMap<String, FieldSchema>,
    path: &FieldPath,
) -> Option<&'a FieldSchema> {
    let mut segments = path.segments().iter();
    let mut current = fields.get(segments.next()?)?;
    for segment in segments {
        current = current.properties.get(segment)?;
    }
    Some(current)
}

fn merge_fields(
    existing: &mut BTreeMap<String, FieldSchema>,
    incoming: BTreeMap<String, FieldSchema>,
) -> ModelResult<()> {
    for (name, field) in incoming {
        match existing.get_mut(&name) {
            None => {
                existing.insert(name, field);
            }
            Some(current) if current.field_type != field.field_type => {
                return Err(ModelError::InvalidSchema(format!(
                    "cannot change type of field {name} from {:?} to {:?}",
                    current.field_type, field.field_type
                )));
            }
            Some(current) => {
                if field.search.is_some() {
                    current.search = field.search;
                }
                if field.items.is_some() {
                    current.items = field.items;
                }
                merge_fields(&mut current.properties, field.properties)?;
            }
        }
    }
    Ok(())
}
