use crate::{ModelError, ModelResult};
use serde_json::{Map, Value};

/// A `$find` clause: where to look, what to keep, and optionally a nested
/// find applied to the matches.
#[derive(Debug, Clone, PartialEq)]
pub struct FindSpec {
    /// Edge to traverse from the origin ids (`children`, `descendants`,
    /// `ancestors`, `parents` or any references field) or an explicit id list.
    /// When absent the enclosing field name is traversed.
    pub traverse: Option<Traverse>,
    /// Top-level filters, combined with an implicit AND.
    pub filters: Vec<FilterSpec>,
    /// Nested find run against the ids matched at this level.
    pub find: Option<Box<FindSpec>>,
}

/// Source of candidate ids for a find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Traverse {
    Field(String),
    Ids(Vec<String>),
}

impl Traverse {
    /// The traversed edge name, `None` for an explicit id list.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Field(f) => Some(f),
            Self::Ids(_) => None,
        }
    }
}

/// One filter leaf, possibly with nested `$and` / `$or` branches.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
    pub and: Option<Box<FilterSpec>>,
    pub or: Option<Box<FilterSpec>>,
}

/// Comparison operator of a filter leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Lt,
    Range,
}

impl Operator {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "=" => Some(Self::Eq),
            "!=" => Some(Self::NotEq),
            ">" => Some(Self::Gt),
            "<" => Some(Self::Lt),
            ".." => Some(Self::Range),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Range => "..",
        }
    }
}

impl FindSpec {
    /// Parses a `$find` object.
    pub fn from_value(value: &Value, path: &str) -> ModelResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| ModelError::spec(path, "$find must be an object"))?;

        let mut find = FindSpec {
            traverse: None,
            filters: Vec::new(),
            find: None,
        };

        for (key, v) in obj {
            match key.as_str() {
                "$traverse" => find.traverse = Some(parse_traverse(v, path)?),
                "$filter" => {
                    find.filters = match v {
                        Value::Array(items) => items
                            .iter()
                            .map(|f| FilterSpec::from_value(f, path))
                            .collect::<ModelResult<_>>()?,
                        Value::Object(_) => vec![FilterSpec::from_value(v, path)?],
                        _ => {
                            return Err(ModelError::spec(
                                path,
                                "$filter must be an object or an array of objects",
                            ));
                        }
                    }
                }
                "$find" => {
                    find.find = Some(Box::new(FindSpec::from_value(
                        v,
                        &format!("{path}.$find"),
                    )?))
                }
                other => {
                    return Err(ModelError::spec(
                        path,
                        format!("unsupported option {other} in $find"),
                    ));
                }
            }
        }
        Ok(find)
    }
}

fn parse_traverse(value: &Value, path: &str) -> ModelResult<Traverse> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(Traverse::Field(s.clone())),
        Value::Array(items) => items
            .iter()
            .map(|i| {
                i.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ModelError::spec(path, "$traverse ids must be strings"))
            })
            .collect::<ModelResult<Vec<_>>>()
            .map(Traverse::Ids),
        _ => Err(ModelError::spec(
            path,
            "$traverse must be a field name or a list of ids",
        )),
    }
}

impl FilterSpec {
    /// Parses one filter object: `{ $field, $operator, $value, $and?, $or? }`.
    pub fn from_value(value: &Value, path: &str) -> ModelResult<Self> {
        let obj: &Map<String, Value> = value
            .as_object()
            .ok_or_else(|| ModelError::spec(path, "filter must be an object"))?;

        let mut field = None;
        let mut operator = None;
        let mut filter_value = None;
        let mut and = None;
        let mut or = None;

        for (key, v) in obj {
            match key.as_str() {
                "$field" => {
                    field = Some(
                        v.as_str()
                            .ok_or_else(|| ModelError::spec(path, "$field in filter must be a string"))?
                            .to_string(),
                    )
                }
                "$operator" => {
                    let op = v
                        .as_str()
                        .ok_or_else(|| ModelError::spec(path, "$operator must be a string"))?;
                    operator = Some(Operator::parse(op).ok_or_else(|| {
                        ModelError::spec(path, format!("unsupported operator {op}"))
                    })?);
                }
                "$value" => filter_value = Some(v.clone()),
                "$and" => and = Some(Box::new(FilterSpec::from_value(v, path)?)),
                "$or" => or = Some(Box::new(FilterSpec::from_value(v, path)?)),
                other => {
                    return Err(ModelError::spec(
                        path,
                        format!("unsupported option {other} in filter"),
                    ));
                }
            }
        }

        let field = field.ok_or_else(|| ModelError::spec(path, "filter requires $field"))?;
        let operator =
            operator.ok_or_else(|| ModelError::spec(path, "filter requires $operator"))?;
        let value = filter_value.ok_or_else(|| ModelError::spec(path, "filter requires $value"))?;

        if operator == Operator::Range {
            let valid = value.as_array().is_some_and(|r| r.len() == 2);
            if !valid {
                return Err(ModelError::spec(
                    path,
                    "range filter requires a [min, max] $value",
                ));
            }
        }

        Ok(Self {
            field,
            operator,
            value,
            and,
            or,
        })
    }

    /// Shorthand used by the engine to build synthetic filters.
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            and: None,
            or: None,
        }
    }
}
