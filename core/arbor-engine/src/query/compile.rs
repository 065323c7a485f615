//! Filter tree → search predicate.

use super::ast::{FilterLeaf, FilterNode};
use crate::error::{EngineError, EngineResult};
use arbor_model::{FieldType, Operator, Schema, SearchKind};
use arbor_storage::{Bound, Predicate};
use arbor_types::NowExpr;
use serde_json::Value;

pub(crate) struct Compiler<'a> {
    schema: &'a Schema,
    now: i64,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(schema: &'a Schema, now: i64) -> Self {
        Self { schema, now }
    }

    pub(crate) fn compile(&self, node: &FilterNode) -> EngineResult<Predicate> {
        match node {
            FilterNode::And(children) => Ok(Predicate::and(
                children
                    .iter()
                    .map(|c| self.compile(c))
                    .collect::<EngineResult<_>>()?,
            )),
            FilterNode::Or(children) => Ok(Predicate::or(
                children
                    .iter()
                    .map(|c| self.compile(c))
                    .collect::<EngineResult<_>>()?,
            )),
            FilterNode::Leaf(leaf) => self.compile_leaf(leaf),
        }
    }

    fn compile_leaf(&self, leaf: &FilterLeaf) -> EngineResult<Predicate> {
        match leaf.operator {
            Operator::Eq => self.equality(leaf),
            Operator::NotEq => Ok(Predicate::negate(self.equality(leaf)?)),
            Operator::Gt => Ok(Predicate::Numeric {
                field: leaf.field.clone(),
                min: Bound::Exclusive(self.number(leaf, &leaf.value)?),
                max: Bound::Unbounded,
            }),
            Operator::Lt => Ok(Predicate::Numeric {
                field: leaf.field.clone(),
                min: Bound::Unbounded,
                max: Bound::Exclusive(self.number(leaf, &leaf.value)?),
            }),
            Operator::Range => match leaf.value.as_array().map(Vec::as_slice) {
                Some([low, high]) => Ok(Predicate::Numeric {
                    field: leaf.field.clone(),
                    min: Bound::Inclusive(self.number(leaf, low)?),
                    max: Bound::Inclusive(self.number(leaf, high)?),
                }),
                _ => Err(EngineError::InvalidQuery(format!(
                    "range filter on {} needs [low, high]",
                    leaf.field
                ))),
            },
        }
    }

    fn equality(&self, leaf: &FilterLeaf) -> EngineResult<Predicate> {
        match leaf.field.as_str() {
            "id" | "type" | "ancestors" => return Ok(Predicate::tag(&leaf.field, leaf.values())),
            _ => {}
        }
        match &leaf.value {
            Value::Number(_) => {
                let v = self.number(leaf, &leaf.value)?;
                Ok(Predicate::Numeric {
                    field: leaf.field.clone(),
                    min: Bound::Inclusive(v),
                    max: Bound::Inclusive(v),
                })
            }
            Value::String(_) if leaf.now.is_some() || self.is_numeric(&leaf.field) => {
                let v = self.number(leaf, &leaf.value)?;
                Ok(Predicate::Numeric {
                    field: leaf.field.clone(),
                    min: Bound::Inclusive(v),
                    max: Bound::Inclusive(v),
                })
            }
            Value::String(s) if self.is_text(&leaf.field) => Ok(Predicate::Text {
                field: leaf.field.clone(),
                value: s.clone(),
            }),
            Value::String(_) | Value::Bool(_) | Value::Array(_) => {
                Ok(Predicate::tag(&leaf.field, leaf.values()))
            }
            other => Err(EngineError::InvalidQuery(format!(
                "cannot compare {} with {other}",
                leaf.field
            ))),
        }
    }

    fn is_text(&self, field: &str) -> bool {
        self.schema
            .search_spec(field)
            .is_some_and(|s| s.kinds.contains(&SearchKind::Text))
            || self.schema.field_type_anywhere(field) == Some(FieldType::Text)
    }

    fn is_numeric(&self, field: &str) -> bool {
        self.schema
            .field_type_anywhere(field)
            .is_some_and(FieldType::is_numeric)
    }

    fn number(&self, leaf: &FilterLeaf, value: &Value) -> EngineResult<f64> {
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) if NowExpr::is_now_expr(s) => {
                Some((self.now + NowExpr::parse(s)?.offset_millis()) as f64)
            }
            Value::String(s) => s.parse::<f64>().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| {
            EngineError::InvalidQuery(format!(
                "{} filter on {} needs a number, got {value}",
                leaf.operator.as_str(),
                leaf.field
            ))
        })
    }
}
