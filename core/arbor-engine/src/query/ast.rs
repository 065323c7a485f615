//! Boolean filter trees built from `$filter` clauses.

use crate::error::{EngineError, EngineResult};
use arbor_model::{FilterSpec, Operator};
use arbor_types::NowExpr;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FilterNode {
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Leaf(FilterLeaf),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FilterLeaf {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
    /// Set when the value is relative to the evaluation time.
    pub now: Option<NowExpr>,
}

impl FilterLeaf {
    fn from_spec(spec: &FilterSpec) -> EngineResult<Self> {
        let now = match &spec.value {
            Value::String(s) if NowExpr::is_now_expr(s) => Some(NowExpr::parse(s)?),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .find(|s| NowExpr::is_now_expr(s))
                .map(NowExpr::parse)
                .transpose()?,
            _ => None,
        };
        if spec.field.is_empty() {
            return Err(EngineError::InvalidQuery("filter without a field".to_string()));
        }
        Ok(Self {
            field: spec.field.clone(),
            operator: spec.operator,
            value: spec.value.clone(),
            now,
        })
    }

    /// String forms of the value, for tag matching.
    pub fn values(&self) -> Vec<String> {
        match &self.value {
            Value::Array(items) => items.iter().filter_map(scalar_string).collect(),
            other => scalar_string(other).into_iter().collect(),
        }
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl FilterNode {
    /// Combines top-level filters with AND. `None` when there are none.
    pub fn from_filters(filters: &[FilterSpec]) -> EngineResult<Option<Self>> {
        let nodes = filters
            .iter()
            .map(Self::from_spec)
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(match nodes.len() {
            0 => None,
            _ => Some(Self::and(nodes)),
        })
    }

    /// `{A, $and: B, $or: C}` reads as `(A AND B) OR C`.
    fn from_spec(spec: &FilterSpec) -> EngineResult<Self> {
        let mut node = Self::Leaf(FilterLeaf::from_spec(spec)?);
        if let Some(and) = &spec.and {
            node = Self::and(vec![node, Self::from_spec(and)?]);
        }
        if let Some(or) = &spec.or {
            node = Self::or(vec![node, Self::from_spec(or)?]);
        }
        Ok(node)
    }

    pub fn and(children: Vec<Self>) -> Self {
        let mut flat = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Self::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            return flat.remove(0);
        }
        Self::And(flat)
    }

    pub fn or(children: Vec<Self>) -> Self {
        let mut flat = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Self::Or(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            return flat.remove(0);
        }
        Self::Or(flat)
    }

    /// A top-level OR runs as one query per branch.
    pub fn disjuncts(self) -> Vec<Self> {
        match self {
            Self::Or(children) => children,
            other => vec![other],
        }
    }

    pub fn leaves(&self) -> Vec<&FilterLeaf> {
        match self {
            Self::Leaf(leaf) => vec![leaf],
            Self::And(children) | Self::Or(children) => {
                children.iter().flat_map(Self::leaves).collect()
            }
        }
    }

    /// The tree with every now-relative leaf removed.
    pub fn without_time(&self) -> Option<Self> {
        match self {
            Self::Leaf(leaf) if leaf.now.is_some() => None,
            Self::Leaf(_) => Some(self.clone()),
            Self::And(children) => {
                let kept: Vec<_> = children.iter().filter_map(Self::without_time).collect();
                (!kept.is_empty()).then(|| Self::and(kept))
            }
            Self::Or(children) => {
                let kept: Vec<_> = children.iter().filter_map(Self::without_time).collect();
                // Dropping a branch of an OR would narrow it; drop the whole OR.
                (kept.len() == children.len()).then(|| Self::or(kept))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaf(field: &str) -> FilterSpec {
        FilterSpec::new(field, Operator::Eq, json!("x"))
    }

    #[test]
    fn and_or_nesting() {
        let mut spec = leaf("a");
        spec.and = Some(Box::new(leaf("b")));
        spec.or = Some(Box::new(leaf("c")));
        let node = FilterNode::from_filters(&[spec]).unwrap().unwrap();
        let FilterNode::Or(branches) = &node else {
            panic!("expected OR, got {node:?}");
        };
        assert_eq!(branches.len(), 2);
        assert!(matches!(&branches[0], FilterNode::And(c) if c.len() == 2));
        assert_eq!(node.clone().disjuncts().len(), 2);
    }

    #[test]
    fn time_leaves_are_detected_and_removed() {
        let timed = FilterSpec::new("start", Operator::Lt, json!("now-5m"));
        let node = FilterNode::from_filters(&[timed, leaf("type")]).unwrap().unwrap();
        assert_eq!(node.leaves()[0].now.map(|n| n.offset_millis()), Some(-300_000));
        let rest = node.without_time().unwrap();
        assert_eq!(rest.leaves().len(), 1);
        assert_eq!(rest.leaves()[0].field, "type");
    }
}
