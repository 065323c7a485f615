//! Search capability: compiled predicates and the `search` seam.
//!
//! A [`Predicate`] is what the query compiler produces for indexed filters.
//! [`SearchQuery`] pairs it with its rendering in RediSearch query syntax,
//! which is what a server-backed index receives; in-process backends
//! evaluate the predicate tree directly.

use crate::error::StorageResult;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// Compiled filter predicate over indexed fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Matches every indexed entity.
    All,
    And { children: Vec<Predicate> },
    Or { children: Vec<Predicate> },
    Not { child: Box<Predicate> },
    /// Exact match against any of `values`. Multi-valued fields (sets,
    /// the comma-joined ancestor list) match when any element matches.
    Tag { field: String, values: Vec<String> },
    /// Numeric range.
    Numeric { field: String, min: Bound, max: Bound },
    /// Case-insensitive full-text containment.
    Text { field: String, value: String },
}

/// One end of a numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "bound", content = "value", rename_all = "snake_case")]
pub enum Bound {
    Unbounded,
    Inclusive(f64),
    Exclusive(f64),
}

impl Bound {
    fn render(self, low: bool) -> String {
        match self {
            Self::Unbounded if low => "-inf".to_string(),
            Self::Unbounded => "+inf".to_string(),
            Self::Inclusive(v) => format_number(v),
            Self::Exclusive(v) => format!("({}", format_number(v)),
        }
    }

    /// Returns whether `value` lies on the allowed side of this bound.
    pub fn admits(self, value: f64, low: bool) -> bool {
        match (self, low) {
            (Self::Unbounded, _) => true,
            (Self::Inclusive(b), true) => value >= b,
            (Self::Inclusive(b), false) => value <= b,
            (Self::Exclusive(b), true) => value > b,
            (Self::Exclusive(b), false) => value < b,
        }
    }
}

pub(crate) fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

fn escape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_punctuation() || c.is_whitespace() {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl Predicate {
    pub fn and(children: Vec<Predicate>) -> Self {
        let mut children: Vec<_> = children.into_iter().filter(|c| *c != Self::All).collect();
        match children.len() {
            0 => Self::All,
            1 => children.remove(0),
            _ => Self::And { children },
        }
    }

    pub fn or(children: Vec<Predicate>) -> Self {
        if children.contains(&Self::All) {
            return Self::All;
        }
        let mut children = children;
        match children.len() {
            0 => Self::All,
            1 => children.remove(0),
            _ => Self::Or { children },
        }
    }

    pub fn negate(child: Predicate) -> Self {
        Self::Not {
            child: Box::new(child),
        }
    }

    pub fn tag(field: impl Into<String>, values: Vec<String>) -> Self {
        Self::Tag {
            field: field.into(),
            values,
        }
    }

    /// Renders the predicate in RediSearch query syntax.
    pub fn render(&self) -> String {
        match self {
            Self::All => "*".to_string(),
            Self::And { children } => {
                let parts: Vec<_> = children.iter().map(Self::render).collect();
                format!("({})", parts.join(" "))
            }
            Self::Or { children } => {
                let parts: Vec<_> = children.iter().map(Self::render).collect();
                format!("({})", parts.join("|"))
            }
            Self::Not { child } => format!("-{}", child.render()),
            Self::Tag { field, values } => {
                let parts: Vec<_> = values.iter().map(|v| escape_tag(v)).collect();
                format!("@{field}:{{{}}}", parts.join("|"))
            }
            Self::Numeric { field, min, max } => {
                format!("@{field}:[{} {}]", min.render(true), max.render(false))
            }
            Self::Text { field, value } => format!("@{field}:({value})"),
        }
    }

    /// Field names referenced anywhere in the predicate.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::All => {}
            Self::And { children } | Self::Or { children } => {
                for c in children {
                    c.collect_fields(out);
                }
            }
            Self::Not { child } => child.collect_fields(out),
            Self::Tag { field, .. } | Self::Numeric { field, .. } | Self::Text { field, .. } => {
                out.push(field)
            }
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// A compiled query: the predicate and its rendered text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchQuery {
    pub predicate: Predicate,
    pub text: String,
}

impl SearchQuery {
    pub fn new(predicate: Predicate) -> Self {
        let text = predicate.render();
        Self { predicate, text }
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchSort {
    pub field: String,
    pub direction: SortDirection,
}

/// Sort/offset/limit directives passed alongside a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchArgs {
    pub sort: Option<SearchSort>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl SearchArgs {
    /// Renders the directives as backend arguments
    /// (`SORTBY <field> ASC|DESC`, `LIMIT <offset> <count>`).
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(sort) = &self.sort {
            args.push("SORTBY".to_string());
            args.push(sort.field.clone());
            args.push(
                match sort.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                }
                .to_string(),
            );
        }
        if self.offset > 0 || self.limit.is_some() {
            args.push("LIMIT".to_string());
            args.push(self.offset.to_string());
            args.push(self.limit.unwrap_or(usize::MAX >> 1).to_string());
        }
        args
    }
}

/// Index-backed search over entities.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Runs a compiled query and returns matching ids in result order.
    async fn search(
        &self,
        index: &str,
        query: &SearchQuery,
        args: &SearchArgs,
    ) -> StorageResult<Vec<String>>;
}
