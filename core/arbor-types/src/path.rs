//! Dotted field paths.
//!
//! Nested fields are stored flat under dotted keys (`title.en`,
//! `image.thumb`). A [`FieldPath`] parses the dotted string once into
//! segments so resolvers can walk schemas and results without re-splitting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A parsed dotted field path. The empty path addresses the entity itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    /// Parses a dotted path. Empty segments are dropped.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let segments: Vec<String> = raw
            .split('.')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            raw: segments.join("."),
            segments,
        }
    }

    /// The empty path.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Returns whether this is the empty path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The dotted string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The parsed segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The last segment, if any.
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The first segment, if any.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// The path without its last segment.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let segments = self.segments[..self.segments.len() - 1].to_vec();
        Some(Self {
            raw: segments.join("."),
            segments,
        })
    }

    /// Appends a (possibly dotted) suffix.
    #[must_use]
    pub fn join(&self, suffix: &str) -> Self {
        if self.is_empty() {
            return Self::parse(suffix);
        }
        if suffix.is_empty() {
            return self.clone();
        }
        Self::parse(&format!("{}.{}", self.raw, suffix))
    }

    /// Returns whether `self` is a strict prefix of `other` at segment granularity.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &FieldPath) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }
}

/// Returns whether the dotted key `key` lies strictly under the dotted path `path`.
#[must_use]
pub fn is_under(path: &str, key: &str) -> bool {
    path.is_empty()
        || (key.len() > path.len() && key.starts_with(path) && key.as_bytes()[path.len()] == b'.')
}

impl From<String> for FieldPath {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<&str> for FieldPath {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.raw
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
