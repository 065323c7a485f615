//! Identifier types used throughout Arbor.
//!
//! Entity ids are plain strings whose first two characters are the type
//! prefix declared in the schema (`ma1f3c09ab` is a `match` when the schema
//! maps `ma` to `match`). The id `root` is reserved for the hierarchy root.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The id of the distinguished root entity.
pub const ROOT_ID: &str = "root";

/// Length of the type prefix at the start of every non-root id.
const PREFIX_LEN: usize = 2;

/// Number of hex characters appended to the prefix for generated ids.
const SUFFIX_LEN: usize = 8;

/// Unique identifier for an entity in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Generates a fresh id for an entity of the type with the given prefix.
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{prefix}{}", &suffix[..SUFFIX_LEN]))
    }

    /// The root entity id.
    #[must_use]
    pub fn root() -> Self {
        Self(ROOT_ID.to_string())
    }

    /// Parses an id, rejecting empty strings and ids too short to carry a prefix.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s == ROOT_ID {
            return Ok(Self::root());
        }
        if s.len() <= PREFIX_LEN || s.contains(',') {
            return Err(crate::Error::InvalidId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Returns whether this is the root id.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == ROOT_ID
    }

    /// Returns the type prefix, or `None` for the root.
    #[must_use]
    pub fn prefix(&self) -> Option<&str> {
        type_prefix(&self.0)
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the id, returning the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

/// Returns the type prefix of a raw id string.
pub fn type_prefix(id: &str) -> Option<&str> {
    if id == ROOT_ID || id.len() < PREFIX_LEN {
        None
    } else {
        id.get(..PREFIX_LEN)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// Identifier of a live subscription: the hex digest of its get-specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Wraps an already computed digest.
    #[must_use]
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    /// Returns the id as a string slice (also the pub/sub channel name).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the cache hash field holding the current version hash.
    #[must_use]
    pub fn version_field(&self) -> String {
        format!("{}_version", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
