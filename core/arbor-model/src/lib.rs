//! Schema and query model for Arbor.
//!
//! Defines the types every other Arbor subsystem reads:
//! - [`Schema`] / [`TypeSchema`] / [`FieldSchema`]: per-type field declarations,
//!   search flags and the id-prefix → type mapping
//! - [`FieldType`]: the closed set of field kinds the resolver dispatches on
//! - [`GetSpec`]: the typed form of a declarative get-specification
//! - [`FindSpec`] / [`FilterSpec`]: traversal and filter clauses of `$find`
//!
//! Schemas are owned by the schema store and immutable once fetched for a
//! request. Get-specifications are parsed once from JSON and then walked
//! by the engine.

mod filter;
mod get;
mod schema;

pub use filter::{FilterSpec, FindSpec, Operator, Traverse};
pub use get::{FieldSource, GetSpec, Inherit, ListSpec, Selection, Sort, SortOrder};
pub use schema::{FieldSchema, FieldType, Schema, SearchKind, SearchSpec, TypeSchema, ROOT_TYPE};

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while parsing schemas or get-specifications.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The get-specification (or one of its clauses) is malformed.
    #[error("invalid get specification at {path}: {reason}")]
    InvalidSpec { path: String, reason: String },

    /// The schema is malformed or an update conflicts with it.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModelError {
    pub(crate) fn spec(path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            path: if path.is_empty() { "<root>".to_string() } else { path.to_string() },
            reason: reason.into(),
        }
    }
}
