//! Error types for the engine.

use arbor_model::ModelError;
use arbor_storage::StorageError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while reading or writing through the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A `$list`/`$find` clause cannot be executed. Degrades one field.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The get-specification or schema is malformed.
    #[error(transparent)]
    InvalidSpec(#[from] ModelError),

    /// The schema changed since it was fetched. Retryable.
    #[error("schema mismatch: expected sha {expected:?}, found {found:?}")]
    SchemaMismatch {
        expected: Option<String>,
        found: Option<String>,
    },

    /// Schema-mismatch retries ran out.
    #[error("gave up after {attempts} schema mismatch retries")]
    RetriesExhausted { attempts: u32 },

    /// The store or search backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A modify payload cannot be applied.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Types(#[from] arbor_types::Error),
}

impl EngineError {
    /// Returns whether the error only affects one field of a read.
    pub fn is_query_error(&self) -> bool {
        matches!(self, Self::InvalidQuery(_) | Self::InvalidSpec(_))
    }
}
