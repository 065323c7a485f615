//! Error types for the subscription layer.

use arbor_engine::EngineError;
use arbor_model::ModelError;
use arbor_storage::StorageError;
use thiserror::Error;

/// Result type for subscription operations.
pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

/// Errors that can occur while managing subscriptions.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The get-specification is malformed.
    #[error(transparent)]
    InvalidSpec(#[from] ModelError),

    /// Evaluating the get-specification failed.
    #[error("evaluation failed: {0}")]
    Engine(#[from] EngineError),

    /// The store or pub/sub backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No subscription with this id is registered.
    #[error("subscription not found: {0}")]
    NotFound(String),
}
