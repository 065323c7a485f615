//! Core type definitions for Arbor.
//!
//! This crate defines the small, dependency-light types shared by every
//! other Arbor crate:
//! - Entity identifiers (type prefix + random suffix, plus the distinguished `root`)
//! - Dotted field paths, parsed once into segments
//! - Change events emitted by writers and consumed by the subscription engine
//! - Wall clocks and `now`-relative time expressions

mod event;
mod ids;
mod path;
mod timestamp;

pub use event::{ChangeEvent, ChangeOp, EVENTS_CHANNEL, SCHEMA_CHANNEL};
pub use ids::{type_prefix, EntityId, SubscriptionId, ROOT_ID};
pub use path::{is_under, FieldPath};
pub use timestamp::{Clock, ManualClock, NowExpr, SystemClock};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid entity id: {0}")]
    InvalidId(String),

    #[error("invalid time expression: {0}")]
    InvalidTimeExpr(String),
}
