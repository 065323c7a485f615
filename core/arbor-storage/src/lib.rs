//! Storage collaborators for Arbor.
//!
//! The engine never talks to a concrete database. It consumes two
//! capabilities:
//!
//! - [`StoreAdapter`]: per-entity hashes, sets and a pub/sub channel
//! - [`SearchIndex`]: `search(index, query, args) -> ordered ids`
//!
//! [`MemoryStore`] implements both in-process. It backs the tests and any
//! embedding that does not need persistence.
//!
//! # Key layout
//!
//! - entity fields live in the hash keyed by the entity id, one hash field
//!   per dotted path (`title.en`, `image.thumb`)
//! - set-valued fields live in the set keyed `<id>.<field>`
//!   (`ma1.parents`, `ma1.children`)
//! - the materialized ancestor list is the comma-joined hash field
//!   `ancestors`

mod adapter;
mod error;
mod memory;
mod search;

pub use adapter::{set_key, StoreAdapter};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use search::{Bound, Predicate, SearchArgs, SearchIndex, SearchQuery, SearchSort, SortDirection};

/// Well-known store keys.
pub mod keys {
    /// Hash holding the schema JSON (`types`) and its `sha`.
    pub const SCHEMA: &str = "___arbor_schema";
    /// Hash mapping alias → entity id.
    pub const ALIASES: &str = "___arbor_aliases";
    /// Hash holding the last published payload and version per subscription.
    pub const CACHE: &str = "___arbor_cache";
    /// Inline marker: the value lives at another field of the same entity.
    pub const REF_MARKER: &str = "___arbor_$ref:";
    /// Marker stored in the hash for fields whose values live in a set.
    pub const SET_MARKER: &str = "___arbor_$set";
}
