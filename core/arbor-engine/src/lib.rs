//! Arbor engine: reads and writes over a hierarchical entity store.
//!
//! Entities form a DAG through `parents`/`children` sets. Each entity keeps a
//! materialized `ancestors` list that is recomputed whenever an edge changes.
//! Reads are driven by a JSON get-specification that selects fields, falls
//! back to ancestors (`$inherit`), aliases fields (`$field`) and runs
//! sub-queries (`$list`/`$find`) through the search index.
//!
//! # Components
//!
//! - **Hierarchy**: ancestor recomputation in topological order
//! - **Resolver**: typed field reads, references, text languages
//! - **Inherit**: nearest-ancestor fallback by depth
//! - **Query**: filter compilation, traversal, sort/offset/limit
//! - **Modify**: typed writes, edge bookkeeping, change events
//!
//! # Example
//!
//! ```no_run
//! use arbor_engine::Arbor;
//! use arbor_storage::MemoryStore;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() -> arbor_engine::EngineResult<()> {
//! let arbor = Arbor::new(Arc::new(MemoryStore::new()));
//! let id = arbor.set(json!({ "type": "league", "name": "Eredivisie" })).await?;
//! let league = arbor.get(&json!({ "$id": id, "name": true })).await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod get;
mod hierarchy;
mod inherit;
mod meta;
mod modify;
mod query;
mod resolve;
mod result;
mod schema_store;

pub use client::Arbor;
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use get::META_KEY;
pub use hierarchy::{combine_ancestors, parse_ancestors, recompute_ancestors};
pub use meta::{FieldDependency, GetMeta, QueryFootprint};
pub use modify::ModifyOp;
pub use schema_store::sha256_hex;
