//! Live get-specifications for Arbor.
//!
//! A subscription is a get-specification kept up to date. Its id is the
//! SHA-256 of the specification's canonical JSON, and the same id names the
//! pub/sub channel its updates are announced on.
//!
//! # Lifecycle
//!
//! 1. `subscribe` registers the specification and evaluates it once,
//!    collecting the fields, ids and member sets it read
//! 2. writers publish change events; events that touch what a
//!    subscription read stage it
//! 3. staged subscriptions are re-evaluated together after a short delay
//!    and publish only when the content hash of the result changed
//! 4. queries filtered on `now` also schedule a re-evaluation at the
//!    moment the next entity crosses the boundary
//!
//! Schema updates travel on their own channel. `observe_schema` streams
//! them, and the manager refetches its schema when one arrives.
//!
//! # Example
//!
//! ```no_run
//! use arbor_engine::Arbor;
//! use arbor_storage::MemoryStore;
//! use arbor_subscriptions::{SubscriptionConfig, SubscriptionManager};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() -> arbor_subscriptions::SubscriptionResult<()> {
//! let arbor = Arbor::new(Arc::new(MemoryStore::new()));
//! let manager = SubscriptionManager::start(arbor, SubscriptionConfig::default()).await?;
//! let mut updates = manager.observe(&json!({ "$id": "le1", "name": true })).await?;
//! while let Some(update) = updates.next().await {
//!     println!("{:?}", update?);
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod footprint;
mod manager;
mod member_cache;
mod subscription;

pub use config::SubscriptionConfig;
pub use error::{SubscriptionError, SubscriptionResult};
pub use manager::{Observer, SchemaObserver, SubscriptionManager};
pub use subscription::{subscription_id, SubscriptionState, Update};
