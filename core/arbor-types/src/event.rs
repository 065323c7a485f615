//! Change events emitted by writers.
//!
//! Every write to an entity field publishes one [`ChangeEvent`] on
//! [`EVENTS_CHANNEL`]. Creation and deletion are reported with an empty
//! field. The subscription engine matches these events against the
//! footprints of live queries.

use serde::{Deserialize, Serialize};

/// Pub/sub channel carrying JSON-encoded change events.
pub const EVENTS_CHANNEL: &str = "___arbor_events";

/// Pub/sub channel announcing the sha of every stored schema update.
pub const SCHEMA_CHANNEL: &str = "___arbor_schema_updates";

/// The kind of mutation a change event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    /// A field value (or set membership) changed.
    Update,
    /// The entity was created.
    Created,
    /// The entity was deleted.
    Delete,
}

/// A single `(entity, field, op)` change notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// The entity that changed.
    pub entity_id: String,
    /// Dotted field path; empty for `Created`/`Delete`.
    pub field: String,
    /// What happened.
    pub op: ChangeOp,
}

impl ChangeEvent {
    /// An update of one field.
    pub fn update(entity_id: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            field: field.into(),
            op: ChangeOp::Update,
        }
    }

    /// Creation of an entity.
    pub fn created(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            field: String::new(),
            op: ChangeOp::Created,
        }
    }

    /// Deletion of an entity.
    pub fn deleted(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            field: String::new(),
            op: ChangeOp::Delete,
        }
    }

    /// Serializes the event to its wire form.
    pub fn encode(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses an event from its wire form.
    pub fn decode(payload: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}
