//! One live get-specification and the payloads it publishes.

use crate::error::SubscriptionResult;
use arbor_engine::{sha256_hex, GetMeta};
use arbor_model::GetSpec;
use arbor_types::SubscriptionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Derives the id of a get-specification. Object keys serialize in sorted
/// order, so equal specifications share an id regardless of key order.
pub fn subscription_id(spec: &Value) -> SubscriptionResult<SubscriptionId> {
    let canonical = serde_json::to_string(spec)?;
    Ok(SubscriptionId::new(sha256_hex(canonical.as_bytes())))
}

/// What is cached and announced for a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Update {
    /// The current result of the get-specification.
    Update { payload: Value },
    /// The entity the subscription is rooted at was deleted.
    Delete,
}

impl Update {
    /// Content hash of the serialized update.
    pub(crate) fn version(encoded: &str) -> String {
        sha256_hex(encoded.as_bytes())
    }
}

/// Lifecycle of a registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Registered, not evaluated yet.
    Registered,
    /// Evaluated at least once; pushes on change.
    Live,
}

#[derive(Debug)]
pub(crate) struct Subscription {
    pub id: SubscriptionId,
    pub spec: GetSpec,
    pub clients: BTreeSet<String>,
    pub state: SubscriptionState,
    /// Hash of the last published update.
    pub version: Option<String>,
    /// Dependencies of the last evaluation.
    pub meta: GetMeta,
    /// Entity the get is rooted at, resolved at the last evaluation.
    pub root: Option<String>,
    /// Scheduled forced re-evaluation, if any.
    pub refresh_at: Option<i64>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, spec: GetSpec) -> Self {
        Self {
            id,
            spec,
            clients: BTreeSet::new(),
            state: SubscriptionState::Registered,
            version: None,
            meta: GetMeta::default(),
            root: None,
            refresh_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_ignores_key_order() {
        let a = subscription_id(&json!({ "$id": "le1", "name": true, "title": true })).unwrap();
        let b = subscription_id(&json!({ "title": true, "name": true, "$id": "le1" })).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        let c = subscription_id(&json!({ "$id": "le1", "name": true })).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn update_wire_form() {
        let update = Update::Update {
            payload: json!({ "name": "Eredivisie" }),
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({ "type": "update", "payload": { "name": "Eredivisie" } })
        );
        assert_eq!(
            serde_json::to_value(&Update::Delete).unwrap(),
            json!({ "type": "delete" })
        );
    }
}
