//! Subscription manager configuration.

use arbor_storage::keys;
use serde::Deserialize;

/// Configuration for a [`SubscriptionManager`](crate::SubscriptionManager).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Delay between the first staged change and the flush that
    /// re-evaluates every staged subscription.
    pub flush_delay_ms: u64,
    /// Upper bound on how long the refresh timer sleeps before rechecking
    /// the queue.
    pub max_refresh_sleep_ms: u64,
    /// Entries kept in the entity → ancestors cache used for member checks.
    pub member_cache_size: usize,
    /// Hash holding the published payload and version of every subscription.
    pub cache_key: String,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            flush_delay_ms: 10,
            max_refresh_sleep_ms: 30_000,
            member_cache_size: 10_000,
            cache_key: keys::CACHE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SubscriptionConfig =
            serde_json::from_str(r#"{ "flush_delay_ms": 50 }"#).unwrap();
        assert_eq!(config.flush_delay_ms, 50);
        assert_eq!(config.member_cache_size, 10_000);
        assert_eq!(config.cache_key, keys::CACHE);
    }
}
