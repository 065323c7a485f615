use arbor_types::{Clock, SystemClock};
use serde::Deserialize;
use std::sync::Arc;

/// Configuration for the engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Search index queried for `$find` filters.
    pub search_index: String,
    /// Attempts before a schema mismatch is surfaced to the caller.
    pub max_schema_retries: u32,
    /// Result count of the earliest-crossing probe for now-relative filters.
    pub refresh_probe_limit: usize,
    /// Time source for now-expressions.
    #[serde(skip, default = "system_clock")]
    pub clock: Arc<dyn Clock>,
}

fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_index: "default".to_string(),
            max_schema_retries: 5,
            refresh_probe_limit: 1,
            clock: system_clock(),
        }
    }
}

impl EngineConfig {
    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
