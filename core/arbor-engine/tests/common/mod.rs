//! Shared fixtures for engine tests.

#![allow(dead_code)]

use arbor_engine::{Arbor, EngineConfig};
use arbor_model::Schema;
use arbor_storage::MemoryStore;
use arbor_types::ManualClock;
use serde_json::{json, Value};
use std::sync::Arc;

/// Fixed evaluation time for tests using [`ManualClock`].
pub const NOW: i64 = 1_700_000_000_000;

/// Leagues contain matches and teams; matches reference videos.
pub fn sports_schema() -> Schema {
    let text = json!({ "type": "text", "search": { "type": ["TEXT"] } });
    let image = json!({
        "type": "object",
        "properties": { "thumb": { "type": "url" }, "poster": { "type": "url" } }
    });
    serde_json::from_value(json!({
        "languages": ["en", "de"],
        "rootType": { "fields": { "title": text, "image": image } },
        "types": {
            "league": {
                "prefix": "le",
                "fields": {
                    "name": { "type": "string", "search": { "type": ["TAG"] } },
                    "title": text,
                    "image": image,
                    "published": { "type": "boolean" },
                    "rank": { "type": "int", "search": { "type": ["NUMERIC", "SORTABLE"] } }
                }
            },
            "match": {
                "prefix": "ma",
                "fields": {
                    "title": text,
                    "image": image,
                    "startTime": { "type": "timestamp", "search": { "type": ["NUMERIC", "SORTABLE"] } },
                    "score": { "type": "int" },
                    "views": { "type": "number" },
                    "published": { "type": "boolean", "search": { "type": ["TAG"] } },
                    "location": { "type": "geo" },
                    "stats": { "type": "json" },
                    "homeTeam": { "type": "reference" },
                    "video": { "type": "references" },
                    "tags": { "type": "set", "items": { "type": "string" } },
                    "checksum": { "type": "digest" }
                }
            },
            "team": {
                "prefix": "te",
                "fields": {
                    "name": { "type": "string", "search": { "type": ["TAG"] } },
                    "title": text
                }
            },
            "video": {
                "prefix": "vi",
                "fields": {
                    "title": text,
                    "url": { "type": "url" }
                }
            }
        }
    }))
    .expect("sports schema")
}

/// Routes engine logs to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn arbor() -> Arbor {
    arbor_with_store(Arc::new(MemoryStore::new())).await
}

pub async fn arbor_with_store(store: Arc<MemoryStore>) -> Arbor {
    init_tracing();
    let arbor = Arbor::new(store);
    arbor.update_schema(sports_schema()).await.expect("schema");
    arbor
}

/// A client whose now-expressions resolve against a manual clock.
pub async fn arbor_at(store: Arc<MemoryStore>, clock: Arc<ManualClock>) -> Arbor {
    init_tracing();
    let arbor = Arbor::with_config(store, EngineConfig::default().with_clock(clock));
    arbor.update_schema(sports_schema()).await.expect("schema");
    arbor
}

/// root → le1 → {ma1, ma2, ma3}, with start times 300, 100 and 200.
pub async fn seed_league(arbor: &Arbor) {
    arbor
        .set(json!({
            "$id": "le1",
            "name": "Eredivisie",
            "title": { "en": "Dutch league", "de": "Niederländische Liga" },
            "image": { "thumb": "le1-thumb.png", "poster": "le1-poster.png" }
        }))
        .await
        .unwrap();
    for (id, start, title) in [
        ("ma1", 300, "Ajax - PSV"),
        ("ma2", 100, "Feyenoord - AZ"),
        ("ma3", 200, "PSV - Twente"),
    ] {
        arbor
            .set(json!({
                "$id": id,
                "parents": ["le1"],
                "startTime": start,
                "title": { "en": title }
            }))
            .await
            .unwrap();
    }
}

pub async fn get(arbor: &Arbor, spec: Value) -> Value {
    arbor.get(&spec).await.expect("get")
}
