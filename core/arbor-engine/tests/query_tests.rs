mod common;

use arbor_engine::META_KEY;
use arbor_model::GetSpec;
use arbor_storage::MemoryStore;
use arbor_types::ManualClock;
use common::{arbor, arbor_at, get, seed_league, NOW};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;

fn ids(list: &Value) -> Vec<&str> {
    list.as_array()
        .map(|items| items.iter().filter_map(|i| i["id"].as_str()).collect())
        .unwrap_or_default()
}

// ── Lists ────────────────────────────────────────────────────────

#[tokio::test]
async fn list_children_sorted_and_limited() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let league = get(
        &arbor,
        json!({
            "$id": "le1",
            "$language": "en",
            "children": {
                "id": true,
                "title": true,
                "$list": { "$sort": { "$field": "startTime", "$order": "asc" }, "$limit": 2 }
            }
        }),
    )
    .await;
    assert_eq!(
        league,
        json!({
            "children": [
                { "id": "ma2", "title": "Feyenoord - AZ" },
                { "id": "ma3", "title": "PSV - Twente" }
            ]
        })
    );
}

#[tokio::test]
async fn list_offset_descending() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let league = get(
        &arbor,
        json!({
            "$id": "le1",
            "children": {
                "id": true,
                "$list": { "$sort": { "$field": "startTime", "$order": "desc" }, "$offset": 1 }
            }
        }),
    )
    .await;
    assert_eq!(ids(&league["children"]), vec!["ma3", "ma2"]);
}

#[tokio::test]
async fn list_over_empty_edge_is_empty_array() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let game = get(&arbor, json!({ "$id": "ma1", "children": { "id": true, "$list": true } })).await;
    assert_eq!(game, json!({ "children": [] }));
}

#[tokio::test]
async fn list_from_explicit_ids() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let root = get(
        &arbor,
        json!({
            "picked": {
                "id": true,
                "$list": { "$find": { "$traverse": ["ma3", "ma1"] } }
            }
        }),
    )
    .await;
    assert_eq!(ids(&root["picked"]), vec!["ma3", "ma1"]);
}

// ── Filters ──────────────────────────────────────────────────────

#[tokio::test]
async fn find_descendants_with_filters() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let root = get(
        &arbor,
        json!({
            "upcoming": {
                "id": true,
                "$list": {
                    "$sort": { "$field": "startTime", "$order": "asc" },
                    "$find": {
                        "$traverse": "descendants",
                        "$filter": [
                            { "$field": "type", "$operator": "=", "$value": "match" },
                            { "$field": "startTime", "$operator": ">", "$value": 150 }
                        ]
                    }
                }
            }
        }),
    )
    .await;
    assert_eq!(ids(&root["upcoming"]), vec!["ma3", "ma1"]);
}

#[tokio::test]
async fn find_returns_first_match_as_object() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let league = get(
        &arbor,
        json!({
            "$id": "le1",
            "first": {
                "id": true,
                "$find": {
                    "$traverse": "children",
                    "$filter": { "$field": "startTime", "$operator": "<", "$value": 250 }
                }
            },
            "none": {
                "id": true,
                "$find": {
                    "$traverse": "children",
                    "$filter": { "$field": "startTime", "$operator": ">", "$value": 1000 }
                }
            }
        }),
    )
    .await;
    assert_eq!(league, json!({ "first": { "id": "ma2" }, "none": {} }));
}

#[tokio::test]
async fn or_filters_union_their_matches() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let league = get(
        &arbor,
        json!({
            "$id": "le1",
            "children": {
                "id": true,
                "$list": {
                    "$sort": { "$field": "startTime", "$order": "asc" },
                    "$find": {
                        "$filter": {
                            "$field": "startTime", "$operator": "=", "$value": 300,
                            "$or": { "$field": "startTime", "$operator": "=", "$value": 100 }
                        }
                    }
                }
            }
        }),
    )
    .await;
    assert_eq!(ids(&league["children"]), vec!["ma2", "ma1"]);
}

#[tokio::test]
async fn range_and_text_filters() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let root = get(
        &arbor,
        json!({
            "games": {
                "id": true,
                "$list": {
                    "$sort": { "$field": "startTime", "$order": "asc" },
                    "$find": {
                        "$traverse": "descendants",
                        "$filter": [
                            { "$field": "title", "$operator": "=", "$value": "psv" },
                            { "$field": "startTime", "$operator": "..", "$value": [200, 300] }
                        ]
                    }
                }
            }
        }),
    )
    .await;
    assert_eq!(ids(&root["games"]), vec!["ma3", "ma1"]);
}

#[tokio::test]
async fn nested_find_searches_below_matches() {
    let arbor = arbor().await;
    seed_league(&arbor).await;
    arbor.set(json!({ "$id": "le2" })).await.unwrap();
    arbor
        .set(json!({ "$id": "ma9", "parents": ["le2"], "startTime": 999 }))
        .await
        .unwrap();
    arbor.set(json!({ "$id": "le1", "rank": 1 })).await.unwrap();

    let root = get(
        &arbor,
        json!({
            "games": {
                "id": true,
                "$list": {
                    "$sort": { "$field": "startTime", "$order": "desc" },
                    "$find": {
                        "$traverse": "descendants",
                        "$filter": { "$field": "rank", "$operator": "=", "$value": 1 },
                        "$find": {
                            "$filter": { "$field": "type", "$operator": "=", "$value": "match" }
                        }
                    }
                }
            }
        }),
    )
    .await;
    assert_eq!(ids(&root["games"]), vec!["ma1", "ma3", "ma2"]);
}

// ── Specification errors ─────────────────────────────────────────

#[tokio::test]
async fn list_and_find_siblings_degrade_only_that_field() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let league = get(
        &arbor,
        json!({
            "$id": "le1",
            "$includeMeta": true,
            "name": true,
            "children": { "$list": true, "$find": { "$traverse": "children" } }
        }),
    )
    .await;
    assert_eq!(league["name"], json!("Eredivisie"));
    assert!(league.get("children").is_none());
    assert_eq!(
        league[META_KEY]["errors"]["children"],
        json!("invalid query: If using $list put $find in list")
    );
}

#[tokio::test]
async fn malformed_filter_degrades_only_that_field() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let league = get(
        &arbor,
        json!({
            "$id": "le1",
            "$includeMeta": true,
            "name": true,
            "matches": {
                "$list": {
                    "$find": {
                        "$traverse": "children",
                        "$filter": { "$field": "startTime", "$operator": "~", "$value": 1 }
                    }
                }
            }
        }),
    )
    .await;
    assert_eq!(league["name"], json!("Eredivisie"));
    assert!(league.get("matches").is_none());
    let error = league[META_KEY]["errors"]["matches"].as_str().unwrap();
    assert!(error.starts_with("invalid query: "));
    assert!(error.contains("unsupported operator ~"));
}

#[tokio::test]
async fn non_numeric_comparison_degrades_field() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let league = get(
        &arbor,
        json!({
            "$id": "le1",
            "name": true,
            "children": {
                "$list": {
                    "$find": {
                        "$filter": { "$field": "startTime", "$operator": ">", "$value": "soon" }
                    }
                }
            }
        }),
    )
    .await;
    assert_eq!(league, json!({ "name": "Eredivisie" }));
}

// ── Footprints ───────────────────────────────────────────────────

#[tokio::test]
async fn descendants_query_records_member_dependencies() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let spec = GetSpec::from_value(&json!({
        "games": {
            "title": true,
            "$list": {
                "$find": {
                    "$traverse": "descendants",
                    "$filter": { "$field": "type", "$operator": "=", "$value": "match" }
                }
            }
        }
    }))
    .unwrap();
    let (_, meta) = arbor.get_with_meta(&spec, true).await.unwrap();

    let footprint = &meta.queries[0];
    assert_eq!(footprint.traverse.as_deref(), Some("descendants"));
    assert_eq!(footprint.types, vec!["match"]);
    let key = footprint.member_key.clone().unwrap();
    assert_eq!(meta.contains[&key], vec!["root"]);
    assert!(meta.fields["title"].types["match"].contains(&key));
    assert!(meta.fields["ancestors"].types["match"].contains(&key));
}

#[tokio::test]
async fn children_query_records_edge_and_candidate_dependencies() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let spec = GetSpec::from_value(&json!({
        "$id": "le1",
        "children": {
            "id": true,
            "$list": { "$sort": { "$field": "startTime", "$order": "asc" } }
        }
    }))
    .unwrap();
    let (_, meta) = arbor.get_with_meta(&spec, true).await.unwrap();

    assert!(meta.fields["children"].ids.contains("le1"));
    let start = &meta.fields["startTime"].ids;
    assert!(["ma1", "ma2", "ma3"].iter().all(|id| start.contains(*id)));
}

#[tokio::test]
async fn now_filters_schedule_a_refresh() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(NOW));
    let arbor = arbor_at(store, clock.clone()).await;
    arbor.set(json!({ "$id": "le1" })).await.unwrap();
    for (id, start) in [("ma1", NOW - 1_000), ("ma2", NOW + 5_000), ("ma3", NOW + 9_000)] {
        arbor
            .set(json!({ "$id": id, "parents": ["le1"], "startTime": start }))
            .await
            .unwrap();
    }

    let spec = GetSpec::from_value(&json!({
        "$id": "le1",
        "started": {
            "id": true,
            "$list": {
                "$find": {
                    "$traverse": "descendants",
                    "$filter": { "$field": "startTime", "$operator": "<", "$value": "now" }
                }
            }
        }
    }))
    .unwrap();

    let (result, meta) = arbor.get_with_meta(&spec, true).await.unwrap();
    assert_eq!(ids(&result["started"]), vec!["ma1"]);
    assert_eq!(meta.refresh_at, Some(NOW + 5_001));

    clock.set(NOW + 5_001);
    let (result, meta) = arbor.get_with_meta(&spec, true).await.unwrap();
    assert_eq!(ids(&result["started"]), vec!["ma1", "ma2"]);
    assert_eq!(meta.refresh_at, Some(NOW + 9_001));
}

#[tokio::test]
async fn greater_than_now_flips_at_equality() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(NOW));
    let arbor = arbor_at(store, clock.clone()).await;
    arbor.set(json!({ "$id": "le1" })).await.unwrap();
    for (id, start) in [("ma1", NOW + 2_000), ("ma2", NOW + 5_000)] {
        arbor
            .set(json!({ "$id": id, "parents": ["le1"], "startTime": start }))
            .await
            .unwrap();
    }

    let spec = GetSpec::from_value(&json!({
        "$id": "le1",
        "upcoming": {
            "id": true,
            "$list": {
                "$sort": { "$field": "startTime", "$order": "asc" },
                "$find": {
                    "$traverse": "descendants",
                    "$filter": { "$field": "startTime", "$operator": ">", "$value": "now" }
                }
            }
        }
    }))
    .unwrap();

    let (result, meta) = arbor.get_with_meta(&spec, true).await.unwrap();
    assert_eq!(ids(&result["upcoming"]), vec!["ma1", "ma2"]);
    assert_eq!(meta.refresh_at, Some(NOW + 2_000));

    clock.set(NOW + 2_000);
    let (result, meta) = arbor.get_with_meta(&spec, true).await.unwrap();
    assert_eq!(ids(&result["upcoming"]), vec!["ma2"]);
    assert_eq!(meta.refresh_at, Some(NOW + 5_000));
}
