mod common;

use arbor_engine::{EngineError, META_KEY};
use common::{arbor, get, seed_league};
use pretty_assertions::assert_eq;
use serde_json::json;

// ── Plain fields ─────────────────────────────────────────────────

#[tokio::test]
async fn selects_requested_fields_only() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let league = get(&arbor, json!({ "$id": "le1", "id": true, "name": true })).await;
    assert_eq!(league, json!({ "id": "le1", "name": "Eredivisie" }));
}

#[tokio::test]
async fn missing_fields_are_left_out() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let league = get(&arbor, json!({ "$id": "le1", "published": true, "rank": true })).await;
    assert_eq!(league, json!({}));
}

#[tokio::test]
async fn all_expands_schema_fields() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let league = get(
        &arbor,
        json!({ "$id": "le1", "$all": true, "image": false, "title": false }),
    )
    .await;
    assert_eq!(league, json!({ "id": "le1", "type": "league", "name": "Eredivisie" }));
}

#[tokio::test]
async fn nested_object_selection() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let league = get(&arbor, json!({ "$id": "le1", "image": { "thumb": true } })).await;
    assert_eq!(league, json!({ "image": { "thumb": "le1-thumb.png" } }));
}

// ── Text ─────────────────────────────────────────────────────────

#[tokio::test]
async fn text_in_requested_language() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let league = get(&arbor, json!({ "$id": "le1", "$language": "de", "title": true })).await;
    assert_eq!(league, json!({ "title": "Niederländische Liga" }));
}

#[tokio::test]
async fn text_falls_back_to_another_language() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let game = get(&arbor, json!({ "$id": "ma1", "$language": "de", "title": true })).await;
    assert_eq!(game, json!({ "title": "Ajax - PSV" }));
}

#[tokio::test]
async fn text_without_language_returns_every_language() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let league = get(&arbor, json!({ "$id": "le1", "title": true })).await;
    assert_eq!(
        league,
        json!({ "title": { "en": "Dutch league", "de": "Niederländische Liga" } })
    );
}

// ── Operators ────────────────────────────────────────────────────

#[tokio::test]
async fn field_alias_takes_first_resolving_path() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let league = get(
        &arbor,
        json!({ "$id": "le1", "label": { "$field": ["published", "name"] } }),
    )
    .await;
    assert_eq!(league, json!({ "label": "Eredivisie" }));
}

#[tokio::test]
async fn field_alias_with_nested_value() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let league = get(
        &arbor,
        json!({ "$id": "le1", "pic": { "$field": { "path": "image", "value": { "thumb": true } } } }),
    )
    .await;
    assert_eq!(league, json!({ "pic": { "thumb": "le1-thumb.png" } }));
}

#[tokio::test]
async fn default_applies_only_when_missing() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let spec = json!({ "$id": "le1", "published": { "$default": false }, "name": { "$default": "?" } });
    assert_eq!(get(&arbor, spec.clone()).await, json!({ "published": false, "name": "Eredivisie" }));

    arbor.set(json!({ "$id": "le1", "published": true })).await.unwrap();
    assert_eq!(get(&arbor, spec).await, json!({ "published": true, "name": "Eredivisie" }));
}

#[tokio::test]
async fn value_nested_id_and_arrays() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let game = get(
        &arbor,
        json!({
            "$id": "ma1",
            "kind": { "$value": "fixture" },
            "league": { "$id": "le1", "name": true },
            "names": [{ "$field": "id" }, { "$value": 1 }]
        }),
    )
    .await;
    assert_eq!(
        game,
        json!({
            "kind": "fixture",
            "league": { "name": "Eredivisie" },
            "names": ["ma1", 1]
        })
    );
}

#[tokio::test]
async fn alias_lookup() {
    let arbor = arbor().await;
    let id = arbor
        .set(json!({ "type": "league", "$alias": "bundesliga", "name": "Bundesliga" }))
        .await
        .unwrap();
    assert!(id.starts_with("le"));

    let league = get(&arbor, json!({ "$alias": "bundesliga", "id": true, "aliases": true })).await;
    assert_eq!(league, json!({ "id": id, "aliases": ["bundesliga"] }));
    assert_eq!(get(&arbor, json!({ "$alias": "nope", "id": true })).await, json!({}));
}

#[tokio::test]
async fn raw_ancestors_walks_parents() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let game = get(&arbor, json!({ "$id": "ma1", "$rawAncestors": true })).await;
    assert_eq!(game, json!({ "rawAncestors": ["le1", "root"] }));
}

#[tokio::test]
async fn references_resolve_on_the_same_entity() {
    let arbor = arbor().await;
    seed_league(&arbor).await;
    arbor
        .set(json!({
            "$id": "ma1",
            "image": { "poster": "ma1-poster.png", "thumb": { "$ref": "image.poster" } }
        }))
        .await
        .unwrap();

    let game = get(&arbor, json!({ "$id": "ma1", "image": true, "$includeMeta": true })).await;
    assert_eq!(
        game["image"],
        json!({ "poster": "ma1-poster.png", "thumb": "ma1-poster.png" })
    );
    assert_eq!(game[META_KEY]["refs"]["image.poster"], json!(["image.thumb"]));
}

#[tokio::test]
async fn malformed_spec_is_rejected() {
    let arbor = arbor().await;
    let err = arbor.get(&json!({ "title": 42 })).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidSpec(_)));
}

// ── Inheritance ──────────────────────────────────────────────────

async fn seed_root_image(arbor: &arbor_engine::Arbor) {
    arbor
        .set(json!({
            "$id": "root",
            "image": { "thumb": "root-thumb.png", "poster": "root-poster.png" }
        }))
        .await
        .unwrap();
}

#[tokio::test]
async fn inherit_takes_nearest_ancestor() {
    let arbor = arbor().await;
    seed_league(&arbor).await;
    seed_root_image(&arbor).await;

    let game = get(&arbor, json!({ "$id": "ma1", "image": { "$inherit": true } })).await;
    assert_eq!(
        game,
        json!({ "image": { "thumb": "le1-thumb.png", "poster": "le1-poster.png" } })
    );
}

#[tokio::test]
async fn inherit_by_type() {
    let arbor = arbor().await;
    seed_league(&arbor).await;
    seed_root_image(&arbor).await;

    let game = get(
        &arbor,
        json!({ "$id": "ma1", "image": { "$inherit": { "$type": "root" } } }),
    )
    .await;
    assert_eq!(
        game,
        json!({ "image": { "thumb": "root-thumb.png", "poster": "root-poster.png" } })
    );
}

#[tokio::test]
async fn inherit_by_name() {
    let arbor = arbor().await;
    seed_league(&arbor).await;
    seed_root_image(&arbor).await;

    let game = get(
        &arbor,
        json!({ "$id": "ma1", "thumb": { "$field": "image.thumb", "$inherit": { "$name": "Eredivisie" } } }),
    )
    .await;
    assert_eq!(game, json!({ "thumb": "le1-thumb.png" }));
}

#[tokio::test]
async fn inherit_merges_object_properties() {
    let arbor = arbor().await;
    seed_league(&arbor).await;
    arbor
        .set(json!({ "$id": "ma1", "image": { "thumb": "ma1-thumb.png" } }))
        .await
        .unwrap();

    let game = get(
        &arbor,
        json!({ "$id": "ma1", "image": { "$inherit": { "$type": "league", "$merge": true } } }),
    )
    .await;
    assert_eq!(
        game,
        json!({ "image": { "thumb": "ma1-thumb.png", "poster": "le1-poster.png" } })
    );
}

/// root → le1 → te1 and root → le2, with titles on all three.
async fn seed_two_branches(arbor: &arbor_engine::Arbor) {
    seed_league(arbor).await;
    arbor
        .set(json!({ "$id": "le2", "title": { "en": "German league" } }))
        .await
        .unwrap();
    arbor
        .set(json!({ "$id": "te1", "parents": ["le1"], "title": { "en": "Ajax squad" } }))
        .await
        .unwrap();
}

#[tokio::test]
async fn inherit_prefers_the_longer_parent_path() {
    let arbor = arbor().await;
    seed_two_branches(&arbor).await;
    // te1 sits two levels below root, le2 one; both are direct parents.
    arbor
        .set(json!({ "$id": "ma4", "parents": ["le2", "te1"] }))
        .await
        .unwrap();

    let game = get(
        &arbor,
        json!({ "$id": "ma4", "$language": "en", "title": { "$inherit": true } }),
    )
    .await;
    assert_eq!(game, json!({ "title": "Ajax squad" }));
}

#[tokio::test]
async fn inherit_breaks_depth_ties_by_id() {
    let arbor = arbor().await;
    seed_two_branches(&arbor).await;
    arbor
        .set(json!({ "$id": "ma4", "parents": ["le2", "le1"] }))
        .await
        .unwrap();

    let game = get(
        &arbor,
        json!({ "$id": "ma4", "$language": "en", "title": { "$inherit": true } }),
    )
    .await;
    assert_eq!(game, json!({ "title": "Dutch league" }));
}

#[tokio::test]
async fn own_value_wins_over_inheritance() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let game = get(
        &arbor,
        json!({ "$id": "ma1", "$language": "en", "title": { "$inherit": true } }),
    )
    .await;
    assert_eq!(game, json!({ "title": "Ajax - PSV" }));
}

#[tokio::test]
async fn inherit_item_reruns_spec_on_ancestor() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let game = get(
        &arbor,
        json!({
            "$id": "ma1",
            "$language": "en",
            "$inherit": { "$item": "league" },
            "name": true,
            "title": true
        }),
    )
    .await;
    assert_eq!(game, json!({ "name": "Eredivisie", "title": "Dutch league" }));
}

#[tokio::test]
async fn inherit_item_without_candidates_yields_empty_object() {
    let arbor = arbor().await;
    seed_league(&arbor).await;

    let game = get(
        &arbor,
        json!({ "$id": "ma1", "team": { "$inherit": { "$item": "team" }, "name": true } }),
    )
    .await;
    assert_eq!(game, json!({ "team": {} }));
}
