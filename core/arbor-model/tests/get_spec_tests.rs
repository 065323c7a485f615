use arbor_model::{
    FieldSource, GetSpec, Inherit, ModelError, Operator, Selection, SortOrder, Traverse,
};
use pretty_assertions::assert_eq;
use serde_json::json;

// ── Selections ───────────────────────────────────────────────────

#[test]
fn top_level_defaults_to_root() {
    let spec = GetSpec::from_value(&json!({ "title": true })).unwrap();
    assert_eq!(spec.id.as_deref(), Some("root"));
    assert_eq!(spec.selection("title"), Some(&Selection::Include));
}

#[test]
fn nested_and_array_selections() {
    let spec = GetSpec::from_value(&json!({
        "$id": "ma1",
        "image": { "thumb": true, "poster": false },
        "things": [{ "$field": "title" }, { "$value": 1 }]
    }))
    .unwrap();

    let Some(Selection::Nested(image)) = spec.selection("image") else {
        panic!("expected nested selection");
    };
    assert_eq!(image.selection("thumb"), Some(&Selection::Include));
    assert_eq!(image.selection("poster"), Some(&Selection::Exclude));
    assert!(image.includes("thumb"));
    assert!(!image.includes("poster"));

    let Some(Selection::Array(items)) = spec.selection("things") else {
        panic!("expected array selection");
    };
    assert_eq!(items.len(), 2);
    assert_eq!(items[1].value, Some(json!(1)));
}

#[test]
fn top_level_only_operator_rejected_in_nested_field() {
    let err = GetSpec::from_value(&json!({ "x": { "$language": "en" } })).unwrap_err();
    assert!(matches!(err, ModelError::InvalidSpec { .. }));
}

#[test]
fn unknown_operator_rejected() {
    assert!(GetSpec::from_value(&json!({ "$bogus": 1 })).is_err());
}

// ── $field ───────────────────────────────────────────────────────

#[test]
fn field_forms() {
    let spec = GetSpec::from_nested(&json!({ "$field": "title.en" }), "x").unwrap();
    assert_eq!(
        spec.field,
        Some(FieldSource {
            paths: vec!["title.en".into()],
            value: None
        })
    );

    let spec = GetSpec::from_nested(&json!({ "$field": ["a", "b"] }), "x").unwrap();
    assert_eq!(spec.field.unwrap().paths, vec!["a", "b"]);

    let spec = GetSpec::from_nested(
        &json!({ "$field": { "path": "image", "value": { "thumb": true } } }),
        "x",
    )
    .unwrap();
    let source = spec.field.unwrap();
    assert_eq!(source.paths, vec!["image"]);
    assert!(source.value.unwrap().includes("thumb"));
}

// ── $inherit ─────────────────────────────────────────────────────

#[test]
fn inherit_forms() {
    let parse = |v: serde_json::Value| GetSpec::from_nested(&json!({ "$inherit": v }), "f").unwrap().inherit;

    assert_eq!(parse(json!(true)), Some(Inherit::Ancestors));
    assert_eq!(parse(json!(false)), None);
    assert_eq!(
        parse(json!({ "$type": ["league", "region"] })),
        Some(Inherit::Type {
            types: vec!["league".into(), "region".into()],
            merge: false
        })
    );
    assert_eq!(
        parse(json!({ "$name": "Eredivisie", "$merge": true })),
        Some(Inherit::Name {
            names: vec!["Eredivisie".into()],
            merge: true
        })
    );
    assert_eq!(
        parse(json!({ "$item": "club", "$required": ["title"] })),
        Some(Inherit::Item {
            types: vec!["club".into()],
            required: vec!["title".into()]
        })
    );
}

#[test]
fn inherit_with_type_and_name_is_rejected() {
    let err = GetSpec::from_nested(
        &json!({ "$inherit": { "$type": "a", "$name": "b" } }),
        "f",
    );
    assert!(err.is_err());
}

// ── $list / $find ────────────────────────────────────────────────

#[test]
fn list_with_sort_and_find() {
    let spec = GetSpec::from_nested(
        &json!({
            "id": true,
            "$list": {
                "$sort": { "$field": "startTime", "$order": "desc" },
                "$offset": 2,
                "$limit": 10,
                "$find": {
                    "$traverse": "children",
                    "$filter": [
                        { "$field": "type", "$operator": "=", "$value": "match" },
                        {
                            "$field": "startTime",
                            "$operator": "<",
                            "$value": "now",
                            "$or": { "$field": "value", "$operator": "..", "$value": [1, 5] }
                        }
                    ]
                }
            }
        }),
        "items",
    )
    .unwrap();

    let list = spec.list.unwrap();
    assert_eq!(list.offset, 2);
    assert_eq!(list.limit, Some(10));
    assert_eq!(list.sort[0].field, "startTime");
    assert_eq!(list.sort[0].order, SortOrder::Desc);

    let find = list.find.unwrap();
    assert_eq!(find.traverse, Some(Traverse::Field("children".into())));
    assert_eq!(find.filters.len(), 2);
    assert_eq!(find.filters[1].operator, Operator::Lt);
    assert_eq!(find.filters[1].or.as_ref().unwrap().operator, Operator::Range);
}

#[test]
fn find_traverse_is_optional_and_accepts_ids() {
    let spec = GetSpec::from_nested(&json!({ "$find": {} }), "x").unwrap();
    assert_eq!(spec.find.unwrap().traverse, None);

    let spec = GetSpec::from_nested(&json!({ "$find": { "$traverse": "descendants" } }), "x").unwrap();
    assert_eq!(spec.find.unwrap().traverse.unwrap().field(), Some("descendants"));

    let spec = GetSpec::from_nested(&json!({ "$find": { "$traverse": ["a1", "b2"] } }), "x").unwrap();
    assert_eq!(
        spec.find.unwrap().traverse,
        Some(Traverse::Ids(vec!["a1".into(), "b2".into()]))
    );
}

#[test]
fn range_requires_two_bounds() {
    let spec = GetSpec::from_nested(
        &json!({ "$find": { "$filter": { "$field": "v", "$operator": "..", "$value": 3 } } }),
        "x",
    )
    .unwrap();
    assert!(spec.find.is_none());
    assert!(spec.query_error.unwrap().contains("range filter requires"));
}

#[test]
fn unsupported_operator_is_kept_on_the_field() {
    let spec = GetSpec::from_value(&json!({
        "$id": "le1",
        "name": true,
        "matches": {
            "$list": {
                "$find": { "$filter": { "$field": "v", "$operator": "~", "$value": 3 } }
            }
        }
    }))
    .unwrap();
    assert!(spec.includes("name"));
    let Some(Selection::Nested(matches)) = spec.selection("matches") else {
        panic!("matches should be a nested selection");
    };
    assert!(matches.list.is_none());
    assert!(!matches.is_empty());
    assert!(matches.query_error.as_deref().unwrap().contains("unsupported operator ~"));
}

#[test]
fn list_and_find_siblings_parse_and_are_left_to_the_engine() {
    let spec = GetSpec::from_nested(&json!({ "$list": true, "$find": {} }), "x").unwrap();
    assert!(spec.list.is_some());
    assert!(spec.find.is_some());
}

#[test]
fn item_spec_keeps_only_shape() {
    let spec = GetSpec::from_value(&json!({
        "$id": "ma1",
        "$language": "en",
        "$includeMeta": true,
        "title": true,
        "$list": true
    }))
    .unwrap();
    let item = spec.item_spec();
    assert_eq!(item.id, None);
    assert_eq!(item.language.as_deref(), Some("en"));
    assert!(item.list.is_none());
    assert!(!item.include_meta);
    assert!(item.includes("title"));
}
