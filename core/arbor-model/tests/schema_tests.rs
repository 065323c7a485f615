use arbor_model::{FieldSchema, FieldType, Schema, SearchKind, TypeSchema};
use arbor_types::FieldPath;
use serde_json::json;

fn sports_schema() -> Schema {
    let mut schema = Schema {
        languages: vec!["en".into(), "de".into()],
        ..Schema::default()
    };
    let mut league = TypeSchema::default();
    league.fields.insert(
        "name".into(),
        FieldSchema::new(FieldType::String).indexed([SearchKind::Tag]),
    );
    league.fields.insert("title".into(), FieldSchema::new(FieldType::Text));
    let mut update = Schema::default();
    update.types.insert("league".into(), league);

    let mut matches = TypeSchema {
        prefix: Some("ma".into()),
        ..TypeSchema::default()
    };
    matches.fields.insert(
        "startTime".into(),
        FieldSchema::new(FieldType::Timestamp).indexed([SearchKind::Numeric, SearchKind::Sortable]),
    );
    matches.fields.insert(
        "image".into(),
        FieldSchema::object([
            ("thumb", FieldSchema::new(FieldType::Url)),
            ("poster", FieldSchema::new(FieldType::Url)),
        ]),
    );
    update.types.insert("match".into(), matches);
    schema.merge(update).unwrap();
    schema
}

// ── Prefix mapping ───────────────────────────────────────────────

#[test]
fn merge_assigns_missing_prefix_from_type_name() {
    let schema = sports_schema();
    assert_eq!(schema.prefix_for_type("league"), Some("le"));
    assert_eq!(schema.prefix_for_type("match"), Some("ma"));
    assert_eq!(schema.prefix_to_type.get("le").map(String::as_str), Some("league"));
}

#[test]
fn type_resolves_from_id_prefix() {
    let schema = sports_schema();
    assert_eq!(schema.type_name_for_id("root"), Some("root"));
    assert_eq!(schema.type_name_for_id("le1234abcd"), Some("league"));
    assert_eq!(schema.type_name_for_id("zz00000000"), None);
}

#[test]
fn prefix_collision_is_rejected() {
    let mut schema = sports_schema();
    let mut update = Schema::default();
    update.types.insert("lemon".into(), TypeSchema::default());
    assert!(schema.merge(update).is_err());
}

#[test]
fn changing_field_type_is_rejected() {
    let mut schema = sports_schema();
    let mut update = Schema::default();
    let mut league = TypeSchema::default();
    league.fields.insert("name".into(), FieldSchema::new(FieldType::Int));
    update.types.insert("league".into(), league);
    assert!(schema.merge(update).is_err());
}

#[test]
fn merge_extends_nested_properties() {
    let mut schema = sports_schema();
    let mut update = Schema::default();
    let mut matches = TypeSchema::default();
    matches.fields.insert(
        "image".into(),
        FieldSchema::object([("icon", FieldSchema::new(FieldType::Url))]),
    );
    update.types.insert("match".into(), matches);
    schema.merge(update).unwrap();

    let image = &schema.types["match"].fields["image"];
    assert_eq!(image.properties.len(), 3);
}

// ── Field lookup ─────────────────────────────────────────────────

#[test]
fn nested_object_field_lookup() {
    let schema = sports_schema();
    let f = schema
        .field_schema("ma00000001", &FieldPath::parse("image.thumb"))
        .unwrap();
    assert_eq!(f.field_type, FieldType::Url);
    assert!(
        schema
            .field_schema("ma00000001", &FieldPath::parse("image.missing"))
            .is_none()
    );
}

#[test]
fn default_hierarchy_fields_apply_to_every_type() {
    let schema = sports_schema();
    for (field, ty) in [
        ("parents", FieldType::References),
        ("children", FieldType::References),
        ("ancestors", FieldType::Ancestors),
        ("descendants", FieldType::Descendants),
        ("type", FieldType::Type),
    ] {
        let f = schema.field_schema("le00000001", &FieldPath::parse(field)).unwrap();
        assert_eq!(f.field_type, ty, "{field}");
    }
}

#[test]
fn text_language_key_resolves_as_string() {
    let schema = sports_schema();
    let path = FieldPath::parse("title.en");
    let f = schema.field_schema("le00000001", &path).unwrap();
    assert_eq!(f.field_type, FieldType::String);
    assert!(schema.is_text_language("le00000001", &path));
    assert!(!schema.is_text_language("le00000001", &FieldPath::parse("title")));
}

#[test]
fn search_spec_found_across_types() {
    let schema = sports_schema();
    let s = schema.search_spec("startTime").unwrap();
    assert!(s.kinds.contains(&SearchKind::Numeric));
    assert!(schema.search_spec("image.thumb").is_none());
    assert!(schema.search_spec("ancestors").is_some());
    assert_eq!(schema.field_type_anywhere("startTime"), Some(FieldType::Timestamp));
}

#[test]
fn all_fields_includes_id_and_type() {
    let schema = sports_schema();
    let fields = schema.all_fields("le00000001", &FieldPath::root());
    assert!(fields.contains(&"name".to_string()));
    assert!(fields.contains(&"id".to_string()));
    assert!(fields.contains(&"type".to_string()));

    let nested = schema.all_fields("ma00000001", &FieldPath::parse("image"));
    assert_eq!(nested, vec!["poster".to_string(), "thumb".to_string()]);
}

// ── Serialization ────────────────────────────────────────────────

#[test]
fn schema_json_shape() {
    let schema = sports_schema();
    let v = serde_json::to_value(&schema).unwrap();
    assert_eq!(v["prefixToType"]["ma"], json!("match"));
    assert_eq!(v["types"]["match"]["fields"]["startTime"]["type"], json!("timestamp"));
    assert_eq!(
        v["types"]["match"]["fields"]["startTime"]["search"]["type"],
        json!(["NUMERIC", "SORTABLE"])
    );

    let back: Schema = serde_json::from_value(v).unwrap();
    assert_eq!(back, schema);
}
