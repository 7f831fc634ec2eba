//! Tests for the expression tree and codec.

use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use super::*;
use crate::Error;

fn ymd(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

fn every_operator_tree() -> Group {
    Group::or(vec![
        Group::and(vec![
            Leaf::new("first_name", Operator::EqualsCi, "john").into(),
            Leaf::new("last_name", Operator::ContainsCi, "oh").into(),
            Leaf::new("city", Operator::OneOfCi, "(paris|rome)").into(),
            Group::not(Leaf::new("is_staff", Operator::IsFalse, Value::Null)).into(),
        ])
        .into(),
        Group::and(vec![
            Leaf::new(
                "date_joined",
                Operator::Range,
                Value::Range(Some(ymd(1980, 1, 1)), Some(ymd(1986, 1, 1))),
            )
            .into(),
            Leaf::new("is_superuser", Operator::IsTrue, Value::Null).into(),
            Group::not(Leaf::new("is_active", Operator::IsNull, "ignored")).into(),
        ])
        .into(),
        Group::and(vec![
            Leaf::new("age", Operator::LessThan, 10i64).into(),
            Leaf::new("score", Operator::GreaterThan, 2.5f64).into(),
            Leaf::new("rank", Operator::LessOrEqual, 3i64).into(),
            Leaf::new("groups__name", Operator::GreaterOrEqual, "m").into(),
        ])
        .into(),
    ])
}

#[test]
fn test_encode_simple_leaf() {
    let codec = QueryCodec::new();
    let tree = Group::and(vec![Leaf::new("test", Operator::EqualsCi, 1234i64).into()]);

    let encoded = codec.encode(&tree.into()).unwrap();
    assert_eq!(
        encoded,
        r#"{"connector":"AND","negated":false,"children":[["test__iexact",1234]]}"#
    );
}

#[test]
fn test_decode_legacy_mapping() {
    // Bare keys and extra top-level entries from older writers are accepted.
    let codec = QueryCodec::new();
    let group = codec
        .decode(
            r#"{"connector": "AND", "negated": false, "children" :[["test", 1234]], "subtree_parents": []}"#,
        )
        .unwrap();

    assert_eq!(group.connector(), Connector::And);
    assert!(!group.is_negated());
    assert_eq!(
        group.children(),
        &[Node::Leaf(Leaf::new("test", Operator::EqualsCi, 1234i64))]
    );
}

#[test]
fn test_empty_group_round_trip() {
    let codec = QueryCodec::new();
    let encoded = codec.encode(&Group::empty().into()).unwrap();
    assert_eq!(encoded, r#"{"connector":"AND","negated":false,"children":[]}"#);

    let decoded = codec.decode(&encoded).unwrap();
    assert_eq!(decoded, Group::empty());
    assert!(decoded.is_empty());
}

#[test]
fn test_round_trip_every_operator() {
    let tree = every_operator_tree();
    assert_eq!(tree.leaf_count(), 11);

    for codec in [QueryCodec::new(), QueryCodec::base64()] {
        let encoded = codec.encode(&tree.clone().into()).unwrap();
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, tree);
    }
}

#[test]
fn test_round_trip_nested_empty_groups() {
    let codec = QueryCodec::new();
    let tree = Group::or(vec![
        Group::empty().into(),
        Group::new(Connector::Or, true, vec![Group::empty().into()]).into(),
    ]);

    let decoded = codec.decode(&codec.encode(&tree.clone().into()).unwrap()).unwrap();
    assert_eq!(decoded, tree);
}

#[test]
fn test_valueless_operators_use_sentinels() {
    let codec = QueryCodec::new();
    let tree = Group::and(vec![
        Leaf::new("is_staff", Operator::IsTrue, "yes").into(),
        Leaf::new("is_staff", Operator::IsFalse, 42i64).into(),
        Leaf::new("is_active", Operator::IsNull, "anything").into(),
    ]);

    let mapping = codec.to_mapping(&tree).unwrap();
    assert_eq!(
        serde_json::to_value(&mapping).unwrap(),
        json!({
            "connector": "AND",
            "negated": false,
            "children": [
                ["is_staff", true],
                ["is_staff", false],
                ["is_active__isnull", null],
            ]
        })
    );
}

#[test]
fn test_range_encodes_timestamps() {
    let codec = QueryCodec::new();
    let tree = Group::and(vec![Leaf::new(
        "date_joined",
        Operator::Range,
        Value::Range(Some(ymd(1980, 1, 1)), Some(ymd(1986, 1, 1))),
    )
    .into()]);

    let encoded = codec.encode(&tree.into()).unwrap();
    assert!(encoded.contains(r#"["date_joined__range",[315532800,504921600]]"#));
}

#[test]
fn test_range_open_lower_bound_defaults_to_min() {
    let codec = QueryCodec::new();
    let tree = Group::and(vec![Leaf::new(
        "date_joined",
        Operator::Range,
        Value::Range(None, Some(ymd(1986, 1, 1))),
    )
    .into()]);

    let first = codec.encode(&tree.into()).unwrap();
    assert!(first.contains(r#"[null,504921600]"#));

    let decoded = codec.decode(&first).unwrap();
    let Node::Leaf(leaf) = &decoded.children()[0] else {
        panic!("expected a leaf");
    };
    assert_eq!(
        leaf.value(),
        &Value::Range(Some(ts(TimestampBounds::DEFAULT_MIN)), Some(ymd(1986, 1, 1)))
    );

    // Stable after one normalization pass
    let second = codec.encode(&decoded.clone().into()).unwrap();
    let third = codec
        .encode(&codec.decode(&second).unwrap().into())
        .unwrap();
    assert_eq!(second, third);
    assert_eq!(codec.decode(&second).unwrap(), decoded);
}

#[test]
fn test_range_open_upper_bound_defaults_to_max() {
    let codec = QueryCodec::new();
    let tree = Group::and(vec![Leaf::new(
        "date_joined",
        Operator::Range,
        Value::Range(Some(ymd(1980, 1, 1)), None),
    )
    .into()]);

    let decoded = codec
        .decode(&codec.encode(&tree.into()).unwrap())
        .unwrap();
    let Node::Leaf(leaf) = &decoded.children()[0] else {
        panic!("expected a leaf");
    };
    assert_eq!(
        leaf.value(),
        &Value::Range(Some(ymd(1980, 1, 1)), Some(ymd(3000, 1, 1)))
    );
}

#[test]
fn test_range_zero_and_custom_bounds() {
    let codec = QueryCodec::new().with_bounds(TimestampBounds::new(100, 200));
    let group = codec
        .decode(r#"{"connector":"AND","negated":false,"children":[["d__range",[0,null]]]}"#)
        .unwrap();

    assert_eq!(
        group.children(),
        &[Node::Leaf(Leaf::new(
            "d",
            Operator::Range,
            Value::Range(Some(ts(100)), Some(ts(200)))
        ))]
    );
}

#[test]
fn test_fractional_timestamps() {
    let dt = DateTime::from_timestamp(1, 500_000_000).unwrap();
    assert_eq!(dt2ts(&dt), json!(1.5));
    assert_eq!(ts2dt(&json!(1.5)).unwrap(), dt);
    assert_eq!(dt2ts(&ts(10)), json!(10));
    assert!(matches!(ts2dt(&json!("soon")), Err(Error::Decode(_))));
}

#[test]
fn test_range_bounds_truncated_to_micros() {
    let codec = QueryCodec::new();
    let from = DateTime::from_timestamp(315532800, 123_456_789).unwrap();
    let to = DateTime::from_timestamp(504921600, 999_999_999).unwrap();
    let leaf = Leaf::new("date_joined", Operator::Range, Value::Range(Some(from), Some(to)));
    assert_eq!(
        leaf.value(),
        &Value::Range(
            DateTime::from_timestamp(315532800, 123_456_000),
            DateTime::from_timestamp(504921600, 999_999_000),
        )
    );

    let tree = Group::and(vec![leaf.into()]);
    let encoded = codec.encode(&tree.clone().into()).unwrap();
    assert_eq!(codec.decode(&encoded).unwrap(), tree);
}

#[test]
fn test_scalar_datetime_encodes_as_timestamp() {
    let codec = QueryCodec::new();
    let tree = Group::and(vec![Leaf::new("created", Operator::LessThan, ymd(1980, 1, 1)).into()]);

    let encoded = codec.encode(&tree.into()).unwrap();
    assert!(encoded.contains(r#"["created__lt",315532800]"#));

    // Scalar date-times come back as plain numbers
    let decoded = codec.decode(&encoded).unwrap();
    assert_eq!(
        decoded.children(),
        &[Node::Leaf(Leaf::new("created", Operator::LessThan, 315532800i64))]
    );
}

#[test]
fn test_base64_transport() {
    let plain = QueryCodec::new();
    let b64 = QueryCodec::base64();
    let tree = every_operator_tree();

    let json = plain.encode(&tree.clone().into()).unwrap();
    let encoded = b64.encode(&tree.clone().into()).unwrap();
    assert_eq!(encoded, STANDARD.encode(&json));

    // URL-safe alphabet is accepted as well
    let url_safe = URL_SAFE.encode(&json);
    assert_eq!(b64.decode(&url_safe).unwrap(), tree);

    // Padding stripped by URL transports
    let unpadded = URL_SAFE_NO_PAD.encode(&json);
    assert_eq!(b64.decode(&unpadded).unwrap(), tree);
    let unpadded = STANDARD.encode(&json).trim_end_matches('=').to_string();
    assert_eq!(b64.decode(&unpadded).unwrap(), tree);
}

#[test]
fn test_decode_raw_returns_mapping() {
    let codec = QueryCodec::base64();
    let tree = Group::and(vec![Leaf::new("first_name", Operator::EqualsCi, "john").into()]);
    let encoded = codec.encode(&tree.into()).unwrap();

    let mapping = codec.decode_raw(&encoded).unwrap();
    assert_eq!(
        mapping,
        QueryMapping {
            connector: Connector::And,
            negated: false,
            children: vec![MappingChild::Pair(
                "first_name__iexact".to_string(),
                json!("john")
            )],
        }
    );
}

#[test]
fn test_decode_errors() {
    let plain = QueryCodec::new();
    let b64 = QueryCodec::base64();

    assert!(matches!(plain.decode("not json"), Err(Error::Decode(_))));
    // "MQ==" is the JSON document `1`, not a mapping
    assert!(matches!(b64.decode("MQ=="), Err(Error::Decode(_))));
    assert!(matches!(b64.decode("%%%"), Err(Error::Decode(_))));
    assert!(matches!(
        plain.decode(r#"{"connector":"AND","negated":false,"children":[["d__range","2020"]]}"#),
        Err(Error::Decode(_))
    ));
    assert!(matches!(
        plain.decode(r#"{"connector":"AND","negated":false,"children":[["a","b","c"]]}"#),
        Err(Error::Decode(_))
    ));
    assert!(matches!(
        plain.decode(r#"{"connector":"AND","negated":false,"children":[["a",{"b":1}]]}"#),
        Err(Error::Decode(_))
    ));
    assert!(matches!(
        plain.decode(r#"{"connector":"XOR","negated":false,"children":[]}"#),
        Err(Error::Decode(_))
    ));
}

#[test]
fn test_encode_errors() {
    let codec = QueryCodec::new();

    let leaf_root: Node = Leaf::new("a", Operator::EqualsCi, "b").into();
    assert!(matches!(
        codec.encode(&leaf_root),
        Err(Error::SerializationType(_))
    ));

    let bad_range = Group::and(vec![Leaf::new("d", Operator::Range, "2020").into()]);
    assert!(matches!(
        codec.encode(&bad_range.into()),
        Err(Error::SerializationType(_))
    ));

    let misplaced_range = Group::and(vec![Leaf::new(
        "d",
        Operator::LessThan,
        Value::Range(None, None),
    )
    .into()]);
    assert!(matches!(
        codec.encode(&misplaced_range.into()),
        Err(Error::SerializationType(_))
    ));

    let nan = Group::and(vec![Leaf::new("n", Operator::LessThan, f64::NAN).into()]);
    assert!(matches!(
        codec.encode(&nan.into()),
        Err(Error::SerializationType(_))
    ));
}

#[test]
fn test_unknown_suffix_falls_back_to_field_path() {
    let codec = QueryCodec::new();
    let group = codec
        .decode(r#"{"connector":"AND","negated":false,"children":[["name__foo","x"]]}"#)
        .unwrap();

    assert_eq!(
        group.children(),
        &[Node::Leaf(Leaf::new("name__foo", Operator::EqualsCi, "x"))]
    );
}

#[test]
fn test_operator_named_field_is_ambiguous() {
    // A boolean field whose last segment is a lookup name is split at that
    // segment; the wire format cannot tell the two apart.
    let codec = QueryCodec::new();
    let tree = Group::and(vec![Leaf::new("price__gt", Operator::IsTrue, Value::Null).into()]);

    let decoded = codec.decode(&codec.encode(&tree.into()).unwrap()).unwrap();
    assert_eq!(
        decoded.children(),
        &[Node::Leaf(Leaf::new("price", Operator::GreaterThan, true))]
    );
}

#[test]
fn test_split_qualified_key() {
    assert_eq!(split_qualified_key("first_name__iexact"), ("first_name", Some(Operator::EqualsCi)));
    assert_eq!(split_qualified_key("groups__name__icontains"), ("groups__name", Some(Operator::ContainsCi)));
    assert_eq!(split_qualified_key("groups__name"), ("groups__name", None));
    assert_eq!(split_qualified_key("is_staff"), ("is_staff", None));
    assert_eq!(split_qualified_key("d__range"), ("d", Some(Operator::Range)));
    assert_eq!(split_qualified_key("gt"), ("gt", None));
}

#[test]
fn test_field_values_list_negated_range() {
    // ~Q(another_field__range=(1, 10))
    let codec = QueryCodec::base64();
    let tree = Group::new(
        Connector::And,
        true,
        vec![Leaf::new(
            "another_field",
            Operator::Range,
            Value::Range(Some(ts(1)), Some(ts(10))),
        )
        .into()],
    );

    let encoded = codec.encode(&tree.into()).unwrap();
    let rows = codec.decode_raw(&encoded).unwrap().field_values_list();

    assert_eq!(
        rows,
        vec![FieldValues {
            field: "another_field__range".to_string(),
            value: json!([1, 10]),
            value_from: Some(json!(1)),
            value_to: Some(json!(10)),
            negate: true,
        }]
    );
}

#[test]
fn test_field_values_list_or_separators() {
    let codec = QueryCodec::new();
    let tree = Group::or(vec![
        Group::and(vec![Leaf::new("a", Operator::EqualsCi, "1").into()]).into(),
        Group::and(vec![
            Leaf::new("b", Operator::EqualsCi, "2").into(),
            Group::not(Leaf::new("c", Operator::EqualsCi, "3")).into(),
        ])
        .into(),
        Group::and(vec![Leaf::new("d", Operator::EqualsCi, "4").into()]).into(),
    ]);

    let rows = codec.to_mapping(&tree).unwrap().field_values_list();
    let summary: Vec<(&str, bool)> = rows.iter().map(|r| (r.field.as_str(), r.negate)).collect();
    assert_eq!(
        summary,
        vec![
            ("a__iexact", false),
            ("_OR", false),
            ("b__iexact", false),
            ("c__iexact", true),
            ("_OR", false),
            ("d__iexact", false),
        ]
    );
    assert!(rows[1].is_or_separator());
    assert_eq!(rows[1].value, json!("null"));
}

#[test]
fn test_field_values_list_repeated_children() {
    // Identical alternatives still get a separator between them
    let codec = QueryCodec::new();
    let alt: Node = Group::and(vec![Leaf::new("a", Operator::EqualsCi, "1").into()]).into();
    let tree = Group::or(vec![alt.clone(), alt]);

    let rows = codec.to_mapping(&tree).unwrap().field_values_list();
    assert_eq!(rows.len(), 3);
    assert!(rows[1].is_or_separator());
}

#[test]
fn test_operator_names() {
    assert_eq!(Operator::from_lookup("iexact"), Some(Operator::EqualsCi));
    assert_eq!(Operator::from_lookup("equals_ci"), None);
    assert_eq!(Operator::from_name("equals_ci"), Some(Operator::EqualsCi));
    assert_eq!(Operator::from_name("gte"), Some(Operator::GreaterOrEqual));
    assert_eq!(Operator::IsNull.to_string(), "isnull");
    assert_eq!(Operator::OneOfCi.label(), "One of");

    let parsed: Operator = serde_json::from_str("\"is_true\"").unwrap();
    assert_eq!(parsed, Operator::IsTrue);
    assert_eq!(serde_json::to_string(&Operator::IsTrue).unwrap(), "\"istrue\"");

    let valueless: Vec<Operator> = Operator::ALL
        .into_iter()
        .filter(|op| op.is_valueless())
        .collect();
    assert_eq!(valueless, vec![Operator::IsNull, Operator::IsTrue, Operator::IsFalse]);
}

#[test]
fn test_group_display() {
    let tree = Group::and(vec![
        Leaf::new("first_name", Operator::EqualsCi, "fez").into(),
        Group::not(Leaf::new("is_staff", Operator::IsFalse, Value::Null)).into(),
    ]);

    assert_eq!(
        tree.to_string(),
        "AND\n  first_name iexact \"fez\"\n  NOT AND\n    is_staff isfalse False\n"
    );
}
