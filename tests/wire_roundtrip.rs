//! Property tests for the wire value model: every supported value must
//! survive serialization unchanged.

use std::collections::BTreeMap;

use proptest::prelude::*;

use rigd::wire::Value;

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        // NaN breaks equality; the wire set only promises round-trips for
        // comparable values.
        (-1e12f64..1e12f64).prop_map(Value::Float),
        "[a-zA-Z0-9 _.-]{0,16}".prop_map(Value::Str),
        proptest::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
    ];
    leaf.prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Seq),
            proptest::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                .prop_map(Value::Map),
        ]
    })
}

proptest! {
    #[test]
    fn wire_values_round_trip_through_serde_json(value in arb_value()) {
        let encoded = serde_json::to_string(&value).unwrap();
        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        prop_assert_eq!(decoded, value);
    }

    #[test]
    fn wire_values_round_trip_through_yaml(value in arb_value()) {
        let encoded = serde_yaml::to_string(&value).unwrap();
        let decoded: Value = serde_yaml::from_str(&encoded).unwrap();
        prop_assert_eq!(decoded, value);
    }
}

#[test]
fn documented_example_round_trips_exactly() {
    let value = Value::Map(BTreeMap::from([
        (
            "a".to_string(),
            Value::Seq(vec![Value::Int(1), Value::Int(2), Value::Str("x".into())]),
        ),
        ("b".to_string(), Value::Bool(true)),
    ]));
    let encoded = serde_json::to_string(&value).unwrap();
    let decoded: Value = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, value);
}
