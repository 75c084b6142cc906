//! Platform-agnostic status types for networked air purifiers.
//!
//! This crate provides the shared data shapes used by the polling manager
//! (airpoll-core) and by anything that consumes its output, such as a
//! home-automation plugin.
//!
//! # Features
//!
//! - Primitive status values and snapshots
//! - Normalization of the inconsistent payload shapes device clients return
//! - Transport protocol tags
//! - Device id derivation from addresses
//!
//! # Example
//!
//! ```
//! use airpoll_types::{Snapshot, StatusPayload, StatusValue};
//!
//! let mut map = Snapshot::new();
//! map.insert("pwr".into(), StatusValue::from("1"));
//!
//! // A tuple-shaped reply collapses to its first element
//! let payload = StatusPayload::Composite(vec![StatusPayload::Mapping(map.clone())]);
//! assert_eq!(payload.normalize(), map);
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{
    DEFAULT_PORT, Protocol, RAW_STATUS_KEY, Snapshot, StatusPayload, StatusValue,
    device_id_for_address,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        let mut map = Snapshot::new();
        map.insert("pwr".to_string(), StatusValue::from("1"));
        map.insert("pm25".to_string(), StatusValue::Int(12));
        map
    }

    // --- Normalization ---

    #[test]
    fn test_normalize_mapping_is_identity() {
        assert_eq!(StatusPayload::Mapping(sample()).normalize(), sample());
    }

    #[test]
    fn test_normalize_composite_takes_first_element() {
        let payload = StatusPayload::Composite(vec![
            StatusPayload::Mapping(sample()),
            StatusPayload::Scalar(StatusValue::Int(99)),
        ]);
        assert_eq!(payload.normalize(), sample());
    }

    #[test]
    fn test_normalize_empty_composite() {
        assert!(StatusPayload::Composite(Vec::new()).normalize().is_empty());
    }

    #[test]
    fn test_normalize_empty_and_null() {
        assert!(StatusPayload::Empty.normalize().is_empty());
        assert!(StatusPayload::Scalar(StatusValue::Null).normalize().is_empty());
    }

    #[test]
    fn test_normalize_scalar_wraps_under_raw_key() {
        let snapshot = StatusPayload::Scalar(StatusValue::from("garbled")).normalize();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.get(RAW_STATUS_KEY),
            Some(&StatusValue::Text("garbled".to_string()))
        );
    }

    #[test]
    fn test_normalize_composite_with_scalar_first() {
        let payload = StatusPayload::Composite(vec![StatusPayload::Scalar(StatusValue::Bool(true))]);
        let snapshot = payload.normalize();
        assert_eq!(snapshot.get(RAW_STATUS_KEY), Some(&StatusValue::Bool(true)));
    }

    #[test]
    fn test_payload_from_option() {
        assert_eq!(StatusPayload::from(None), StatusPayload::Empty);
        assert_eq!(
            StatusPayload::from(Some(sample())),
            StatusPayload::Mapping(sample())
        );
    }

    // --- Loose value parsing ---

    #[test]
    fn test_parse_loose_booleans() {
        assert_eq!(StatusValue::parse_loose("true"), StatusValue::Bool(true));
        assert_eq!(StatusValue::parse_loose("False"), StatusValue::Bool(false));
    }

    #[test]
    fn test_parse_loose_numbers() {
        assert_eq!(StatusValue::parse_loose("42"), StatusValue::Int(42));
        assert_eq!(StatusValue::parse_loose("0.5"), StatusValue::Float(0.5));
        // A sign is not a digit, so this stays text
        assert_eq!(
            StatusValue::parse_loose("-1"),
            StatusValue::Text("-1".to_string())
        );
    }

    #[test]
    fn test_parse_loose_huge_integer_becomes_float() {
        let value = StatusValue::parse_loose("99999999999999999999999");
        assert!(matches!(value, StatusValue::Float(_)));
    }

    #[test]
    fn test_parse_loose_text() {
        assert_eq!(StatusValue::parse_loose(""), StatusValue::Text(String::new()));
        assert_eq!(
            StatusValue::parse_loose("a1"),
            StatusValue::Text("a1".to_string())
        );
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(StatusValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(StatusValue::Bool(true).as_bool(), Some(true));
        assert_eq!(StatusValue::from("M").as_str(), Some("M"));
        assert!(StatusValue::Null.is_null());
        assert_eq!(StatusValue::Text("x".into()).as_i64(), None);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(StatusValue::Null.to_string(), "null");
        assert_eq!(StatusValue::Int(-4).to_string(), "-4");
        assert_eq!(StatusValue::from("AG").to_string(), "AG");
    }

    // --- Protocol ---

    #[test]
    fn test_protocol_parse_and_display() {
        assert_eq!("coaps".parse::<Protocol>().unwrap(), Protocol::Coaps);
        assert_eq!(" COAP ".parse::<Protocol>().unwrap(), Protocol::Coap);
        assert_eq!("http".parse::<Protocol>().unwrap(), Protocol::Http);
        assert_eq!(Protocol::Coaps.to_string(), "coaps");
        assert_eq!(Protocol::default(), Protocol::Coaps);
        assert!(Protocol::Coaps.is_secure());
        assert!(!Protocol::Coap.is_secure());
    }

    #[test]
    fn test_protocol_parse_unknown() {
        let err = "mqtt".parse::<Protocol>().unwrap_err();
        assert_eq!(err, ParseError::UnknownProtocol("mqtt".to_string()));
        assert!(err.to_string().contains("mqtt"));
    }

    #[test]
    fn test_device_id_for_address() {
        assert_eq!(device_id_for_address("10.0.0.7"), "device_10_0_0_7");
        assert_eq!(device_id_for_address("purifier"), "device_purifier");
    }

    // --- Serialization ---

    #[cfg(feature = "serde")]
    #[test]
    fn test_snapshot_json_roundtrip() {
        let mut map = sample();
        map.insert("child_lock".to_string(), StatusValue::Bool(false));
        map.insert("ratio".to_string(), StatusValue::Float(0.25));
        map.insert("err".to_string(), StatusValue::Null);

        let json = serde_json::to_string(&map).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_status_value_untagged_shapes() {
        let json = r#"{"a": 1, "b": true, "c": "x", "d": 1.5, "e": null}"#;
        let map: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(map["a"], StatusValue::Int(1));
        assert_eq!(map["b"], StatusValue::Bool(true));
        assert_eq!(map["c"], StatusValue::Text("x".to_string()));
        assert_eq!(map["d"], StatusValue::Float(1.5));
        assert_eq!(map["e"], StatusValue::Null);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_protocol_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Protocol::Coaps).unwrap(), "\"coaps\"");
        let p: Protocol = serde_json::from_str("\"http\"").unwrap();
        assert_eq!(p, Protocol::Http);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn value_strategy() -> impl Strategy<Value = StatusValue> {
            prop_oneof![
                Just(StatusValue::Null),
                any::<bool>().prop_map(StatusValue::Bool),
                any::<i64>().prop_map(StatusValue::Int),
                "[a-z]{0,8}".prop_map(StatusValue::Text),
            ]
        }

        proptest! {
            #[test]
            fn normalize_always_yields_at_most_raw_key_for_scalars(value in value_strategy()) {
                let is_null = value.is_null();
                let snapshot = StatusPayload::Scalar(value).normalize();
                if is_null {
                    prop_assert!(snapshot.is_empty());
                } else {
                    prop_assert_eq!(snapshot.len(), 1);
                    prop_assert!(snapshot.contains_key(RAW_STATUS_KEY));
                }
            }

            #[test]
            fn normalize_composite_matches_first(
                keys in proptest::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..8),
                tail in 0usize..4,
            ) {
                let map: Snapshot = keys.into_iter().map(|(k, v)| (k, StatusValue::Int(v))).collect();
                let mut items = vec![StatusPayload::Mapping(map.clone())];
                items.extend((0..tail).map(|_| StatusPayload::Empty));
                prop_assert_eq!(StatusPayload::Composite(items).normalize(), map);
            }

            #[test]
            fn parse_loose_digits_are_ints(n in 0u32..1_000_000) {
                prop_assert_eq!(StatusValue::parse_loose(&n.to_string()), StatusValue::Int(i64::from(n)));
            }
        }
    }
}
