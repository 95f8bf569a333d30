//! Filter evaluation
//!
//! Filters are described in `codec` so subscribers can send them; this
//! module decides whether a new value is delivered given the last value
//! the subscriber actually received.

use codec::StreamFilter;
use serde_json::Value;

/// True if `value` should be delivered to a subscriber using `filter`.
///
/// `new_encoded` and `last_encoded` are the full JSON encodings, compared
/// byte-for-byte by the `Changed` filter.
pub fn admits(filter: &StreamFilter, value: &Value, new_encoded: &[u8], last_encoded: Option<&[u8]>) -> bool {
    match filter {
        StreamFilter::PassThrough => true,
        StreamFilter::Changed => last_encoded != Some(new_encoded),
        StreamFilter::NonEmpty => !is_empty(value),
        StreamFilter::Threshold {
            field,
            comparison,
            value: constant,
        } => numeric_field(value, field).is_some_and(|n| comparison.holds(n, *constant)),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Resolve a dotted field path to a number. A bare number matches the
/// field name when the value has no fields at all.
fn numeric_field(value: &Value, field: &str) -> Option<f64> {
    if let Value::Number(n) = value {
        return n.as_f64();
    }
    let mut current = value;
    for part in field.split('.') {
        current = current.get(part)?;
    }
    current.as_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::{encode_value, Comparison};
    use serde_json::json;

    fn check(filter: &StreamFilter, value: Value, last: Option<&Value>) -> bool {
        let encoded = encode_value(&value).unwrap();
        let last_encoded = last.map(|v| encode_value(v).unwrap());
        admits(filter, &value, &encoded, last_encoded.as_deref())
    }

    #[test]
    fn test_changed_compares_encoded_bytes() {
        let a = json!({"count": 1});
        assert!(check(&StreamFilter::Changed, a.clone(), None));
        assert!(!check(&StreamFilter::Changed, a.clone(), Some(&a)));
        assert!(check(&StreamFilter::Changed, json!({"count": 2}), Some(&a)));
    }

    #[test]
    fn test_non_empty() {
        assert!(!check(&StreamFilter::NonEmpty, json!(""), None));
        assert!(!check(&StreamFilter::NonEmpty, json!([]), None));
        assert!(!check(&StreamFilter::NonEmpty, json!({}), None));
        assert!(!check(&StreamFilter::NonEmpty, Value::Null, None));
        assert!(check(&StreamFilter::NonEmpty, json!(0), None));
        assert!(check(&StreamFilter::NonEmpty, json!("x"), None));
    }

    #[test]
    fn test_threshold_on_named_field() {
        let filter = StreamFilter::threshold("count", Comparison::GreaterThan, 100.0);
        assert!(!check(&filter, json!({"count": 99}), None));
        assert!(!check(&filter, json!({"count": 100}), None));
        assert!(check(&filter, json!({"count": 101}), None));
        // Missing or non-numeric field never passes
        assert!(!check(&filter, json!({"other": 500}), None));
        assert!(!check(&filter, json!({"count": "500"}), None));
    }

    #[test]
    fn test_threshold_nested_and_bare_values() {
        let filter = StreamFilter::threshold("stats.load", Comparison::LessOrEqual, 0.5);
        assert!(check(&filter, json!({"stats": {"load": 0.25}}), None));
        assert!(!check(&filter, json!({"stats": {"load": 0.75}}), None));

        let bare = StreamFilter::threshold("count", Comparison::NotEqual, 0.0);
        assert!(check(&bare, json!(3), None));
        assert!(!check(&bare, json!(0), None));
    }
}
