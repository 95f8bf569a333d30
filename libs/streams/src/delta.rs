//! Delta encoding
//!
//! Deltas are JSON merge patches: an object holding only the fields that
//! changed, with `null` marking a removed field. Merge patches cannot
//! express "set this field to null", so any change that would need that is
//! sent as a full value instead.

use codec::{encode_value, CodecResult};
use serde_json::{Map, Value};

/// Merge patch turning `old` into `new`, or `None` when the change cannot
/// be expressed as one (non-object values, or fields becoming null).
pub fn diff(old: &Value, new: &Value) -> Option<Value> {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => diff_objects(old, new).map(Value::Object),
        _ => None,
    }
}

fn diff_objects(old: &Map<String, Value>, new: &Map<String, Value>) -> Option<Map<String, Value>> {
    let mut patch = Map::new();

    for (key, new_value) in new {
        match old.get(key) {
            Some(old_value) if old_value == new_value => {}
            Some(Value::Object(old_child)) if new_value.is_object() => {
                let Value::Object(new_child) = new_value else {
                    return None;
                };
                patch.insert(key.clone(), Value::Object(diff_objects(old_child, new_child)?));
            }
            _ => {
                if contains_null(new_value) {
                    return None;
                }
                patch.insert(key.clone(), new_value.clone());
            }
        }
    }

    for key in old.keys() {
        if !new.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    Some(patch)
}

fn contains_null(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.values().any(contains_null),
        _ => false,
    }
}

/// Apply a merge patch in place
pub fn apply_delta(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in patch {
            if value.is_null() {
                map.remove(key);
            } else {
                apply_delta(map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Encoded update ready for buffering and sending
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedUpdate {
    pub data: Vec<u8>,
    pub is_delta: bool,
}

/// Choose between a delta and the full value. A delta is used only when
/// enabled, a previous value exists, and the patch is strictly smaller.
pub fn encode_update(
    previous: Option<&Value>,
    value: &Value,
    full: Vec<u8>,
    delta_enabled: bool,
) -> CodecResult<EncodedUpdate> {
    if delta_enabled {
        if let Some(patch) = previous.and_then(|prev| diff(prev, value)) {
            let encoded = encode_value(&patch)?;
            if encoded.len() < full.len() {
                return Ok(EncodedUpdate {
                    data: encoded,
                    is_delta: true,
                });
            }
        }
    }
    Ok(EncodedUpdate {
        data: full,
        is_delta: false,
    })
}
