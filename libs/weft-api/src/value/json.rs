//! Value ↔ JSON bridge.
//!
//! Symmetric for `{null, bool, string, numbers, array, object}`. `ptr` and
//! `buf` serialize as JSON `null`; they survive in-process but not across
//! the JSON boundary. Object insertion order is preserved in both
//! directions (serde_json is built with `preserve_order`).

use serde_json::Value as JsonValue;

use crate::error::Error;
use crate::value::Value;

impl Value {
    /// Recursive conversion from a parsed JSON tree.
    ///
    /// JSON integers become `uint64` when non-negative, `int64` otherwise;
    /// JSON floats become `float64`.
    pub fn from_json(node: &JsonValue) -> Value {
        match node {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Value::Uint64(u)
                } else if let Some(i) = n.as_i64() {
                    Value::Int64(i)
                } else {
                    Value::Float64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Invalid | Value::Null | Value::Buf(_) | Value::Ptr(_) => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int8(v) => JsonValue::from(*v),
            Value::Int16(v) => JsonValue::from(*v),
            Value::Int32(v) => JsonValue::from(*v),
            Value::Int64(v) => JsonValue::from(*v),
            Value::Uint8(v) => JsonValue::from(*v),
            Value::Uint16(v) => JsonValue::from(*v),
            Value::Uint32(v) => JsonValue::from(*v),
            Value::Uint64(v) => JsonValue::from(*v),
            Value::Float32(v) => JsonValue::from(*v as f64),
            Value::Float64(v) => JsonValue::from(*v),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(kv) => {
                let mut map = serde_json::Map::with_capacity(kv.len());
                for (k, v) in kv {
                    map.insert(k.clone(), v.to_json());
                }
                JsonValue::Object(map)
            }
        }
    }

    /// Parse a JSON string into a Value.
    pub fn from_json_str(text: &str) -> Result<Value, Error> {
        let node: JsonValue = serde_json::from_str(text)?;
        Ok(Value::from_json(&node))
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }
}
