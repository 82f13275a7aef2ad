//! Conversions between [`Value`] and `serde_json::Value`.

use crate::error::{ValueError, ValueResult};
use crate::value::{Attributes, Value};
use serde_json::{Map, Number};

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => number_to_value(&n),
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Integer(n) => serde_json::Value::Number(n.into()),
            // Non-finite floats have no JSON form.
            Value::Float(x) => Number::from_f64(x)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, v.into()))
                    .collect::<Map<String, serde_json::Value>>(),
            ),
        }
    }
}

fn number_to_value(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Integer(i)
    } else {
        // u64 beyond i64::MAX and real numbers both land here.
        n.as_f64().map_or(Value::Null, Value::Float)
    }
}

/// Converts a JSON object into an attribute map.
///
/// Fails if `json` is not an object, or if it holds an unsigned integer too
/// large for an `i64` (the value would otherwise silently lose precision).
pub fn attributes(json: serde_json::Value) -> ValueResult<Attributes> {
    match json {
        serde_json::Value::Object(map) => {
            let mut attrs = Attributes::new();
            for (key, value) in map {
                check_numbers(&value)?;
                attrs.insert(key, Value::from(value));
            }
            Ok(attrs)
        }
        other => Err(ValueError::not_an_object(json_kind(&other))),
    }
}

fn check_numbers(json: &serde_json::Value) -> ValueResult<()> {
    match json {
        serde_json::Value::Number(n) if n.is_u64() && n.as_i64().is_none() => {
            Err(ValueError::number_out_of_range(n.to_string()))
        }
        serde_json::Value::Array(items) => items.iter().try_for_each(check_numbers),
        serde_json::Value::Object(map) => map.values().try_for_each(check_numbers),
        _ => Ok(()),
    }
}

fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
