use std::collections::HashMap;
use std::fmt;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// A runtime value flowing between components, the store, and expressions.
///
/// Scope objects are duck-typed in the source schemas, so the engine models
/// them as a closed tagged variant instead of probing dynamic properties.
/// `Undefined` is distinct from `Null`: an absent store field or an empty
/// expression reads as `Undefined`, while `null` is an explicit literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

/// Named values visible to an expression during evaluation.
pub type Scope = HashMap<String, Value>;

impl Default for Value {
    fn default() -> Self {
        Value::Undefined
    }
}

impl Value {
    /// JS-like truthiness: `false`, `0`, `NaN`, `""`, `null` and `undefined`
    /// are falsy; everything else (including empty arrays and objects) is
    /// truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    /// Short tag used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Stringification used when an expression result is spliced into
    /// surrounding literal text. Numbers print without a trailing `.0`,
    /// containers print as JSON.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => {
                serde_json::to_string(&self.to_json()).unwrap_or_else(|_| String::new())
            }
        }
    }

    /// Looks up a field on an object value. Anything else has no fields.
    pub fn get_field(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(fields) => fields.get(key),
            _ => None,
        }
    }

    /// Walks a dotted path (`"input1.value"`, `"fetch.data.0.id"`) into the
    /// value. Missing segments resolve to `Undefined` rather than an error,
    /// matching the store contract where absence means `undefined`.
    pub fn get_path(&self, path: &str) -> Value {
        let mut current = self;
        for segment in path.split('.') {
            current = match current {
                Value::Object(fields) => match fields.get(segment) {
                    Some(v) => v,
                    None => return Value::Undefined,
                },
                Value::Array(items) => {
                    match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                        Some(v) => v,
                        None => return Value::Undefined,
                    }
                }
                _ => return Value::Undefined,
            };
        }
        current.clone()
    }

    /// Converts to a `serde_json::Value`. `Undefined` maps to JSON null and
    /// whole numbers serialize without a fractional part.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 9e15 {
                    serde_json::Value::Number(serde_json::Number::from(*n as i64))
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::Number(f64::NAN).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());

        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Number(-1.0).is_truthy());
        assert!(Value::String("0".to_string()).is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
        assert!(Value::Object(HashMap::new()).is_truthy());
    }

    #[test]
    fn test_display_string() {
        assert_eq!(Value::Undefined.to_display_string(), "undefined");
        assert_eq!(Value::Null.to_display_string(), "null");
        assert_eq!(Value::Bool(true).to_display_string(), "true");
        assert_eq!(Value::Number(5.0).to_display_string(), "5");
        assert_eq!(Value::Number(3.14).to_display_string(), "3.14");
        assert_eq!(Value::from("hello").to_display_string(), "hello");
        assert_eq!(Value::from(json!([1, 2, 3])).to_display_string(), "[1,2,3]");
    }

    #[test]
    fn test_json_round_trip() {
        let original = json!({
            "value": "Hello",
            "count": 3,
            "nested": {"flag": true, "items": [1, 2.5, null]}
        });
        let value = Value::from(original.clone());
        assert_eq!(value.to_json(), original);
    }

    #[test]
    fn test_get_path() {
        let value = Value::from(json!({
            "input1": {"value": "world"},
            "fetch": {"data": [{"id": 1}, {"id": 2}]}
        }));

        assert_eq!(value.get_path("input1.value"), Value::from("world"));
        assert_eq!(value.get_path("fetch.data.1.id"), Value::Number(2.0));
        assert_eq!(value.get_path("missing.anything"), Value::Undefined);
        assert_eq!(value.get_path("input1.value.deeper"), Value::Undefined);
    }

    #[test]
    fn test_undefined_serializes_as_null() {
        let json = serde_json::to_value(Value::Undefined).unwrap();
        assert_eq!(json, serde_json::Value::Null);
    }
}
