use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parameter value as it appears in the graph document.
///
/// Serialized as plain JSON so the graph document and the Action frames can
/// carry it unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null, the empty string and empty collections count as "not filled in".
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Visit every string leaf, depth first.
    pub fn for_each_str<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        match self {
            Value::String(s) => f(s),
            Value::Array(items) => {
                for v in items {
                    v.for_each_str(&mut *f);
                }
            }
            Value::Object(map) => {
                for v in map.values() {
                    v.for_each_str(&mut *f);
                }
            }
            _ => {}
        }
    }

    /// Rebuild the value with every string leaf passed through `f`.
    pub fn map_strings(&self, f: &mut impl FnMut(&str) -> String) -> Value {
        match self {
            Value::String(s) => Value::String(f(s)),
            Value::Array(items) => {
                let mut mapped = Vec::with_capacity(items.len());
                for v in items {
                    mapped.push(v.map_strings(&mut *f));
                }
                Value::Array(mapped)
            }
            Value::Object(map) => {
                let mut mapped = BTreeMap::new();
                for (k, v) in map {
                    mapped.insert(k.clone(), v.map_strings(&mut *f));
                }
                Value::Object(mapped)
            }
            other => other.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        match j {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => Value::Array(arr.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(obj) => {
                Value::Object(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
