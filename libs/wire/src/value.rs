//! Opaque Replicated Values
//!
//! `WireValue` is the payload type carried by atoms, request args, and
//! commands. Servers treat it as opaque; the client only ever compares,
//! clones, and forwards it. Raw byte payloads (e.g. an image buffer
//! pushed by the server) ride in the `Bytes` variant without a base64
//! detour.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A structured value replicated between client and server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<WireValue>),
    Map(BTreeMap<String, WireValue>),
}

impl WireValue {
    /// Whether this is the null value
    pub fn is_null(&self) -> bool {
        matches!(self, WireValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WireValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            WireValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view; integers widen losslessly for small magnitudes
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WireValue::Float(f) => Some(*f),
            WireValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            WireValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[WireValue]> {
        match self {
            WireValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, WireValue>> {
        match self {
            WireValue::Map(entries) => Some(entries),
            _ => None,
        }
    }
}

impl Default for WireValue {
    fn default() -> Self {
        WireValue::Null
    }
}

impl From<bool> for WireValue {
    fn from(b: bool) -> Self {
        WireValue::Bool(b)
    }
}

impl From<i64> for WireValue {
    fn from(n: i64) -> Self {
        WireValue::Int(n)
    }
}

impl From<i32> for WireValue {
    fn from(n: i32) -> Self {
        WireValue::Int(n as i64)
    }
}

impl From<f64> for WireValue {
    fn from(f: f64) -> Self {
        WireValue::Float(f)
    }
}

impl From<&str> for WireValue {
    fn from(s: &str) -> Self {
        WireValue::Text(s.to_string())
    }
}

impl From<String> for WireValue {
    fn from(s: String) -> Self {
        WireValue::Text(s)
    }
}

impl From<Vec<u8>> for WireValue {
    fn from(b: Vec<u8>) -> Self {
        WireValue::Bytes(b)
    }
}

impl From<Vec<WireValue>> for WireValue {
    fn from(items: Vec<WireValue>) -> Self {
        WireValue::List(items)
    }
}

impl From<serde_json::Value> for WireValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => WireValue::Null,
            serde_json::Value::Bool(b) => WireValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    WireValue::Int(i)
                } else {
                    WireValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => WireValue::Text(s),
            serde_json::Value::Array(items) => {
                WireValue::List(items.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(entries) => WireValue::Map(
                entries.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

impl From<WireValue> for serde_json::Value {
    fn from(v: WireValue) -> Self {
        match v {
            WireValue::Null => serde_json::Value::Null,
            WireValue::Bool(b) => serde_json::Value::Bool(b),
            WireValue::Int(n) => serde_json::Value::from(n),
            WireValue::Float(f) => {
                serde_json::Number::from_f64(f).map_or(serde_json::Value::Null, Into::into)
            }
            WireValue::Text(s) => serde_json::Value::String(s),
            WireValue::Bytes(b) => {
                serde_json::Value::Array(b.into_iter().map(serde_json::Value::from).collect())
            }
            WireValue::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            WireValue::Map(entries) => serde_json::Value::Object(
                entries.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_widening() {
        assert_eq!(WireValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(WireValue::Float(0.5).as_f64(), Some(0.5));
        assert_eq!(WireValue::Text("x".into()).as_f64(), None);
    }

    #[test]
    fn json_number_split() {
        let v: WireValue = serde_json::json!({"weight": 0.5, "count": 2}).into();
        let map = v.as_map().unwrap();
        assert_eq!(map["weight"], WireValue::Float(0.5));
        assert_eq!(map["count"], WireValue::Int(2));
    }

    #[test]
    fn bytes_survive_json_round() {
        let v = WireValue::Bytes(vec![0, 127, 255]);
        let json: serde_json::Value = v.into();
        assert_eq!(json, serde_json::json!([0, 127, 255]));
    }
}
