//! Decoded value types handed to the host.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// A decoded or derived value.
///
/// Raw register values that need no scaling stay integers; anything scaled
/// or rounded becomes a float. Derived status keys are text.
///
/// ```rust
/// use systemair_modbus::Value;
///
/// let temp = Value::Float(21.5);
/// assert_eq!(temp.as_f64(), Some(21.5));
/// assert_eq!(Value::Int(3).as_i64(), Some(3));
/// assert_eq!(Value::from("ok").as_str(), Some("ok"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Numeric view; `None` for text.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Text(_) => None,
        }
    }

    /// Integer view. Floats are truncated toward zero, matching how status
    /// codes read through a scaled definition are interpreted.
    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.is_finite() => Some(v.trunc() as i64),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// Flat key → value mapping produced by one poll cycle.
///
/// Keys whose read or decode failed are absent.
pub type DecodedValueMap = BTreeMap<&'static str, Value>;
