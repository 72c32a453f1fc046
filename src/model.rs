//! Payload values and original vertex ids.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Dynamic payload value carried by vertices and edges.
///
/// Deserializes from plain JSON; objects become ordered maps so that
/// serialized forms are deterministic.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent payload.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point number.
    Float(f64),
    /// Owned string.
    Str(String),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Ordered string-keyed map.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns true for the absent payload.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Applies the duplicate-insertion merge rule.
    ///
    /// A `Null` value is replaced by the incoming one; a `Map` merges the
    /// incoming map's keys over its own; any other value wins and the
    /// incoming one is discarded.
    pub fn merge_from(&mut self, incoming: Value) {
        match (self, incoming) {
            (slot @ Value::Null, incoming) => *slot = incoming,
            (Value::Map(existing), Value::Map(incoming)) => {
                for (key, value) in incoming {
                    existing.insert(key, value);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::List(v) => write!(f, "list(len={})", v.len()),
            Value::Map(v) => write!(f, "map(len={})", v.len()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(raw: serde_json::Value) -> Self {
        match raw {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(v) => Value::Bool(v),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(v) => Value::Int(v),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(v) => Value::Str(v),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

/// Original (application-facing) vertex id.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Oid {
    /// 64-bit integer id.
    Int(i64),
    /// String id.
    Str(String),
}

impl Oid {
    /// The scalar kind of this oid.
    pub fn kind(&self) -> OidKind {
        match self {
            Oid::Int(_) => OidKind::Int,
            Oid::Str(_) => OidKind::Str,
        }
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Oid::Int(v) => write!(f, "{v}"),
            Oid::Str(v) => write!(f, "{v}"),
        }
    }
}

/// Scalar kind tag for [`Oid`]; a vertex map holds exactly one kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OidKind {
    /// Integer oids.
    Int,
    /// String oids.
    Str,
}

impl fmt::Display for OidKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OidKind::Int => write!(f, "int64"),
            OidKind::Str => write!(f, "string"),
        }
    }
}
