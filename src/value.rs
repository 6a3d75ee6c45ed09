//! Per-conversation data values
//!
//! Conversation data is a string-keyed map of a small closed set of value
//! types. Reads go through typed accessors that report missing keys and
//! type mismatches as [`DataError`] instead of panicking.

use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use thiserror::Error;

/// A single data value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    /// Must be finite: JSON cannot carry NaN or infinities, so durable
    /// stores refuse to serialize them
    #[serde(serialize_with = "serialize_finite")]
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

#[allow(clippy::trivially_copy_pass_by_ref)] // signature fixed by serde
fn serialize_finite<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else {
        Err(S::Error::custom(format!("non-finite float {value} cannot be stored")))
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
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

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    #[error("Missing data key: {0}")]
    Missing(String),
    #[error("Data key {key} holds {actual}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Free-form data scoped to one conversation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationData(BTreeMap<String, Value>);

impl ConversationData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    fn require(&self, key: &str) -> Result<&Value, DataError> {
        self.0
            .get(key)
            .ok_or_else(|| DataError::Missing(key.to_string()))
    }

    fn mismatch(key: &str, expected: &'static str, actual: &Value) -> DataError {
        DataError::TypeMismatch {
            key: key.to_string(),
            expected,
            actual: actual.type_name(),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<&str, DataError> {
        match self.require(key)? {
            Value::Text(s) => Ok(s),
            other => Err(Self::mismatch(key, "text", other)),
        }
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, DataError> {
        match self.require(key)? {
            Value::Int(n) => Ok(*n),
            other => Err(Self::mismatch(key, "int", other)),
        }
    }

    /// Integers widen to floats on read
    #[allow(clippy::cast_precision_loss)]
    pub fn get_f64(&self, key: &str) -> Result<f64, DataError> {
        match self.require(key)? {
            Value::Float(n) => Ok(*n),
            Value::Int(n) => Ok(*n as f64),
            other => Err(Self::mismatch(key, "float", other)),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, DataError> {
        match self.require(key)? {
            Value::Bool(b) => Ok(*b),
            other => Err(Self::mismatch(key, "bool", other)),
        }
    }

    pub fn get_list(&self, key: &str) -> Result<&[Value], DataError> {
        match self.require(key)? {
            Value::List(items) => Ok(items),
            other => Err(Self::mismatch(key, "list", other)),
        }
    }

    pub fn get_map(&self, key: &str) -> Result<&BTreeMap<String, Value>, DataError> {
        match self.require(key)? {
            Value::Map(map) => Ok(map),
            other => Err(Self::mismatch(key, "map", other)),
        }
    }
}

impl FromIterator<(String, Value)> for ConversationData {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, Value>> for ConversationData {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}
