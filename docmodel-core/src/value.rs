//! The document value tree exchanged with store backends.
//!
//! A [`Value`] is the database-neutral shape of a persisted document: scalars, ordered
//! lists, and string-keyed mappings. Typed models are converted to and from this tree by
//! the [`codec`](crate::codec) module; backends translate it into their native format
//! (BSON for MongoDB, or kept as-is by the in-memory store).

use bson::{Binary, Bson, Document as BsonDocument, spec::BinarySubtype};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, ops::Deref};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// A document body: field name to value, with unique keys.
pub type Map = BTreeMap<String, Value>;

/// A node of a document tree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// Every integer type is widened to a signed 64-bit integer.
    Integer(i64),
    /// A floating point number. Typed models cannot produce or consume these yet.
    Double(f64),
    /// A UTF-8 string.
    String(String),
    /// An opaque byte sequence.
    Bytes(Vec<u8>),
    /// A point in time.
    Timestamp(DateTime<Utc>),
    /// An ordered list of values.
    Array(Vec<Value>),
    /// A nested mapping.
    Map(Map),
    /// Write-only sentinel: the store replaces it with its own write time.
    ServerTimestamp,
}

impl Value {
    /// Returns a short human readable name of this value's variant.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "timestamp",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::ServerTimestamp => "server timestamp",
        }
    }

    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the mapping payload, if this is a map.
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the list payload, if this is an array.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Replaces every [`Value::ServerTimestamp`] sentinel in this tree with `now`.
    pub fn resolve_server_timestamps(&mut self, now: DateTime<Utc>) {
        match self {
            Value::ServerTimestamp => *self = Value::Timestamp(now),
            Value::Array(items) => items
                .iter_mut()
                .for_each(|item| item.resolve_server_timestamps(now)),
            Value::Map(map) => map
                .values_mut()
                .for_each(|item| item.resolve_server_timestamps(now)),
            _ => {}
        }
    }

    /// Renders this value as JSON, for diagnostics and test assertions.
    ///
    /// Timestamps become RFC 3339 strings and byte sequences become arrays of numbers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Double(d) => serde_json::Value::from(*d),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::from(b.clone()),
            Value::Timestamp(t) => serde_json::Value::String(t.to_rfc3339()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::ServerTimestamp => serde_json::Value::String("<server timestamp>".to_string()),
        }
    }
}

/// Resolves a map body's sentinels in place; see [`Value::resolve_server_timestamps`].
pub fn resolve_map_server_timestamps(map: &mut Map, now: DateTime<Utc>) {
    map.values_mut()
        .for_each(|v| v.resolve_server_timestamps(now));
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl From<Blob> for Value {
    fn from(value: Blob) -> Self {
        Value::Bytes(value.0)
    }
}

impl From<Map> for Value {
    fn from(value: Map) -> Self {
        Value::Map(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

impl From<Value> for Bson {
    /// Converts into BSON. A remaining [`Value::ServerTimestamp`] sentinel becomes the
    /// current time at conversion.
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Bson::Null,
            Value::Bool(b) => Bson::Boolean(b),
            Value::Integer(i) => Bson::Int64(i),
            Value::Double(d) => Bson::Double(d),
            Value::String(s) => Bson::String(s),
            Value::Bytes(bytes) => Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes,
            }),
            Value::Timestamp(t) => Bson::DateTime(bson::DateTime::from_chrono(t)),
            Value::Array(items) => Bson::Array(items.into_iter().map(Bson::from).collect()),
            Value::Map(map) => Bson::Document(map_to_bson(map)),
            Value::ServerTimestamp => Bson::DateTime(bson::DateTime::now()),
        }
    }
}

/// Converts a document body into a BSON document.
pub fn map_to_bson(map: Map) -> BsonDocument {
    map.into_iter()
        .map(|(k, v)| (k, Bson::from(v)))
        .collect()
}

/// Converts a BSON document into a document body.
pub fn map_from_bson(document: BsonDocument) -> DocumentStoreResult<Map> {
    document
        .into_iter()
        .map(|(k, v)| Value::try_from(v).map(|v| (k, v)))
        .collect()
}

impl TryFrom<Bson> for Value {
    type Error = DocumentStoreError;

    fn try_from(bson: Bson) -> DocumentStoreResult<Self> {
        Ok(match bson {
            Bson::Null | Bson::Undefined => Value::Null,
            Bson::Boolean(b) => Value::Bool(b),
            Bson::Int32(i) => Value::Integer(i as i64),
            Bson::Int64(i) => Value::Integer(i),
            Bson::Double(d) => Value::Double(d),
            Bson::String(s) => Value::String(s),
            Bson::Binary(binary) => Value::Bytes(binary.bytes),
            Bson::DateTime(t) => Value::Timestamp(t.to_chrono()),
            Bson::ObjectId(oid) => Value::String(oid.to_hex()),
            Bson::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<DocumentStoreResult<Vec<_>>>()?,
            ),
            Bson::Document(doc) => Value::Map(map_from_bson(doc)?),
            other => {
                return Err(DocumentStoreError::Serialization(format!(
                    "unsupported BSON element type {:?}",
                    other.element_type()
                )));
            }
        })
    }
}

/// An opaque byte sequence stored as a single scalar.
///
/// `Vec<u8>` would be treated as a list of small integers; wrap bytes in `Blob` to keep
/// them together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Blob(pub Vec<u8>);

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Blob(bytes)
    }
}

impl Deref for Blob {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}
