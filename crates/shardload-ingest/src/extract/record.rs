//! Decoded record model
//!
//! Each archive line decodes into a [`RawRecord`]: an ordered, sparse map from
//! field name to a tagged [`FieldValue`]. Records carry no fixed schema; the
//! per-archive [`SchemaUnion`](super::schema::SchemaUnion) accumulates field
//! names as records arrive.

use indexmap::{IndexMap, IndexSet};
use serde_json::{Number, Value};
use std::borrow::Cow;
use thiserror::Error;

/// A single field value
///
/// `Missing` (the record has no such field) and `Null` (the field is present
/// with an explicit JSON null) are distinct in memory even though both render
/// as an empty cell.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Missing,
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// Arrays and objects, kept as compact JSON text
    Nested(String),
}

impl FieldValue {
    /// Text written to a CSV cell
    pub fn render(&self) -> Cow<'_, str> {
        match self {
            FieldValue::Missing | FieldValue::Null => Cow::Borrowed(""),
            FieldValue::Bool(true) => Cow::Borrowed("true"),
            FieldValue::Bool(false) => Cow::Borrowed("false"),
            FieldValue::Number(n) => Cow::Owned(n.to_string()),
            FieldValue::String(s) => Cow::Borrowed(s),
            FieldValue::Nested(json) => Cow::Borrowed(json),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => FieldValue::Number(n),
            Value::String(s) => FieldValue::String(s),
            nested @ (Value::Array(_) | Value::Object(_)) => FieldValue::Nested(nested.to_string()),
        }
    }
}

/// Why a line could not be decoded
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),
}

static MISSING: FieldValue = FieldValue::Missing;

/// One decoded record, fields in source order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    fields: IndexMap<String, FieldValue>,
}

impl RawRecord {
    /// Decode one line. Anything other than a JSON object is rejected.
    pub fn decode(line: &[u8]) -> Result<Self, DecodeError> {
        match serde_json::from_slice::<Value>(line)? {
            Value::Object(map) => Ok(Self {
                fields: map.into_iter().map(|(k, v)| (k, FieldValue::from(v))).collect(),
            }),
            Value::Array(_) => Err(DecodeError::NotAnObject("array")),
            Value::String(_) => Err(DecodeError::NotAnObject("string")),
            Value::Number(_) => Err(DecodeError::NotAnObject("number")),
            Value::Bool(_) => Err(DecodeError::NotAnObject("boolean")),
            Value::Null => Err(DecodeError::NotAnObject("null")),
        }
    }

    /// Value for `field`, [`FieldValue::Missing`] when absent
    pub fn get(&self, field: &str) -> &FieldValue {
        self.fields.get(field).unwrap_or(&MISSING)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Keep only the fields named in `keep`
    pub fn project(mut self, keep: &IndexSet<String>) -> Self {
        self.fields.retain(|name, _| keep.contains(name));
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
        self.fields.insert(field.into(), value);
    }
}
