use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;
use crate::object_id::ObjectId;
use crate::text;

/// Name of the identity field carried by every stored document.
pub const ID_FIELD: &str = "_id";

/// A typed value inside a document tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    ObjectId(ObjectId),
    Guid(Uuid),
    DateTime(DateTime<Utc>),
    Array(Vec<Value>),
    Document(Document),
}

impl Value {
    /// Short type name used in error messages and table headers.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Binary(_) => "binary",
            Self::ObjectId(_) => "objectId",
            Self::Guid(_) => "guid",
            Self::DateTime(_) => "dateTime",
            Self::Array(_) => "array",
            Self::Document(_) => "document",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    pub fn is_document(&self) -> bool {
        matches!(self, Self::Document(_))
    }

    /// Whether this value is a scalar (neither array nor document).
    pub fn is_scalar(&self) -> bool {
        !self.is_array() && !self.is_document()
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of numeric values. Doubles are truncated only when they
    /// hold an integral value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            Self::Double(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    /// Consume into a document, failing for any other type.
    pub fn into_document(self) -> Result<Document, TypeError> {
        match self {
            Self::Document(doc) => Ok(doc),
            other => Err(TypeError::UnexpectedType {
                expected: "document",
                found: other.type_name(),
            }),
        }
    }

    /// Plain text for scalars, `None` for null, arrays and documents.
    ///
    /// Used for delimited text cells, where nested values have no
    /// representation.
    pub fn raw_text(&self) -> Option<String> {
        match self {
            Self::Null | Self::Array(_) | Self::Document(_) => None,
            Self::Boolean(v) => Some(v.to_string()),
            Self::Int32(v) => Some(v.to_string()),
            Self::Int64(v) => Some(v.to_string()),
            Self::Double(v) => Some(v.to_string()),
            Self::String(v) => Some(v.clone()),
            Self::Binary(v) => Some(text::encode_binary(v)),
            Self::ObjectId(v) => Some(v.to_hex()),
            Self::Guid(v) => Some(v.to_string()),
            Self::DateTime(v) => Some(text::format_datetime(v)),
        }
    }

    /// Human-readable rendering: scalars as plain text, nested values as
    /// decoded canonical text.
    pub fn display_text(&self) -> String {
        match self.raw_text() {
            Some(s) => s,
            None if self.is_null() => String::new(),
            None => text::decode_non_ascii(&text::encode(self)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&text::encode(self))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Self::ObjectId(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Guid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTime(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Self::Document(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// An insertion-ordered map of field names to values.
///
/// Equality ignores field order: two documents are equal when they hold the
/// same keys with equal values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(IndexMap<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Create a document holding only the given identity value.
    pub fn with_id(id: impl Into<Value>) -> Self {
        let mut doc = Self::new();
        doc.insert(ID_FIELD, id);
        doc
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert or overwrite a field, returning the previous value.
    ///
    /// Overwriting keeps the field's original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove a field, preserving the order of the remaining fields.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The identity value (`_id`), if present.
    pub fn id(&self) -> Option<&Value> {
        self.get(ID_FIELD)
    }

    /// Canonical text of the identity value, used as the lookup key.
    pub fn identity_key(&self) -> Option<String> {
        self.id().map(identity_key)
    }

    /// Place `_id` first, as stores conventionally present it.
    pub fn move_id_first(&mut self) {
        if let Some(index) = self.0.get_index_of(ID_FIELD) {
            self.0.move_index(index, 0);
        }
    }
}

/// Canonical lookup key for an identity value.
pub fn identity_key(id: &Value) -> String {
    text::encode(id)
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Build a [`Document`] from `key => value` pairs.
///
/// ```
/// use ldx_types::{doc, Value};
///
/// let d = doc! { "_id" => 1, "name" => "ada" };
/// assert_eq!(d.get("name"), Some(&Value::from("ada")));
/// ```
#[macro_export]
macro_rules! doc {
    () => { $crate::Document::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut doc = $crate::Document::new();
        $( doc.insert($key, $value); )+
        doc
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn insert_preserves_order() {
        let d = doc! { "b" => 1, "a" => 2, "c" => 3 };
        let keys: Vec<&str> = d.keys().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn overwrite_keeps_position() {
        let mut d = doc! { "a" => 1, "b" => 2 };
        let old = d.insert("a", 10);
        assert_eq!(old, Some(Value::Int32(1)));
        let keys: Vec<&str> = d.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn remove_preserves_remaining_order() {
        let mut d = doc! { "a" => 1, "b" => 2, "c" => 3 };
        d.remove("b");
        let keys: Vec<&str> = d.keys().collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn equality_ignores_field_order() {
        let a = doc! { "x" => 1, "y" => 2 };
        let b = doc! { "y" => 2, "x" => 1 };
        assert_eq!(a, b);
    }

    #[test]
    fn identity_key_distinguishes_types() {
        let int_id = Document::with_id(1);
        let long_id = Document::with_id(1i64);
        let str_id = Document::with_id("1");
        assert_ne!(int_id.identity_key(), long_id.identity_key());
        assert_ne!(int_id.identity_key(), str_id.identity_key());
        assert_eq!(str_id.identity_key().as_deref(), Some("\"1\""));
    }

    #[test]
    fn move_id_first() {
        let mut d = doc! { "name" => "x", "_id" => 5 };
        d.move_id_first();
        assert_eq!(d.keys().next(), Some("_id"));
    }

    #[test]
    fn raw_text_skips_nested_values() {
        assert_eq!(Value::from(3).raw_text().as_deref(), Some("3"));
        assert_eq!(Value::Null.raw_text(), None);
        assert_eq!(Value::Array(vec![]).raw_text(), None);
        assert_eq!(Value::Document(Document::new()).raw_text(), None);
    }

    #[test]
    fn display_text_decodes_nested_values() {
        let v = Value::Array(vec![Value::from("café")]);
        assert_eq!(v.display_text(), "[\"café\"]");
    }

    #[test]
    fn into_document_rejects_scalars() {
        let err = Value::from(1).into_document().unwrap_err();
        assert_eq!(
            err,
            TypeError::UnexpectedType {
                expected: "document",
                found: "int32"
            }
        );
    }

    #[test]
    fn as_i64_widens_integers() {
        assert_eq!(Value::Int32(7).as_i64(), Some(7));
        assert_eq!(Value::Double(2.0).as_i64(), Some(2));
        assert_eq!(Value::Double(2.5).as_i64(), None);
    }
}
