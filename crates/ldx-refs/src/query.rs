//! Query result classification.
//!
//! Commands return a flat sequence of values whatever their shape. A
//! [`QueryResult`] normalizes that sequence into exactly one of three
//! shapes so display and export code never has to guess:
//!
//! 1. no values: [`ResultShape::Empty`]
//! 2. a native array value: an array result of its elements
//! 3. one array value: an array result, unwrapped
//! 4. one document with an `expr` field: the field's array unwrapped, or a
//!    `{"value": x}` document for anything else
//! 5. one document: a document result
//! 6. anything else: an array result of all values

use std::io::Write;

use ldx_types::{text, Document, Value};
use uuid::Uuid;

use crate::collection::{distinct_keys, KeyOrder};
use crate::error::Result;

/// Field that wraps expression results.
pub const EXPR_FIELD: &str = "expr";

/// Field a scalar expression result is rewrapped under.
pub const VALUE_FIELD: &str = "value";

/// The normalized shape of a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResultShape {
    Empty,
    Array,
    Document,
}

#[derive(Clone, Debug, PartialEq)]
enum Content {
    Empty,
    Array(Vec<Value>),
    Document(Document),
}

/// One classified command result.
#[derive(Clone, Debug)]
pub struct QueryResult {
    instance_id: Uuid,
    content: Content,
}

impl QueryResult {
    /// Classify the values returned by a command.
    pub fn from_values(values: Vec<Value>) -> Self {
        let content = if values.len() == 1 {
            match values.into_iter().next() {
                Some(value) => classify_single(value),
                None => Content::Empty,
            }
        } else if values.is_empty() {
            Content::Empty
        } else {
            Content::Array(values)
        };
        Self::with_content(content)
    }

    /// Classify a single value. An array is taken as the result sequence
    /// itself, even when empty.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::with_content(Content::Array(items)),
            other => Self::from_values(vec![other]),
        }
    }

    fn with_content(content: Content) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            content,
        }
    }

    pub fn shape(&self) -> ResultShape {
        match self.content {
            Content::Empty => ResultShape::Empty,
            Content::Array(_) => ResultShape::Array,
            Content::Document(_) => ResultShape::Document,
        }
    }

    pub fn is_array(&self) -> bool {
        self.shape() == ResultShape::Array
    }

    pub fn is_document(&self) -> bool {
        self.shape() == ResultShape::Document
    }

    pub fn has_value(&self) -> bool {
        self.shape() != ResultShape::Empty
    }

    /// Element count: array length, 1 for a document, 0 when empty.
    pub fn count(&self) -> usize {
        match &self.content {
            Content::Empty => 0,
            Content::Array(items) => items.len(),
            Content::Document(_) => 1,
        }
    }

    /// Unique id of this result, for views that track open results.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match &self.content {
            Content::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match &self.content {
            Content::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// The result as one value, `None` when empty.
    pub fn to_value(&self) -> Option<Value> {
        match &self.content {
            Content::Empty => None,
            Content::Array(items) => Some(Value::Array(items.clone())),
            Content::Document(doc) => Some(Value::Document(doc.clone())),
        }
    }

    /// Canonical text of the result; empty text for an empty result.
    pub fn serialize(&self, decoded: bool) -> String {
        let Some(value) = self.to_value() else {
            return String::new();
        };
        let encoded = text::encode_pretty(&value);
        if decoded {
            text::decode_non_ascii(&encoded)
        } else {
            encoded
        }
    }

    /// Write the canonical text to `writer`. Writes nothing when empty.
    pub fn serialize_to<W: Write>(&self, writer: &mut W, decoded: bool) -> Result<()> {
        if let Some(value) = self.to_value() {
            text::encode_to_writer(&value, writer, decoded)?;
        }
        Ok(())
    }

    /// Tabular view: one row per element. Documents contribute their keys
    /// as columns; scalars go under a `value` column.
    pub fn to_table(&self, order: KeyOrder) -> ResultTable {
        let rows: Vec<Value> = match &self.content {
            Content::Empty => Vec::new(),
            Content::Array(items) => items.clone(),
            Content::Document(doc) => vec![Value::Document(doc.clone())],
        };

        let mut columns = distinct_keys(
            rows.iter().filter_map(|v| v.as_document().cloned()),
            order,
        );
        if rows.iter().any(|v| !v.is_document()) && !columns.iter().any(|c| c == VALUE_FIELD) {
            columns.push(VALUE_FIELD.to_string());
        }

        let cells = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|column| match row {
                        Value::Document(doc) => doc.get(column).cloned(),
                        scalar if column == VALUE_FIELD => Some(scalar.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .collect();
        ResultTable {
            columns,
            rows: cells,
        }
    }
}

fn classify_single(value: Value) -> Content {
    match value {
        Value::Array(items) => Content::Array(items),
        Value::Document(mut doc) => match doc.remove(EXPR_FIELD) {
            Some(Value::Array(items)) => Content::Array(items),
            Some(expr) => {
                let mut wrapped = Document::new();
                wrapped.insert(VALUE_FIELD, expr);
                Content::Document(wrapped)
            }
            None => Content::Document(doc),
        },
        scalar => Content::Array(vec![scalar]),
    }
}

/// Rows and columns of a result. A missing cell is `None`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<Value>>>,
}

impl ResultTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldx_types::doc;

    // ---------------------------------------------------------------
    // Classification
    // ---------------------------------------------------------------

    #[test]
    fn no_values_is_empty() {
        let result = QueryResult::from_values(Vec::new());
        assert_eq!(result.shape(), ResultShape::Empty);
        assert!(!result.has_value());
        assert_eq!(result.count(), 0);
        assert_eq!(result.serialize(true), "");
    }

    #[test]
    fn native_array_is_array() {
        let result = QueryResult::from_value(Value::Array(vec![1.into(), 2.into()]));
        assert!(result.is_array());
        assert_eq!(result.count(), 2);

        let empty = QueryResult::from_value(Value::Array(Vec::new()));
        assert!(empty.is_array());
        assert_eq!(empty.count(), 0);
    }

    #[test]
    fn single_array_is_unwrapped() {
        let result = QueryResult::from_values(vec![Value::Array(vec![1.into(), 2.into(), 3.into()])]);
        assert!(result.is_array());
        assert_eq!(result.count(), 3);
        assert_eq!(result.as_array().unwrap()[2], Value::Int32(3));
    }

    #[test]
    fn expr_array_is_unwrapped() {
        let wrapped = doc! { "expr" => vec![Value::from(1), Value::from(2)] };
        let result = QueryResult::from_values(vec![Value::Document(wrapped)]);
        assert!(result.is_array());
        assert_eq!(result.count(), 2);
    }

    #[test]
    fn expr_scalar_becomes_value_document() {
        let result = QueryResult::from_values(vec![Value::Document(doc! { "expr" => 42 })]);
        assert!(result.is_document());
        assert_eq!(result.count(), 1);
        assert_eq!(result.as_document().unwrap(), &doc! { "value" => 42 });
    }

    #[test]
    fn single_document() {
        let doc = doc! { "_id" => 1, "name" => "ada" };
        let result = QueryResult::from_values(vec![Value::Document(doc.clone())]);
        assert!(result.is_document());
        assert_eq!(result.as_document(), Some(&doc));
    }

    #[test]
    fn scalars_are_wrapped_in_array() {
        let result = QueryResult::from_values(vec![Value::from(7)]);
        assert!(result.is_array());
        assert_eq!(result.count(), 1);

        let result = QueryResult::from_values(vec![1.into(), "two".into(), Value::Null]);
        assert!(result.is_array());
        assert_eq!(result.count(), 3);
    }

    #[test]
    fn several_documents_form_an_array() {
        let values = vec![
            Value::Document(doc! { "_id" => 1 }),
            Value::Document(doc! { "_id" => 2 }),
        ];
        let result = QueryResult::from_values(values);
        assert!(result.is_array());
        assert_eq!(result.count(), 2);
    }

    #[test]
    fn instance_ids_are_unique() {
        let a = QueryResult::from_values(Vec::new());
        let b = QueryResult::from_values(Vec::new());
        assert_ne!(a.instance_id(), b.instance_id());
    }

    // ---------------------------------------------------------------
    // Output
    // ---------------------------------------------------------------

    #[test]
    fn serialize_decodes_on_request() {
        let result = QueryResult::from_values(vec![Value::Document(doc! { "name" => "café" })]);
        assert!(result.serialize(false).contains("caf\\u00e9"));
        assert!(result.serialize(true).contains("café"));

        let mut out = Vec::new();
        result.serialize_to(&mut out, true).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), result.serialize(true));
    }

    #[test]
    fn table_mixes_documents_and_scalars() {
        let values = vec![
            Value::Document(doc! { "b" => 1, "a" => 2 }),
            Value::Document(doc! { "c" => 3 }),
            Value::from("loose"),
        ];
        let table = QueryResult::from_values(values).to_table(KeyOrder::FirstSeen);
        assert_eq!(table.columns, vec!["b", "a", "c", "value"]);
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[0], vec![Some(1.into()), Some(2.into()), None, None]);
        assert_eq!(table.rows[2], vec![None, None, None, Some("loose".into())]);

        let sorted = QueryResult::from_values(vec![Value::Document(doc! { "b" => 1, "a" => 2 })])
            .to_table(KeyOrder::Alphabetical);
        assert_eq!(sorted.columns, vec!["a", "b"]);
        assert!(QueryResult::from_values(Vec::new()).to_table(KeyOrder::FirstSeen).is_empty());
    }
}
