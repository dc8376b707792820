//! Serialize a selection of documents as one array.

use std::io::Write;
use std::rc::Rc;

use ldx_types::{text, Value};

use crate::document::DocumentReference;
use crate::error::Result;

/// A selection of documents, possibly from different collections.
#[derive(Clone, Debug, Default)]
pub struct DocumentAggregator {
    documents: Vec<Rc<DocumentReference>>,
}

impl DocumentAggregator {
    pub fn new(documents: Vec<Rc<DocumentReference>>) -> Self {
        Self { documents }
    }

    pub fn documents(&self) -> &[Rc<DocumentReference>] {
        &self.documents
    }

    /// Current contents as an array of documents.
    pub fn value(&self) -> Value {
        Value::Array(
            self.documents
                .iter()
                .map(|d| Value::Document(d.snapshot()))
                .collect(),
        )
    }

    pub fn serialize(&self, decoded: bool) -> String {
        let encoded = text::encode_pretty(&self.value());
        if decoded {
            text::decode_non_ascii(&encoded)
        } else {
            encoded
        }
    }

    pub fn serialize_to<W: Write>(&self, writer: &mut W, decoded: bool) -> Result<()> {
        text::encode_to_writer(&self.value(), writer, decoded)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseReference, OpenOptions};
    use ldx_store::InMemoryStore;
    use ldx_types::doc;

    #[test]
    fn aggregates_current_contents() {
        let db = DatabaseReference::from_store(Box::new(InMemoryStore::new()), &OpenOptions::default())
            .unwrap();
        let people = db.add_collection("people").unwrap();
        let a = people.add_document(doc! { "_id" => 1, "name" => "ada" }).unwrap();
        let b = people.add_document(doc! { "_id" => 2, "name" => "zoë" }).unwrap();

        let aggregate = DocumentAggregator::new(vec![a.clone(), b]);
        a.set("name", "grace").unwrap();

        let value = aggregate.value();
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0].as_document().unwrap().get("name"),
            Some(&Value::from("grace"))
        );
        assert!(aggregate.serialize(true).contains("zoë"));
        assert!(!aggregate.serialize(false).contains("zoë"));
        assert_eq!(text::parse(&aggregate.serialize(false)).unwrap(), value);
    }
}
