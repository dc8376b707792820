//! JSON export.
//!
//! A single document is written as an object, several as an array. Output
//! is decoded canonical text, so non-ASCII characters appear as themselves.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

use ldx_refs::{DocumentAggregator, DocumentReference, QueryResult};
use tracing::info;

use crate::error::{ExportError, ExportResult};

pub fn write_documents<W: Write>(
    documents: &[Rc<DocumentReference>],
    writer: &mut W,
    decoded: bool,
) -> ExportResult<()> {
    match documents {
        [] => return Err(ExportError::Empty),
        [single] => single.serialize_to(writer, decoded)?,
        many => DocumentAggregator::new(many.to_vec()).serialize_to(writer, decoded)?,
    }
    Ok(())
}

pub fn write_result<W: Write>(
    result: &QueryResult,
    writer: &mut W,
    decoded: bool,
) -> ExportResult<()> {
    if !result.has_value() {
        return Err(ExportError::Empty);
    }
    result.serialize_to(writer, decoded)?;
    Ok(())
}

/// Write documents to a JSON file at `path`.
pub fn export_documents(documents: &[Rc<DocumentReference>], path: &Path) -> ExportResult<()> {
    if documents.is_empty() {
        return Err(ExportError::Empty);
    }
    let mut writer = BufWriter::new(File::create(path)?);
    write_documents(documents, &mut writer, true)?;
    writer.flush()?;
    info!(path = %path.display(), documents = documents.len(), "exported json");
    Ok(())
}

/// Write a query result to a JSON file at `path`.
pub fn export_result(result: &QueryResult, path: &Path) -> ExportResult<()> {
    if !result.has_value() {
        return Err(ExportError::Empty);
    }
    let mut writer = BufWriter::new(File::create(path)?);
    write_result(result, &mut writer, true)?;
    writer.flush()?;
    info!(path = %path.display(), count = result.count(), "exported json");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldx_refs::{DatabaseReference, OpenOptions};
    use ldx_store::InMemoryStore;
    use ldx_types::{doc, text, Value};

    fn documents() -> (Rc<DatabaseReference>, Vec<Rc<DocumentReference>>) {
        let db = DatabaseReference::from_store(Box::new(InMemoryStore::new()), &OpenOptions::default())
            .unwrap();
        let people = db.add_collection("people").unwrap();
        people.add_document(doc! { "_id" => 1, "name" => "Zoë" }).unwrap();
        people.add_document(doc! { "_id" => 2, "name" => "Ada" }).unwrap();
        let docs = people.documents();
        (db, docs)
    }

    #[test]
    fn single_document_is_an_object() {
        let (_db, docs) = documents();
        let mut out = Vec::new();
        write_documents(&docs[..1], &mut out, true).unwrap();
        let value = text::parse(std::str::from_utf8(&out).unwrap()).unwrap();
        assert!(value.is_document());
        assert!(String::from_utf8(out).unwrap().contains("Zoë"));
    }

    #[test]
    fn several_documents_are_an_array() {
        let (_db, docs) = documents();
        let mut out = Vec::new();
        write_documents(&docs, &mut out, false).unwrap();
        let text_out = String::from_utf8(out).unwrap();
        assert!(text_out.is_ascii());
        let value = text::parse(&text_out).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn empty_selection_is_rejected() {
        let mut out = Vec::new();
        assert!(matches!(
            write_documents(&[], &mut out, true),
            Err(ExportError::Empty)
        ));
        let empty = QueryResult::from_values(Vec::new());
        assert!(matches!(
            write_result(&empty, &mut out, true),
            Err(ExportError::Empty)
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn exports_to_file() {
        let (_db, docs) = documents();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.json");
        export_documents(&docs, &path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("Zoë"));

        let result = QueryResult::from_values(vec![Value::from(1), Value::from(2)]);
        let path = dir.path().join("result.json");
        export_result(&result, &path).unwrap();
        let value = text::parse(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value, Value::Array(vec![1.into(), 2.into()]));
    }
}
