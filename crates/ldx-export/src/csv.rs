//! CSV export.
//!
//! The header row is the distinct key set of the exported documents. Cells
//! hold the plain text of scalar values; null, array and sub-document
//! values are left empty. A cell containing a quote, comma or line break is
//! quoted, with inner quotes doubled.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

use ldx_refs::{distinct_keys, DocumentReference, KeyOrder, QueryResult, ResultTable};
use ldx_types::Value;
use tracing::info;

use crate::error::{ExportError, ExportResult};

const SEPARATOR: &str = ",";
const RESERVED: [char; 4] = ['"', ',', '\n', '\r'];

/// Quote a field if it contains a reserved character.
pub fn escape_field(field: &str) -> String {
    if field.contains(&RESERVED[..]) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn cell(value: Option<&Value>) -> String {
    value
        .and_then(Value::raw_text)
        .map(|s| escape_field(&s))
        .unwrap_or_default()
}

fn write_row<W: Write>(writer: &mut W, cells: impl Iterator<Item = String>) -> ExportResult<()> {
    let line = cells.collect::<Vec<_>>().join(SEPARATOR);
    writeln!(writer, "{line}")?;
    Ok(())
}

/// Write documents as CSV.
pub fn write_documents<W: Write>(
    documents: &[Rc<DocumentReference>],
    order: KeyOrder,
    writer: &mut W,
) -> ExportResult<()> {
    let keys = distinct_keys(documents.iter().map(|d| d.snapshot()), order);
    write_row(writer, keys.iter().map(|k| escape_field(k)))?;
    for doc in documents {
        let snapshot = doc.snapshot();
        write_row(writer, keys.iter().map(|k| cell(snapshot.get(k))))?;
    }
    Ok(())
}

/// Write a result table as CSV.
pub fn write_table<W: Write>(table: &ResultTable, writer: &mut W) -> ExportResult<()> {
    write_row(writer, table.columns.iter().map(|c| escape_field(c)))?;
    for row in &table.rows {
        write_row(writer, row.iter().map(|v| cell(v.as_ref())))?;
    }
    Ok(())
}

/// Write documents to a CSV file at `path`.
pub fn export_documents(
    documents: &[Rc<DocumentReference>],
    order: KeyOrder,
    path: &Path,
) -> ExportResult<()> {
    if documents.is_empty() {
        return Err(ExportError::Empty);
    }
    let mut writer = BufWriter::new(File::create(path)?);
    write_documents(documents, order, &mut writer)?;
    writer.flush()?;
    info!(path = %path.display(), rows = documents.len(), "exported csv");
    Ok(())
}

/// Write a query result to a CSV file at `path`.
pub fn export_result(result: &QueryResult, order: KeyOrder, path: &Path) -> ExportResult<()> {
    if !result.has_value() {
        return Err(ExportError::Empty);
    }
    let table = result.to_table(order);
    let mut writer = BufWriter::new(File::create(path)?);
    write_table(&table, &mut writer)?;
    writer.flush()?;
    info!(path = %path.display(), rows = table.rows.len(), "exported csv");
    Ok(())
}
