//! Exports driven from an async caller.
//!
//! Text is rendered from the reference tree on the calling task; writing it
//! out, and reading blob contents from the store, runs on tokio's blocking
//! pool. Every entry point checks its token before the store or the
//! destination is touched, so a canceled export writes nothing.

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use ldx_refs::tasks::{self, CancellationToken};
use ldx_refs::{DatabaseReference, DocumentReference, KeyOrder, QueryResult, RefError};
use tokio::task;
use tracing::info;

use crate::error::{ExportError, ExportResult};
use crate::files::plan_blobs;
use crate::{csv, json};

/// Text formats an export can be written in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextFormat {
    Json,
    Csv,
}

fn check(cancel: &CancellationToken) -> ExportResult<()> {
    if cancel.is_cancelled() {
        Err(RefError::Canceled.into())
    } else {
        Ok(())
    }
}

async fn write_file(path: &Path, bytes: Vec<u8>, cancel: &CancellationToken) -> ExportResult<()> {
    let path = path.to_path_buf();
    let cancel = cancel.clone();
    task::spawn_blocking(move || {
        check(&cancel)?;
        fs::write(&path, &bytes)?;
        Ok::<_, ExportError>(())
    })
    .await
    .map_err(|e| RefError::Task(e.to_string()))?
}

/// Write documents to `path` as JSON or CSV.
pub async fn export_documents(
    documents: &[Rc<DocumentReference>],
    format: TextFormat,
    order: KeyOrder,
    path: &Path,
    cancel: &CancellationToken,
) -> ExportResult<()> {
    check(cancel)?;
    if documents.is_empty() {
        return Err(ExportError::Empty);
    }
    let mut buf = Vec::new();
    match format {
        TextFormat::Json => json::write_documents(documents, &mut buf, true)?,
        TextFormat::Csv => csv::write_documents(documents, order, &mut buf)?,
    }
    write_file(path, buf, cancel).await?;
    info!(path = %path.display(), documents = documents.len(), ?format, "exported documents");
    Ok(())
}

/// Write a query result to `path` as JSON or CSV.
pub async fn export_result(
    result: &QueryResult,
    format: TextFormat,
    order: KeyOrder,
    path: &Path,
    cancel: &CancellationToken,
) -> ExportResult<()> {
    check(cancel)?;
    if !result.has_value() {
        return Err(ExportError::Empty);
    }
    let mut buf = Vec::new();
    match format {
        TextFormat::Json => json::write_result(result, &mut buf, true)?,
        TextFormat::Csv => csv::write_table(&result.to_table(order), &mut buf)?,
    }
    write_file(path, buf, cancel).await?;
    info!(path = %path.display(), count = result.count(), ?format, "exported result");
    Ok(())
}

/// Save every blob among `documents` into `directory` as
/// `{id}-{filename}`. Returns the written paths.
pub async fn export_blobs(
    documents: &[Rc<DocumentReference>],
    directory: &Path,
    cancel: &CancellationToken,
) -> ExportResult<Vec<PathBuf>> {
    check(cancel)?;
    let files = plan_blobs(documents, directory)?;

    // Blobs are read through the store of the database owning them.
    let mut groups: Vec<(Rc<DatabaseReference>, Vec<(String, PathBuf)>)> = Vec::new();
    for (doc, path) in files {
        let database = doc
            .collection()
            .and_then(|c| c.database())
            .ok_or(RefError::Detached)?;
        let id = doc.as_blob().map(|b| b.id()).ok_or(ExportError::NoFiles)?;
        match groups.iter_mut().find(|(db, _)| Rc::ptr_eq(db, &database)) {
            Some((_, pending)) => pending.push((id, path)),
            None => groups.push((database, vec![(id, path)])),
        }
    }

    fs::create_dir_all(directory)?;
    let mut written = Vec::new();
    for (database, pending) in groups {
        let paths: Vec<PathBuf> = pending.iter().map(|(_, p)| p.clone()).collect();
        tasks::save_blobs_in_background(&database, pending, cancel).await?;
        written.extend(paths);
    }
    info!(directory = %directory.display(), files = written.len(), "exported blobs");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldx_refs::OpenOptions;
    use ldx_store::InMemoryStore;
    use ldx_types::{doc, text, Value};

    fn database() -> Rc<DatabaseReference> {
        DatabaseReference::from_store(Box::new(InMemoryStore::new()), &OpenOptions::default())
            .unwrap()
    }

    #[tokio::test]
    async fn documents_export_off_thread() {
        let db = database();
        let people = db.add_collection("people").unwrap();
        people.add_document(doc! { "_id" => 1, "name" => "Zoë" }).unwrap();
        people.add_document(doc! { "_id" => 2, "name" => "Ada" }).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("people.json");
        export_documents(
            &people.documents(),
            TextFormat::Json,
            KeyOrder::FirstSeen,
            &json_path,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        let value = text::parse(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(2));

        let csv_path = dir.path().join("people.csv");
        export_documents(
            &people.documents(),
            TextFormat::Csv,
            KeyOrder::FirstSeen,
            &csv_path,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(
            fs::read_to_string(&csv_path).unwrap(),
            "_id,name\n1,Zoë\n2,Ada\n"
        );
    }

    #[tokio::test]
    async fn canceled_export_writes_nothing() {
        let db = database();
        let people = db.add_collection("people").unwrap();
        people.add_document(doc! { "_id" => 1 }).unwrap();
        db.add_blob_bytes("a", "a.txt", b"alpha").unwrap();
        let files = db.collection("_files").unwrap().documents();
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let path = dir.path().join("people.json");
        let err = export_documents(
            &people.documents(),
            TextFormat::Json,
            KeyOrder::FirstSeen,
            &path,
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(err.is_canceled());
        assert!(!path.exists());

        let result = QueryResult::from_values(vec![Value::from(1)]);
        let err = export_result(&result, TextFormat::Csv, KeyOrder::FirstSeen, &path, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_canceled());
        assert!(!path.exists());

        let out = dir.path().join("blobs");
        let err = export_blobs(&files, &out, &cancel).await.unwrap_err();
        assert!(err.is_canceled());
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn blobs_export_off_thread() {
        let db = database();
        let a = db.add_blob_bytes("docs/a", "a.txt", b"alpha").unwrap();
        let plain = db
            .add_collection("plain")
            .unwrap()
            .add_document(doc! { "_id" => 1 })
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("export");

        let written = export_blobs(&[plain, a], &out, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(written, vec![out.join("docs_a-a.txt")]);
        assert_eq!(fs::read(&written[0]).unwrap(), b"alpha");
    }

    #[tokio::test]
    async fn empty_result_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let err = export_result(
            &QueryResult::from_values(Vec::new()),
            TextFormat::Json,
            KeyOrder::FirstSeen,
            &path,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExportError::Empty));
        assert!(!path.exists());
    }
}
