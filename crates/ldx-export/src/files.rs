//! Raw blob export.

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use ldx_refs::DocumentReference;
use tracing::info;

use crate::error::{ExportError, ExportResult};

/// File name used for a blob in a multi-file export: `{id}-{filename}`,
/// with the id made safe for the file system.
pub fn export_file_name(doc: &DocumentReference) -> Option<String> {
    let blob = doc.as_blob()?;
    let filename = blob.filename().unwrap_or_else(|| "blob".to_string());
    Some(format!("{}-{}", blob.id_as_filename(), filename))
}

/// Save one blob to `destination`. Returns the byte count.
pub fn export_blob(doc: &DocumentReference, destination: &Path) -> ExportResult<u64> {
    let blob = doc.as_blob().ok_or(ExportError::NoFiles)?;
    Ok(blob.save_to(destination)?)
}

/// Save every blob among `documents` into `directory`, creating it if
/// needed. Documents that are not blobs are skipped. Returns the written
/// paths.
pub fn export_blobs(
    documents: &[Rc<DocumentReference>],
    directory: &Path,
) -> ExportResult<Vec<PathBuf>> {
    let files = plan_blobs(documents, directory)?;
    fs::create_dir_all(directory)?;

    let mut written = Vec::with_capacity(files.len());
    for (doc, path) in files {
        export_blob(doc, &path)?;
        written.push(path);
    }
    info!(directory = %directory.display(), files = written.len(), "exported blobs");
    Ok(written)
}

/// Destination path of every blob among `documents`, without writing.
pub(crate) fn plan_blobs<'a>(
    documents: &'a [Rc<DocumentReference>],
    directory: &Path,
) -> ExportResult<Vec<(&'a Rc<DocumentReference>, PathBuf)>> {
    let files: Vec<_> = documents
        .iter()
        .filter_map(|doc| export_file_name(doc).map(|name| (doc, directory.join(name))))
        .collect();
    if files.is_empty() {
        return Err(ExportError::NoFiles);
    }
    if directory.exists() && !directory.is_dir() {
        return Err(ExportError::NotADirectory(directory.to_path_buf()));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldx_refs::{DatabaseReference, OpenOptions};
    use ldx_store::InMemoryStore;
    use ldx_types::doc;

    fn database() -> Rc<DatabaseReference> {
        DatabaseReference::from_store(Box::new(InMemoryStore::new()), &OpenOptions::default())
            .unwrap()
    }

    #[test]
    fn blobs_are_written_with_id_prefix() {
        let db = database();
        let a = db.add_blob_bytes("docs/a", "a.txt", b"alpha").unwrap();
        let b = db.add_blob_bytes("b", "b.bin", &[0, 1, 2]).unwrap();
        let plain = db
            .add_collection("plain")
            .unwrap()
            .add_document(doc! { "_id" => 1 })
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("export");
        let written = export_blobs(&[a, plain, b], &out).unwrap();
        assert_eq!(
            written,
            vec![out.join("docs_a-a.txt"), out.join("b-b.bin")]
        );
        assert_eq!(fs::read(&written[0]).unwrap(), b"alpha");
        assert_eq!(fs::read(&written[1]).unwrap(), vec![0u8, 1, 2]);
    }

    #[test]
    fn selection_without_blobs_is_rejected() {
        let db = database();
        let doc = db
            .add_collection("plain")
            .unwrap()
            .add_document(doc! { "_id" => 1 })
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            export_blobs(&[doc.clone()], dir.path()),
            Err(ExportError::NoFiles)
        ));
        assert!(matches!(
            export_blob(&doc, &dir.path().join("x")),
            Err(ExportError::NoFiles)
        ));
    }

    #[test]
    fn single_blob_export() {
        let db = database();
        let doc = db.add_blob_bytes("one", "one.txt", b"1").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("copy.txt");
        assert_eq!(export_blob(&doc, &path).unwrap(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "1");
    }
}
