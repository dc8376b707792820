//! Background store work.
//!
//! Opening, rebuilding, blob upload and blob download block on file I/O.
//! These helpers run the blocking part on tokio's blocking pool and apply
//! the outcome to the reference tree back on the calling task, so listeners
//! only ever run on the tree's owner.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::rc::Rc;

use ldx_store::{RebuildOptions, FILES_COLLECTION};
use tokio::task;
pub use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::database::{load_collections, lock_store, DatabaseReference, LoadedStore, OpenOptions};
use crate::document::DocumentReference;
use crate::error::{RefError, Result};

fn check(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(RefError::Canceled)
    } else {
        Ok(())
    }
}

/// Open a database on the blocking pool.
///
/// A token canceled before the store is touched yields
/// [`RefError::Canceled`]; one canceled while the store is loading
/// closes the store again and yields the same.
pub async fn open_in_background(
    path: PathBuf,
    options: OpenOptions,
    cancel: CancellationToken,
) -> Result<Rc<DatabaseReference>> {
    check(&cancel)?;
    let worker_cancel = cancel.clone();
    let worker_options = options.clone();
    let loaded = task::spawn_blocking(move || {
        check(&worker_cancel)?;
        debug!(path = %path.display(), "opening store in background");
        LoadedStore::open(&path, &worker_options)
    })
    .await
    .map_err(|e| RefError::Task(e.to_string()))??;

    if cancel.is_cancelled() {
        loaded.discard();
        return Err(RefError::Canceled);
    }
    Ok(DatabaseReference::from_loaded(loaded, &options))
}

/// Rebuild the store on the blocking pool, then refresh the tree.
///
/// Returns the new store size in bytes.
pub async fn rebuild_in_background(
    db: &Rc<DatabaseReference>,
    password: Option<String>,
    cancel: &CancellationToken,
) -> Result<u64> {
    db.ensure_live()?;
    check(cancel)?;
    let store = db.store_handle();
    let worker_cancel = cancel.clone();
    let (size, loaded) = task::spawn_blocking(move || {
        check(&worker_cancel)?;
        let mut store = lock_store(&store)?;
        let size = store.rebuild(&RebuildOptions { password })?;
        let loaded = load_collections(&**store)?;
        Ok::<_, RefError>((size, loaded))
    })
    .await
    .map_err(|e| RefError::Task(e.to_string()))??;

    if !db.is_disposed() {
        db.replace_collections(loaded);
    }
    info!(path = %db.location().display(), bytes = size, "rebuilt database");
    Ok(size)
}

/// Upload the file at `source` as blob `id` on the blocking pool, then add
/// it to the tree.
///
/// The token is checked before the source is read and again before the
/// store is written; once the upload has happened the blob is kept.
pub async fn add_blob_in_background(
    db: &Rc<DatabaseReference>,
    id: &str,
    source: PathBuf,
    cancel: &CancellationToken,
) -> Result<Rc<DocumentReference>> {
    check(cancel)?;
    if db.blob_exists(id)? {
        return Err(RefError::DuplicateId {
            collection: FILES_COLLECTION.to_string(),
            id: id.to_string(),
        });
    }
    let store = db.store_handle();
    let worker_cancel = cancel.clone();
    let worker_id = id.to_string();
    let meta = task::spawn_blocking(move || {
        check(&worker_cancel)?;
        let data = fs::read(&source).map_err(|e| match e.kind() {
            ErrorKind::NotFound => RefError::not_found(source.display().to_string()),
            _ => RefError::Io(e),
        })?;
        let filename = source
            .file_name()
            .map_or_else(|| worker_id.clone(), |n| n.to_string_lossy().into_owned());
        check(&worker_cancel)?;
        let mut store = lock_store(&store)?;
        debug!(id = %worker_id, bytes = data.len(), "uploading blob in background");
        Ok::<_, RefError>(store.upload_blob(&worker_id, &filename, &data)?)
    })
    .await
    .map_err(|e| RefError::Task(e.to_string()))??;

    db.ensure_live()?;
    info!(id = %id, "added blob");
    db.attach_blob(meta)
}

/// Download blobs on the blocking pool, each `(id, destination)` pair to
/// its own file. Returns the byte count of every file written.
///
/// A token canceled before the store is read writes nothing; one canceled
/// between blobs stops after the current file.
pub async fn save_blobs_in_background(
    db: &Rc<DatabaseReference>,
    blobs: Vec<(String, PathBuf)>,
    cancel: &CancellationToken,
) -> Result<Vec<u64>> {
    db.ensure_live()?;
    check(cancel)?;
    let store = db.store_handle();
    let worker_cancel = cancel.clone();
    task::spawn_blocking(move || {
        let mut sizes = Vec::with_capacity(blobs.len());
        for (id, destination) in blobs {
            check(&worker_cancel)?;
            let bytes = lock_store(&store)?.download_blob(&id)?;
            fs::write(&destination, &bytes)?;
            debug!(id = %id, path = %destination.display(), bytes = bytes.len(), "saved blob");
            sizes.push(bytes.len() as u64);
        }
        Ok::<_, RefError>(sizes)
    })
    .await
    .map_err(|e| RefError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ChangeAction;
    use std::cell::RefCell;

    fn fixture(dir: &tempfile::TempDir, password: Option<&str>) -> PathBuf {
        let path = dir.path().join("bg.ldx");
        let options = OpenOptions {
            password: password.map(str::to_string),
            ..Default::default()
        };
        let db = DatabaseReference::create(&path, &options).unwrap();
        db.add_collection("people").unwrap();
        db.close().unwrap();
        path
    }

    #[tokio::test]
    async fn opens_off_thread() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(&dir, None);
        let db = open_in_background(path, OpenOptions::default(), CancellationToken::new())
            .await
            .unwrap();
        assert!(db.contains_collection("people"));
        assert_eq!(db.name(), "bg.ldx");
    }

    #[tokio::test]
    async fn canceled_open_yields_canceled() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(&dir, None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = open_in_background(path, OpenOptions::default(), cancel)
            .await
            .unwrap_err();
        assert!(err.is_canceled());
    }

    #[tokio::test]
    async fn open_surfaces_credential_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(&dir, Some("pw"));
        let err = open_in_background(path.clone(), OpenOptions::default(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RefError::PasswordRequired { .. }));

        let db = open_in_background(path, OpenOptions::with_password("pw"), CancellationToken::new())
            .await
            .unwrap();
        assert!(db.contains_collection("people"));
    }

    #[tokio::test]
    async fn rebuild_refreshes_tree() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(&dir, None);
        let db = DatabaseReference::open(&path, &OpenOptions::default()).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        db.node().subscribe(move |change| {
            sink.borrow_mut().push(change.action);
            Ok(())
        });

        let size = rebuild_in_background(&db, Some("secret".into()), &CancellationToken::new())
            .await
            .unwrap();
        assert!(size > 0);
        assert!(ldx_store::is_password_protected(&path).unwrap());
        assert_eq!(*log.borrow(), vec![ChangeAction::Remove, ChangeAction::Add]);
        assert!(db.contains_collection("people"));
    }

    #[tokio::test]
    async fn uploads_blob_off_thread() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(&dir, None);
        let source = dir.path().join("notes.txt");
        fs::write(&source, b"hello").unwrap();
        let db = DatabaseReference::open(&path, &OpenOptions::default()).unwrap();

        let doc = add_blob_in_background(&db, "notes", source.clone(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(doc.as_blob().unwrap().size(), 5);
        assert!(db.blob_exists("notes").unwrap());
        assert_eq!(db.collection(FILES_COLLECTION).unwrap().len(), 1);

        let err = add_blob_in_background(&db, "notes", source, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RefError::DuplicateId { .. }));
    }

    #[tokio::test]
    async fn canceled_upload_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(&dir, None);
        let source = dir.path().join("notes.txt");
        fs::write(&source, b"hello").unwrap();
        let db = DatabaseReference::open(&path, &OpenOptions::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = add_blob_in_background(&db, "notes", source, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_canceled());
        assert!(!db.blob_exists("notes").unwrap());
        assert!(db.collection(FILES_COLLECTION).is_none());
    }

    #[tokio::test]
    async fn saves_blobs_off_thread() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(&dir, None);
        let db = DatabaseReference::open(&path, &OpenOptions::default()).unwrap();
        db.add_blob_bytes("a", "a.txt", b"alpha").unwrap();
        db.add_blob_bytes("b", "b.txt", b"be").unwrap();

        let targets = vec![
            ("a".to_string(), dir.path().join("a.out")),
            ("b".to_string(), dir.path().join("b.out")),
        ];
        let sizes = save_blobs_in_background(&db, targets, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sizes, vec![5, 2]);
        assert_eq!(fs::read(dir.path().join("a.out")).unwrap(), b"alpha");
    }

    #[tokio::test]
    async fn canceled_save_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(&dir, None);
        let db = DatabaseReference::open(&path, &OpenOptions::default()).unwrap();
        db.add_blob_bytes("a", "a.txt", b"alpha").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let out = dir.path().join("a.out");
        let err = save_blobs_in_background(&db, vec![("a".to_string(), out.clone())], &cancel)
            .await
            .unwrap_err();
        assert!(err.is_canceled());
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn rebuild_on_closed_database_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(&dir, None);
        let db = DatabaseReference::open(&path, &OpenOptions::default()).unwrap();
        db.close().unwrap();
        let err = rebuild_in_background(&db, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RefError::Disposed));
    }
}
