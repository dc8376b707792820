use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use ldx_types::{Document, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::command;
use crate::error::{StoreError, StoreResult};
use crate::format::{self, FORMAT_VERSION};
use crate::image::StoreImage;
use crate::traits::{CollectionKind, DocumentStore, RebuildOptions, StoreOptions};

/// A store backed by a single file.
///
/// The whole image is loaded on open and rewritten after every mutation.
/// Rewrites go through a temporary file in the same directory that is then
/// renamed over the original, so a crash never leaves a torn file.
pub struct FileStore {
    path: PathBuf,
    image: StoreImage,
    options: StoreOptions,
    closed: bool,
}

impl FileStore {
    /// Open an existing store file.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StoreError::NotFound(path)),
            Err(e) => return Err(e.into()),
        };
        let image = format::decode(&path, &bytes, options.password.as_deref())?;
        info!(
            path = %path.display(),
            collections = image.collection_names().len(),
            read_only = options.read_only,
            "opened store"
        );
        Ok(Self {
            path,
            image,
            options,
            closed: false,
        })
    }

    /// Create a new, empty store file and open it.
    pub fn create(path: impl AsRef<Path>, options: StoreOptions) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(StoreError::AlreadyExists(path));
        }
        let options = StoreOptions {
            password: options.password.filter(|p| !p.is_empty()),
            ..options
        };
        let store = Self {
            path,
            image: StoreImage::new(),
            options,
            closed: false,
        };
        store.persist()?;
        info!(path = %store.path.display(), "created store");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_writable(&self) -> StoreResult<()> {
        self.check_open()?;
        if self.options.read_only {
            Err(StoreError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Write the current image to disk atomically.
    fn persist(&self) -> StoreResult<u64> {
        let bytes = format::encode(&self.image, self.options.password.as_deref())?;
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "persisted store");
        Ok(bytes.len() as u64)
    }

    /// Apply a mutation and persist it. If persisting fails the in-memory
    /// image is restored, so the handle and the file stay in agreement.
    fn mutate<T>(
        &mut self,
        op: impl FnOnce(&mut StoreImage) -> StoreResult<(T, bool)>,
    ) -> StoreResult<T> {
        self.check_writable()?;
        let backup = self.image.clone();
        let (result, changed) = op(&mut self.image)?;
        if changed {
            if let Err(e) = self.persist() {
                warn!(path = %self.path.display(), error = %e, "persist failed; reverting");
                self.image = backup;
                return Err(e);
            }
        }
        Ok(result)
    }
}

impl DocumentStore for FileStore {
    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn format_version(&self) -> u8 {
        FORMAT_VERSION
    }

    fn collection_names(&self) -> StoreResult<Vec<String>> {
        self.check_open()?;
        Ok(self.image.collection_names())
    }

    fn collection_kind(&self, name: &str) -> StoreResult<Option<CollectionKind>> {
        self.check_open()?;
        Ok(self.image.collection_kind(name))
    }

    fn find_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        self.check_open()?;
        Ok(self.image.find_all(collection))
    }

    fn find_by_id(&self, collection: &str, id: &Value) -> StoreResult<Option<Document>> {
        self.check_open()?;
        Ok(self.image.find_by_id(collection, id))
    }

    fn insert(&mut self, collection: &str, doc: Document) -> StoreResult<Value> {
        self.mutate(|image| image.insert(collection, doc).map(|id| (id, true)))
    }

    fn update(&mut self, collection: &str, doc: &Document) -> StoreResult<bool> {
        self.mutate(|image| image.update(collection, doc).map(|found| (found, found)))
    }

    fn delete(&mut self, collection: &str, id: &Value) -> StoreResult<bool> {
        self.mutate(|image| {
            let found = image.delete(collection, id);
            Ok((found, found))
        })
    }

    fn rename_collection(&mut self, old: &str, new: &str) -> StoreResult<()> {
        self.mutate(|image| image.rename_collection(old, new).map(|()| ((), true)))
    }

    fn drop_collection(&mut self, name: &str) -> StoreResult<bool> {
        self.mutate(|image| {
            let dropped = image.drop_collection(name);
            Ok((dropped, dropped))
        })
    }

    fn user_version(&self) -> StoreResult<i32> {
        self.check_open()?;
        Ok(self.image.user_version())
    }

    fn set_user_version(&mut self, version: i32) -> StoreResult<()> {
        self.mutate(|image| {
            let changed = image.user_version() != version;
            image.set_user_version(version);
            Ok(((), changed))
        })
    }

    fn execute(&mut self, text: &str) -> StoreResult<Vec<Value>> {
        self.check_open()?;
        if !command::parse(text)?.is_mutation() {
            return Ok(command::execute(&mut self.image, text)?.values);
        }
        self.mutate(|image| {
            let outcome = command::execute(image, text)?;
            Ok((outcome.values, outcome.mutated))
        })
    }

    fn upload_blob(&mut self, id: &str, filename: &str, data: &[u8]) -> StoreResult<Document> {
        let chunk_size = self.options.effective_chunk_size();
        self.mutate(|image| {
            image
                .upload_blob(id, filename, data, chunk_size)
                .map(|meta| (meta, true))
        })
    }

    fn blob_exists(&self, id: &str) -> StoreResult<bool> {
        self.check_open()?;
        Ok(self.image.blob_exists(id))
    }

    fn download_blob(&self, id: &str) -> StoreResult<Vec<u8>> {
        self.check_open()?;
        self.image.download_blob(id)
    }

    fn rebuild(&mut self, options: &RebuildOptions) -> StoreResult<u64> {
        self.check_writable()?;
        let previous = self.options.password.clone();
        self.options.password = options.effective_password().map(str::to_string);
        match self.persist() {
            Ok(size) => {
                info!(
                    path = %self.path.display(),
                    size,
                    protected = self.options.password.is_some(),
                    "rebuilt store"
                );
                Ok(size)
            }
            Err(e) => {
                self.options.password = previous;
                Err(e)
            }
        }
    }

    fn info(&self) -> StoreResult<Document> {
        self.check_open()?;
        let mut info = self.image.info();
        info.insert("formatVersion", i32::from(FORMAT_VERSION));
        info.insert("path", self.path.display().to_string());
        let size = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        info.insert("fileSize", size as i64);
        info.insert("passwordProtected", self.options.password.is_some());
        info.insert("readOnly", self.options.read_only);
        Ok(info)
    }

    fn close(&mut self) -> StoreResult<()> {
        if !self.closed {
            self.closed = true;
            info!(path = %self.path.display(), "closed store");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldx_types::doc;

    fn reopen(path: &Path, password: Option<&str>) -> StoreResult<FileStore> {
        FileStore::open(
            path,
            StoreOptions {
                password: password.map(str::to_string),
                ..Default::default()
            },
        )
    }

    #[test]
    fn create_then_reopen_persists_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.ldx");

        let mut store = FileStore::create(&path, StoreOptions::default()).unwrap();
        store.insert("people", doc! { "_id" => 1, "name" => "ada" }).unwrap();
        store.set_user_version(4).unwrap();
        store.close().unwrap();

        let store = reopen(&path, None).unwrap();
        assert_eq!(store.collection_names().unwrap(), vec!["people"]);
        assert_eq!(store.user_version().unwrap(), 4);
        let doc = store.find_by_id("people", &Value::from(1)).unwrap().unwrap();
        assert_eq!(doc.get("name"), Some(&Value::from("ada")));
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.ldx");
        FileStore::create(&path, StoreOptions::default()).unwrap();
        assert!(matches!(
            FileStore::create(&path, StoreOptions::default()),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            reopen(&dir.path().join("nope.ldx"), None),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn password_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.ldx");
        FileStore::create(&path, StoreOptions::with_password("pw")).unwrap();
        assert!(format::is_password_protected(&path).unwrap());

        assert!(matches!(
            reopen(&path, None),
            Err(StoreError::PasswordRequired(_))
        ));
        assert!(matches!(
            reopen(&path, Some("nope")),
            Err(StoreError::InvalidPassword)
        ));

        let mut store = reopen(&path, Some("pw")).unwrap();
        store.rebuild(&RebuildOptions::default()).unwrap();
        assert!(!format::is_password_protected(&path).unwrap());
        assert!(reopen(&path, None).is_ok());

        store
            .rebuild(&RebuildOptions {
                password: Some("new".into()),
            })
            .unwrap();
        assert!(format::is_password_protected(&path).unwrap());
        assert!(reopen(&path, Some("new")).is_ok());
    }

    #[test]
    fn execute_persists_only_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.ldx");
        let mut store = FileStore::create(&path, StoreOptions::default()).unwrap();
        store
            .execute("INSERT INTO c VALUES {\"_id\": 1}, {\"_id\": 2}")
            .unwrap();
        assert_eq!(store.execute("SELECT COUNT(*) FROM c").unwrap().len(), 1);

        let reopened = reopen(&path, None).unwrap();
        assert_eq!(reopened.find_all("c").unwrap().len(), 2);
    }

    #[test]
    fn blobs_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.ldx");
        let mut store = FileStore::create(&path, StoreOptions::default()).unwrap();
        store.upload_blob("logo", "logo.png", &[1, 2, 3]).unwrap();

        let reopened = reopen(&path, None).unwrap();
        assert_eq!(reopened.download_blob("logo").unwrap(), vec![1, 2, 3]);
        assert_eq!(
            reopened.collection_kind("_files").unwrap(),
            Some(CollectionKind::Blobs)
        );
    }

    #[test]
    fn read_only_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.ldx");
        FileStore::create(&path, StoreOptions::default()).unwrap();
        let mut store = FileStore::open(
            &path,
            StoreOptions {
                read_only: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(matches!(
            store.insert("c", Document::new()),
            Err(StoreError::ReadOnly)
        ));
        assert!(matches!(
            store.rebuild(&RebuildOptions::default()),
            Err(StoreError::ReadOnly)
        ));
    }

    #[test]
    fn info_reports_file_details() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.ldx");
        let store = FileStore::create(&path, StoreOptions::default()).unwrap();
        let info = store.info().unwrap();
        assert_eq!(info.get("formatVersion"), Some(&Value::Int32(1)));
        assert!(matches!(info.get("fileSize"), Some(Value::Int64(n)) if *n > 0));
    }
}
