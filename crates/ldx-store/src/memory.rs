use std::path::Path;

use ldx_types::{Document, Value};
use tracing::debug;

use crate::command;
use crate::error::{StoreError, StoreResult};
use crate::format::FORMAT_VERSION;
use crate::image::StoreImage;
use crate::traits::{CollectionKind, DocumentStore, RebuildOptions, StoreOptions};

/// A store held entirely in memory.
///
/// Intended for tests and embedding. Behaves like a file store that never
/// touches disk: `rebuild` only records the password state and reports the
/// encoded size.
pub struct InMemoryStore {
    image: StoreImage,
    options: StoreOptions,
    closed: bool,
}

impl InMemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    pub fn with_options(options: StoreOptions) -> Self {
        Self::from_image(StoreImage::new(), options)
    }

    /// Wrap existing contents.
    pub fn from_image(image: StoreImage, options: StoreOptions) -> Self {
        Self {
            image,
            options,
            closed: false,
        }
    }

    /// Current contents.
    pub fn image(&self) -> &StoreImage {
        &self.image
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
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for InMemoryStore {
    fn location(&self) -> Option<&Path> {
        None
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
        self.check_writable()?;
        self.image.insert(collection, doc)
    }

    fn update(&mut self, collection: &str, doc: &Document) -> StoreResult<bool> {
        self.check_writable()?;
        self.image.update(collection, doc)
    }

    fn delete(&mut self, collection: &str, id: &Value) -> StoreResult<bool> {
        self.check_writable()?;
        Ok(self.image.delete(collection, id))
    }

    fn rename_collection(&mut self, old: &str, new: &str) -> StoreResult<()> {
        self.check_writable()?;
        self.image.rename_collection(old, new)
    }

    fn drop_collection(&mut self, name: &str) -> StoreResult<bool> {
        self.check_writable()?;
        Ok(self.image.drop_collection(name))
    }

    fn user_version(&self) -> StoreResult<i32> {
        self.check_open()?;
        Ok(self.image.user_version())
    }

    fn set_user_version(&mut self, version: i32) -> StoreResult<()> {
        self.check_writable()?;
        self.image.set_user_version(version);
        Ok(())
    }

    fn execute(&mut self, command: &str) -> StoreResult<Vec<Value>> {
        self.check_open()?;
        if self.options.read_only && command::parse(command)?.is_mutation() {
            return Err(StoreError::ReadOnly);
        }
        Ok(command::execute(&mut self.image, command)?.values)
    }

    fn upload_blob(&mut self, id: &str, filename: &str, data: &[u8]) -> StoreResult<Document> {
        self.check_writable()?;
        let chunk_size = self.options.effective_chunk_size();
        self.image.upload_blob(id, filename, data, chunk_size)
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
        let password = options.effective_password();
        let size = crate::format::encode(&self.image, password)?.len() as u64;
        self.options.password = password.map(str::to_string);
        debug!(size, protected = password.is_some(), "rebuilt in-memory store");
        Ok(size)
    }

    fn info(&self) -> StoreResult<Document> {
        self.check_open()?;
        let mut info = self.image.info();
        info.insert("formatVersion", i32::from(FORMAT_VERSION));
        info.insert("passwordProtected", self.options.password.is_some());
        info.insert("readOnly", self.options.read_only);
        Ok(info)
    }

    fn close(&mut self) -> StoreResult<()> {
        self.closed = true;
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

    #[test]
    fn basic_crud() {
        let mut store = InMemoryStore::new();
        let id = store.insert("c", doc! { "v" => 1 }).unwrap();
        assert_eq!(store.collection_names().unwrap(), vec!["c"]);
        assert!(store.find_by_id("c", &id).unwrap().is_some());
        assert!(store.delete("c", &id).unwrap());
        assert!(store.find_all("c").unwrap().is_empty());
    }

    #[test]
    fn closed_store_rejects_operations() {
        let mut store = InMemoryStore::new();
        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        assert!(matches!(store.collection_names(), Err(StoreError::Closed)));
        assert!(matches!(
            store.insert("c", Document::new()),
            Err(StoreError::Closed)
        ));
    }

    #[test]
    fn read_only_rejects_mutations_but_allows_select() {
        let mut image = StoreImage::new();
        image.insert("c", Document::with_id(1)).unwrap();
        let mut store = InMemoryStore::from_image(
            image,
            StoreOptions {
                read_only: true,
                ..Default::default()
            },
        );
        assert!(matches!(
            store.insert("c", Document::new()),
            Err(StoreError::ReadOnly)
        ));
        assert!(matches!(
            store.execute("DROP COLLECTION c"),
            Err(StoreError::ReadOnly)
        ));
        assert_eq!(store.execute("SELECT $ FROM c").unwrap().len(), 1);
    }

    #[test]
    fn rebuild_tracks_password() {
        let mut store = InMemoryStore::new();
        store
            .rebuild(&RebuildOptions {
                password: Some("pw".into()),
            })
            .unwrap();
        let info = store.info().unwrap();
        assert_eq!(info.get("passwordProtected"), Some(&Value::Boolean(true)));

        store
            .rebuild(&RebuildOptions {
                password: Some(String::new()),
            })
            .unwrap();
        let info = store.info().unwrap();
        assert_eq!(info.get("passwordProtected"), Some(&Value::Boolean(false)));
    }

    #[test]
    fn blobs_use_configured_chunk_size() {
        let mut store = InMemoryStore::with_options(StoreOptions {
            chunk_size: Some(2),
            ..Default::default()
        });
        let meta = store.upload_blob("b", "b.txt", b"hello").unwrap();
        assert_eq!(meta.get("chunks"), Some(&Value::Int32(3)));
        assert_eq!(store.download_blob("b").unwrap(), b"hello");
        assert!(store.blob_exists("b").unwrap());
    }
}
