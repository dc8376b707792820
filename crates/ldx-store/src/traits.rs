use std::path::Path;

use ldx_types::{Document, Value};

use crate::error::StoreResult;

/// How a collection's contents are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// Ordinary documents.
    Documents,
    /// Metadata documents of stored blobs (one per uploaded file).
    Blobs,
    /// Chunk storage backing the blob collection. Internal.
    BlobChunks,
}

impl CollectionKind {
    /// Whether the collection is an implementation detail hidden from users.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::BlobChunks)
    }
}

/// Options for opening or creating a store.
#[derive(Clone, Debug, Default)]
pub struct StoreOptions {
    /// Password for protected files.
    pub password: Option<String>,
    /// Reject every mutation with [`StoreError::ReadOnly`](crate::StoreError::ReadOnly).
    pub read_only: bool,
    /// Blob chunk size; defaults to [`DEFAULT_CHUNK_SIZE`](crate::blob::DEFAULT_CHUNK_SIZE).
    pub chunk_size: Option<usize>,
}

impl StoreOptions {
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            ..Default::default()
        }
    }

    pub(crate) fn effective_chunk_size(&self) -> usize {
        self.chunk_size
            .filter(|n| *n > 0)
            .unwrap_or(crate::blob::DEFAULT_CHUNK_SIZE)
    }
}

/// Options for [`DocumentStore::rebuild`].
#[derive(Clone, Debug, Default)]
pub struct RebuildOptions {
    /// New password. `None` or an empty string removes protection.
    pub password: Option<String>,
}

impl RebuildOptions {
    /// The effective password, treating an empty string as "no password".
    pub fn effective_password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }
}

/// An open handle to an embedded document store.
///
/// All implementations must satisfy these invariants:
/// - Document identity is the `_id` field; it is unique per collection.
/// - Inserting into a missing collection creates it.
/// - A failed operation leaves the store unchanged.
/// - After [`close`](DocumentStore::close) every operation fails with
///   `Closed`; `close` itself is idempotent.
pub trait DocumentStore: Send {
    /// Backing file, if any.
    fn location(&self) -> Option<&Path>;

    /// On-disk format version of the store.
    fn format_version(&self) -> u8;

    /// Names of all collections, internal ones included.
    fn collection_names(&self) -> StoreResult<Vec<String>>;

    /// Kind of the named collection, or `None` if it does not exist.
    fn collection_kind(&self, name: &str) -> StoreResult<Option<CollectionKind>>;

    /// All documents of a collection in insertion order.
    fn find_all(&self, collection: &str) -> StoreResult<Vec<Document>>;

    /// Look up one document by identity.
    fn find_by_id(&self, collection: &str, id: &Value) -> StoreResult<Option<Document>>;

    /// Insert a document, assigning an `ObjectId` when `_id` is absent.
    /// Returns the identity value.
    fn insert(&mut self, collection: &str, doc: Document) -> StoreResult<Value>;

    /// Replace the document with the same `_id`. Returns `false` if absent.
    fn update(&mut self, collection: &str, doc: &Document) -> StoreResult<bool>;

    /// Delete by identity. Returns `true` if the document existed.
    fn delete(&mut self, collection: &str, id: &Value) -> StoreResult<bool>;

    /// Rename a collection. Fails if `old` is missing or `new` exists.
    fn rename_collection(&mut self, old: &str, new: &str) -> StoreResult<()>;

    /// Drop a collection. Returns `true` if it existed.
    fn drop_collection(&mut self, name: &str) -> StoreResult<bool>;

    /// Application-defined version tag stored with the data.
    fn user_version(&self) -> StoreResult<i32>;

    fn set_user_version(&mut self, version: i32) -> StoreResult<()>;

    /// Execute a command and return its result values.
    fn execute(&mut self, command: &str) -> StoreResult<Vec<Value>>;

    /// Store `data` as a blob under `id`, returning its metadata document.
    fn upload_blob(&mut self, id: &str, filename: &str, data: &[u8]) -> StoreResult<Document>;

    fn blob_exists(&self, id: &str) -> StoreResult<bool>;

    /// Reassemble the bytes of a stored blob.
    fn download_blob(&self, id: &str) -> StoreResult<Vec<u8>>;

    /// Compact and rewrite the store, optionally changing its password.
    /// Returns the resulting size in bytes.
    fn rebuild(&mut self, options: &RebuildOptions) -> StoreResult<u64>;

    /// Engine metadata for display.
    fn info(&self) -> StoreResult<Document>;

    /// Release the handle. Idempotent.
    fn close(&mut self) -> StoreResult<()>;

    fn is_closed(&self) -> bool;
}
