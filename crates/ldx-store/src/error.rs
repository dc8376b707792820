use std::path::PathBuf;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store file does not exist.
    #[error("store file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A file already exists where a new store was to be created.
    #[error("store file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// The file is password protected and no password was supplied.
    #[error("store is password protected: {}", .0.display())]
    PasswordRequired(PathBuf),

    /// The supplied password does not unlock the file.
    #[error("invalid password")]
    InvalidPassword,

    /// The file is not a store, or was written by an incompatible version.
    #[error("unrecognized store format in {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    /// The named collection does not exist.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// A collection with this name already exists.
    #[error("collection already exists: {0}")]
    CollectionExists(String),

    /// A document with this identity already exists in the collection.
    #[error("duplicate id {id} in collection {collection}")]
    DuplicateId { collection: String, id: String },

    /// A document or blob was required but is missing.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// The document has no usable `_id`.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// The command text could not be parsed.
    #[error("syntax error at position {position}: {message}")]
    QuerySyntax { position: usize, message: String },

    /// The command parsed but could not be carried out.
    #[error("command failed: {0}")]
    Execution(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store was opened read-only.
    #[error("store is read-only")]
    ReadOnly,

    /// The handle has been closed.
    #[error("store handle is closed")]
    Closed,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
