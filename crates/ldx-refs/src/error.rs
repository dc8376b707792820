//! Error types for reference operations.

use std::path::PathBuf;

use ldx_store::StoreError;
use thiserror::Error;

/// Errors that can occur during reference operations.
#[derive(Debug, Error)]
pub enum RefError {
    /// A file, collection, document or blob was not found.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// A collection with this name already exists.
    #[error("name already exists: {name}")]
    DuplicateName { name: String },

    /// A document or blob with this id already exists.
    #[error("duplicate id {id} in {collection}")]
    DuplicateId { collection: String, id: String },

    /// The collection name is not acceptable.
    #[error("invalid collection name: {name}: {reason}")]
    InvalidName { name: String, reason: String },

    /// The database is password protected and no password was given.
    #[error("database is password protected: {}", path.display())]
    PasswordRequired { path: PathBuf },

    /// The given password does not unlock the database.
    #[error("invalid password")]
    InvalidPassword,

    /// The file is not a database this version can read.
    #[error("cannot read {}: {reason} (possibly an incompatible format version)", path.display())]
    Format { path: PathBuf, reason: String },

    /// A command could not be parsed.
    #[error("syntax error at position {position}: {message}")]
    QuerySyntax { position: usize, message: String },

    /// A document field read by key does not exist.
    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    /// The document is malformed or the edit is not allowed.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// The user aborted the operation.
    #[error("operation canceled")]
    Canceled,

    /// The database has been closed.
    #[error("database is disposed")]
    Disposed,

    /// The reference was removed from its parent.
    #[error("reference is detached from its database")]
    Detached,

    /// A background task panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(String),

    /// The configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),

    /// Any other store failure, surfaced verbatim.
    #[error(transparent)]
    Store(StoreError),

    /// I/O error reading or writing files outside the store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RefError {
    /// Whether the error is a user abort rather than a failure.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Whether asking for a (different) password could fix the error.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, Self::PasswordRequired { .. } | Self::InvalidPassword)
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }
}

impl From<StoreError> for RefError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(path) => Self::not_found(path.display().to_string()),
            StoreError::AlreadyExists(path) => Self::DuplicateName {
                name: path.display().to_string(),
            },
            StoreError::PasswordRequired(path) => Self::PasswordRequired { path },
            StoreError::InvalidPassword => Self::InvalidPassword,
            StoreError::Format { path, reason } => Self::Format { path, reason },
            StoreError::CollectionNotFound(name) => Self::not_found(format!("collection {name}")),
            StoreError::CollectionExists(name) => Self::DuplicateName { name },
            StoreError::DuplicateId { collection, id } => Self::DuplicateId { collection, id },
            StoreError::DocumentNotFound(id) => Self::not_found(format!("document {id}")),
            StoreError::InvalidDocument(reason) => Self::InvalidDocument(reason),
            StoreError::QuerySyntax { position, message } => {
                Self::QuerySyntax { position, message }
            }
            StoreError::Io(e) => Self::Io(e),
            other => Self::Store(other),
        }
    }
}

/// Convenience type alias for reference operations.
pub type Result<T> = std::result::Result<T, RefError>;
