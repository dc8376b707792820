//! Error types for export operations.

use std::path::PathBuf;

use ldx_refs::RefError;
use thiserror::Error;

/// Errors that can occur while exporting.
#[derive(Debug, Error)]
pub enum ExportError {
    /// There was nothing to export.
    #[error("nothing to export")]
    Empty,

    /// None of the selected documents is a stored file.
    #[error("selection contains no stored files")]
    NoFiles,

    /// The destination for a multi-file export is not a directory.
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Reading from the reference tree failed.
    #[error(transparent)]
    Refs(#[from] RefError),

    /// Writing the export failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExportError {
    /// Whether the export stopped because its token was canceled.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Refs(e) if e.is_canceled())
    }
}

/// Convenience type alias for export operations.
pub type ExportResult<T> = std::result::Result<T, ExportError>;
