//! Export targets for LDX.
//!
//! Everything here reads the reference tree through its public surface
//! (distinct keys, field lookup, canonical text, query results) and writes
//! files; nothing mutates a database.
//!
//! # Modules
//!
//! - [`json`] — Documents or a query result as canonical JSON text
//! - [`csv`] — Documents or a query result as comma-separated values
//! - [`files`] — Stored blobs as raw files
//! - [`background`] — The above on tokio's blocking pool, with cancellation

pub mod background;
pub mod csv;
pub mod error;
pub mod files;
pub mod json;

pub use background::TextFormat;
pub use error::{ExportError, ExportResult};
