//! Embedded document storage for LDX.
//!
//! This crate provides the storage engine that the reference graph treats as
//! an opaque collaborator. A store holds named collections of documents
//! (identity in `_id`), a blob area, and an application-defined user version.
//!
//! # Storage Backends
//!
//! All backends implement the [`DocumentStore`] trait:
//!
//! - [`FileStore`] -- single-file store, loaded on open and rewritten
//!   atomically after each mutation, optionally password protected
//! - [`InMemoryStore`] -- store for tests and embedding
//!
//! # Design Rules
//!
//! 1. A failed operation leaves the store unchanged.
//! 2. Inserting into a missing collection creates it.
//! 3. Deleting blob metadata deletes its chunks.
//! 4. A closed handle rejects every operation; closing twice is a no-op.
//! 5. [`is_password_protected`] never decodes more than the first byte.

pub mod blob;
pub mod command;
pub mod error;
pub mod file;
pub mod format;
pub mod image;
pub mod memory;
pub mod traits;

pub use blob::{CHUNKS_COLLECTION, DEFAULT_CHUNK_SIZE, FILES_COLLECTION};
pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use format::{is_password_protected, FORMAT_VERSION};
pub use image::StoreImage;
pub use memory::InMemoryStore;
pub use traits::{CollectionKind, DocumentStore, RebuildOptions, StoreOptions};
