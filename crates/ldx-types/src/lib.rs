//! Foundation types for LDX.
//!
//! This crate provides the value model shared by every other LDX crate: the
//! typed document tree stored in collections, the identifiers assigned to
//! new documents, and the canonical text encoding used for display,
//! clipboard transfer and export.
//!
//! # Key Types
//!
//! - [`Value`] — A typed scalar, array, or sub-document
//! - [`Document`] — Insertion-ordered field map; identity lives in `_id`
//! - [`ObjectId`] — 12-byte, time-ordered identifier for new documents
//!
//! # Canonical Text
//!
//! [`text::encode`] writes ASCII-only extended JSON and [`text::parse`]
//! reads it back. [`text::decode_non_ascii`] restores readable characters
//! for export; `parse(decode_non_ascii(encode(v)))` reproduces `v`.

pub mod error;
pub mod object_id;
pub mod text;
pub mod value;

pub use error::TypeError;
pub use object_id::ObjectId;
pub use value::{identity_key, Document, Value, ID_FIELD};
