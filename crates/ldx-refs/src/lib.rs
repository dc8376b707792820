//! Reference graph for LDX.
//!
//! This crate turns an open store into a tree of observable references:
//! a [`DatabaseReference`] owns its [`CollectionReference`]s, which own
//! their [`DocumentReference`]s. Edits made through the tree go to the
//! store first and then update the in-memory tree in place, publishing a
//! [`ReferenceChange`] that travels upward from document to collection to
//! database.
//!
//! # Architecture
//!
//! - The tree is single-threaded (`Rc`/`RefCell`). Parents own children;
//!   children hold weak back-references.
//! - **Notification** is synchronous. Each reference embeds a
//!   [`ReferenceNode`]; a failing listener is logged and skipped.
//! - **Closing** is two-phase: `Dispose` is broadcast once to every node,
//!   then the store handle is released once.
//! - The [`StoreRegistry`] keeps at most one open reference per file.
//! - Blocking store work can run on tokio's blocking pool through
//!   [`tasks`]; results are applied on the calling task.
//!
//! # Modules
//!
//! - [`error`] — Error types for reference operations
//! - [`node`] — Change notification primitive
//! - [`database`], [`collection`], [`document`] — The reference tree
//! - [`registry`] — Open-database registry and password prompting
//! - [`query`] — Classification of command results
//! - [`aggregate`] — Serialization of document selections
//! - [`config`] — Explorer settings
//! - [`names`] — Collection name validation
//! - [`tasks`] — Background open and rebuild

pub mod aggregate;
pub mod collection;
pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod names;
pub mod node;
pub mod query;
pub mod registry;
pub mod tasks;

pub use aggregate::DocumentAggregator;
pub use collection::{distinct_keys, BlobCollection, CollectionKind, CollectionReference, KeyOrder};
pub use config::ExplorerConfig;
pub use database::{DatabaseReference, OpenOptions};
pub use document::{BlobDocument, DocumentReference};
pub use error::{RefError, Result};
pub use names::validate_collection_name;
pub use node::{ChangeAction, ListenerError, NodeRef, ReferenceChange, ReferenceNode, SubscriptionId};
pub use query::{QueryResult, ResultShape, ResultTable};
pub use registry::{PasswordPrompt, StoreRegistry};
pub use tasks::CancellationToken;
