//! Collection references.

use std::cell::RefCell;
use std::path::Path;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use ldx_types::{identity_key, text, Document, ObjectId, Value, ID_FIELD};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::database::DatabaseReference;
use crate::document::DocumentReference;
use crate::error::{RefError, Result};
use crate::node::{ChangeAction, NodeRef, ReferenceChange, ReferenceNode};

/// Which variant of collection a reference wraps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// Plain documents.
    Documents,
    /// Blob metadata backed by chunk storage.
    Blobs,
}

impl From<ldx_store::CollectionKind> for CollectionKind {
    fn from(kind: ldx_store::CollectionKind) -> Self {
        match kind {
            ldx_store::CollectionKind::Blobs => Self::Blobs,
            _ => Self::Documents,
        }
    }
}

/// Order of the keys returned by [`CollectionReference::distinct_keys`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrder {
    /// The order in which keys are first met, document by document.
    #[default]
    FirstSeen,
    Alphabetical,
}

/// One named collection of an open database.
pub struct CollectionReference {
    self_ref: Weak<CollectionReference>,
    name: RefCell<String>,
    kind: CollectionKind,
    database: RefCell<Weak<DatabaseReference>>,
    documents: RefCell<Vec<Rc<DocumentReference>>>,
    node: ReferenceNode,
}

impl CollectionReference {
    pub(crate) fn new(
        name: String,
        kind: CollectionKind,
        database: Weak<DatabaseReference>,
        documents: Vec<Document>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|self_ref: &Weak<Self>| {
            let documents = documents
                .into_iter()
                .map(|doc| DocumentReference::new(doc, self_ref.clone()))
                .collect();
            Self {
                self_ref: self_ref.clone(),
                name: RefCell::new(name),
                kind,
                database: RefCell::new(database),
                documents: RefCell::new(documents),
                node: ReferenceNode::new(),
            }
        })
    }

    pub fn node(&self) -> &ReferenceNode {
        &self.node
    }

    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    /// Owning database, or `None` once dropped or replaced by a refresh.
    pub fn database(&self) -> Option<Rc<DatabaseReference>> {
        self.database.borrow().upgrade()
    }

    /// The current documents, in load and insertion order.
    pub fn documents(&self) -> Vec<Rc<DocumentReference>> {
        self.documents.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.documents.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.borrow().is_empty()
    }

    /// Look up a document by `_id`.
    pub fn get(&self, id: &Value) -> Option<Rc<DocumentReference>> {
        let key = identity_key(id);
        self.documents
            .borrow()
            .iter()
            .find(|d| d.identity_key() == key)
            .cloned()
    }

    /// Insert a document, assigning a fresh `ObjectId` when it has no `_id`.
    pub fn add_document(&self, mut doc: Document) -> Result<Rc<DocumentReference>> {
        let database = self.database().ok_or(RefError::Detached)?;
        if doc.id().map_or(true, Value::is_null) {
            doc.insert(ID_FIELD, ObjectId::new());
        }
        doc.move_id_first();

        let name = self.name();
        database.with_store(|store| store.insert(&name, doc.clone()))?;

        let reference = DocumentReference::new(doc, self.self_ref.clone());
        self.documents.borrow_mut().push(reference.clone());
        debug!(collection = %name, id = %reference.identity_key(), "document added");
        reference.raise(ChangeAction::Add);
        Ok(reference)
    }

    /// Delete a member document from the store and from this collection.
    ///
    /// `Remove` is published on the document and its ancestors before the
    /// document is detached.
    pub fn remove_document(&self, doc: &Rc<DocumentReference>) -> Result<()> {
        let name = self.name();
        let member = self
            .documents
            .borrow()
            .iter()
            .any(|d| Rc::ptr_eq(d, doc));
        if !member {
            return Err(RefError::not_found(format!(
                "document {} in {name}",
                doc.identity_key()
            )));
        }
        let database = self.database().ok_or(RefError::Detached)?;
        let id = doc.id();
        database.with_store(|store| store.delete(&name, &id))?;

        self.documents.borrow_mut().retain(|d| !Rc::ptr_eq(d, doc));
        debug!(collection = %name, id = %doc.identity_key(), "document removed");
        doc.raise(ChangeAction::Remove);
        doc.detach();
        Ok(())
    }

    /// Whether any document has a field named `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.documents.borrow().iter().any(|d| d.contains_key(key))
    }

    /// Union of field names over all documents, without duplicates.
    pub fn distinct_keys(&self, order: KeyOrder) -> Vec<String> {
        distinct_keys(self.documents().iter().map(|d| d.snapshot()), order)
    }

    /// [`distinct_keys`](Self::distinct_keys) in the database's configured order.
    pub fn distinct_keys_default(&self) -> Vec<String> {
        let order = self
            .database()
            .map_or(KeyOrder::default(), |db| db.key_order());
        self.distinct_keys(order)
    }

    /// Insert documents parsed from canonical text.
    ///
    /// A document inserts one; an array inserts each element. Blank input
    /// inserts nothing. Non-document array elements are rejected before
    /// anything is written.
    pub fn import_text(&self, input: &str) -> Result<Vec<Rc<DocumentReference>>> {
        if input.trim().is_empty() {
            return Ok(Vec::new());
        }
        let parsed =
            text::parse(input).map_err(|e| RefError::InvalidDocument(e.to_string()))?;
        let docs = match parsed {
            Value::Document(doc) => vec![doc],
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    item.into_document().map_err(|e| {
                        RefError::InvalidDocument(format!("element {i} is not a document: {e}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            other => {
                return Err(RefError::InvalidDocument(format!(
                    "expected a document or an array of documents, found {}",
                    other.type_name()
                )))
            }
        };

        let mut added = Vec::with_capacity(docs.len());
        for doc in docs {
            added.push(self.add_document(doc)?);
        }
        info!(collection = %self.name(), count = added.len(), "imported documents");
        Ok(added)
    }

    /// Blob operations, for the blob collection.
    pub fn as_blobs(&self) -> Option<BlobCollection<'_>> {
        match self.kind {
            CollectionKind::Blobs => Some(BlobCollection { collection: self }),
            CollectionKind::Documents => None,
        }
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.borrow_mut() = name.to_string();
    }

    pub(crate) fn push_document(&self, doc: Document) -> Rc<DocumentReference> {
        let reference = DocumentReference::new(doc, self.self_ref.clone());
        self.documents.borrow_mut().push(reference.clone());
        reference
    }

    /// Publish on this node, then on the database.
    pub(crate) fn raise(&self, change: &ReferenceChange) {
        self.node.publish(change);
        if let Some(database) = self.database() {
            database.raise(change);
        }
    }

    /// Publish a change about this collection itself.
    pub(crate) fn raise_self(&self, action: ChangeAction) {
        if let Some(this) = self.self_ref.upgrade() {
            self.raise(&ReferenceChange::single(action, NodeRef::Collection(this)));
        }
    }

    /// First phase of close: tell every document, then this collection.
    /// Nothing is propagated upward.
    pub(crate) fn broadcast_dispose(&self) {
        for doc in self.documents() {
            let change =
                ReferenceChange::single(ChangeAction::Dispose, NodeRef::Document(doc.clone()));
            doc.node().publish(&change);
        }
        if let Some(this) = self.self_ref.upgrade() {
            let change = ReferenceChange::single(ChangeAction::Dispose, NodeRef::Collection(this));
            self.node.publish(&change);
        }
    }

    pub(crate) fn detach(&self) {
        *self.database.borrow_mut() = Weak::new();
    }
}

impl std::fmt::Debug for CollectionReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionReference")
            .field("name", &*self.name.borrow())
            .field("kind", &self.kind)
            .field("documents", &self.len())
            .finish()
    }
}

/// Distinct field names over a set of documents.
pub fn distinct_keys<I>(docs: I, order: KeyOrder) -> Vec<String>
where
    I: IntoIterator<Item = Document>,
{
    let mut seen = IndexSet::new();
    for doc in docs {
        for key in doc.keys() {
            if !seen.contains(key) {
                seen.insert(key.to_string());
            }
        }
    }
    let mut keys: Vec<String> = seen.into_iter().collect();
    if order == KeyOrder::Alphabetical {
        keys.sort();
    }
    keys
}

/// Blob operations on the blob collection.
#[derive(Clone, Copy)]
pub struct BlobCollection<'a> {
    collection: &'a CollectionReference,
}

impl BlobCollection<'_> {
    /// The file documents.
    pub fn files(&self) -> Vec<Rc<DocumentReference>> {
        self.collection.documents()
    }

    pub fn find(&self, id: &str) -> Option<Rc<DocumentReference>> {
        self.collection.get(&Value::from(id))
    }

    /// Write the contents of blob `id` to `destination`.
    pub fn save_blob(&self, id: &str, destination: &Path) -> Result<u64> {
        let doc = self
            .find(id)
            .ok_or_else(|| RefError::not_found(format!("blob {id}")))?;
        let blob = doc
            .as_blob()
            .ok_or_else(|| RefError::not_found(format!("blob {id}")))?;
        blob.save_to(destination)
    }
}
