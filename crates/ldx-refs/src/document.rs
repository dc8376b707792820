//! Document references.

use std::cell::RefCell;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::Path;
use std::rc::{Rc, Weak};

use ldx_types::{text, Document, Value, ID_FIELD};
use tracing::debug;

use crate::collection::{CollectionKind, CollectionReference};
use crate::error::{RefError, Result};
use crate::node::{ChangeAction, NodeRef, ReferenceChange, ReferenceNode};

/// One document of a collection.
///
/// Equality and hashing use the identity key only; two references to
/// documents with the same `_id` are equal whatever their contents.
pub struct DocumentReference {
    self_ref: Weak<DocumentReference>,
    identity: String,
    value: RefCell<Document>,
    collection: RefCell<Weak<CollectionReference>>,
    node: ReferenceNode,
}

impl DocumentReference {
    /// Wrap a stored document. The document must carry an `_id`.
    pub(crate) fn new(value: Document, collection: Weak<CollectionReference>) -> Rc<Self> {
        let identity = value.identity_key().unwrap_or_default();
        Rc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            identity,
            value: RefCell::new(value),
            collection: RefCell::new(collection),
            node: ReferenceNode::new(),
        })
    }

    pub fn node(&self) -> &ReferenceNode {
        &self.node
    }

    /// The `_id` value.
    pub fn id(&self) -> Value {
        self.value.borrow().id().cloned().unwrap_or(Value::Null)
    }

    /// Canonical text of the `_id` value.
    pub fn identity_key(&self) -> &str {
        &self.identity
    }

    /// Owning collection, or `None` once the document has been removed.
    pub fn collection(&self) -> Option<Rc<CollectionReference>> {
        self.collection.borrow().upgrade()
    }

    /// A copy of the current contents.
    pub fn snapshot(&self) -> Document {
        self.value.borrow().clone()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.value.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.value.borrow().keys().map(str::to_string).collect()
    }

    /// Read a field, failing with [`RefError::KeyNotFound`] if absent.
    pub fn get(&self, key: &str) -> Result<Value> {
        self.try_get(key).ok_or_else(|| RefError::KeyNotFound {
            key: key.to_string(),
        })
    }

    pub fn try_get(&self, key: &str) -> Option<Value> {
        self.value.borrow().get(key).cloned()
    }

    /// Set a field in the store and in memory, then publish `Update`.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        if key == ID_FIELD {
            return Err(RefError::InvalidDocument(
                "the _id field cannot be changed".into(),
            ));
        }
        let mut updated = self.snapshot();
        updated.insert(key, value);
        self.save(updated)
    }

    /// Remove a field. Returns the old value, or `None` if the field was
    /// absent (nothing is written or published in that case).
    pub fn remove_field(&self, key: &str) -> Result<Option<Value>> {
        if key == ID_FIELD {
            return Err(RefError::InvalidDocument(
                "the _id field cannot be removed".into(),
            ));
        }
        let mut updated = self.snapshot();
        let Some(old) = updated.remove(key) else {
            return Ok(None);
        };
        self.save(updated)?;
        Ok(Some(old))
    }

    /// Replace the whole document. The replacement must keep the same `_id`.
    pub fn replace(&self, mut doc: Document) -> Result<()> {
        match doc.identity_key() {
            Some(key) if key == self.identity => {}
            _ => {
                return Err(RefError::InvalidDocument(format!(
                    "replacement must keep _id {}",
                    self.identity
                )))
            }
        }
        doc.move_id_first();
        self.save(doc)
    }

    fn save(&self, updated: Document) -> Result<()> {
        let collection = self.collection().ok_or(RefError::Detached)?;
        let database = collection.database().ok_or(RefError::Detached)?;
        let name = collection.name();
        let found = database.with_store(|store| store.update(&name, &updated))?;
        if !found {
            return Err(RefError::not_found(format!(
                "document {} in {name}",
                self.identity
            )));
        }
        *self.value.borrow_mut() = updated;
        debug!(collection = %name, id = %self.identity, "document updated");
        self.raise(ChangeAction::Update);
        Ok(())
    }

    /// Delete this document through its collection.
    pub fn remove_self(&self) -> Result<()> {
        let collection = self.collection().ok_or(RefError::Detached)?;
        let this = self.self_ref.upgrade().ok_or(RefError::Detached)?;
        collection.remove_document(&this)
    }

    /// Canonical text of the document. `decoded` restores non-ASCII
    /// characters for display.
    pub fn serialize(&self, decoded: bool) -> String {
        let encoded = text::encode_pretty(&Value::Document(self.snapshot()));
        if decoded {
            text::decode_non_ascii(&encoded)
        } else {
            encoded
        }
    }

    pub fn serialize_to<W: Write>(&self, writer: &mut W, decoded: bool) -> Result<()> {
        text::encode_to_writer(&Value::Document(self.snapshot()), writer, decoded)?;
        Ok(())
    }

    /// Blob view, for documents of a blob collection.
    pub fn as_blob(&self) -> Option<BlobDocument<'_>> {
        match self.collection()?.kind() {
            CollectionKind::Blobs => Some(BlobDocument { document: self }),
            CollectionKind::Documents => None,
        }
    }

    pub(crate) fn self_rc(&self) -> Option<Rc<Self>> {
        self.self_ref.upgrade()
    }

    /// Publish on this node and every ancestor.
    pub(crate) fn raise(&self, action: ChangeAction) {
        let Some(this) = self.self_rc() else {
            return;
        };
        let change = ReferenceChange::single(action, NodeRef::Document(this));
        self.node.publish(&change);
        if let Some(collection) = self.collection() {
            collection.raise(&change);
        }
    }

    pub(crate) fn detach(&self) {
        *self.collection.borrow_mut() = Weak::new();
    }
}

impl PartialEq for DocumentReference {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for DocumentReference {}

impl Hash for DocumentReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

impl std::fmt::Debug for DocumentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentReference")
            .field("id", &self.identity)
            .finish()
    }
}

/// Blob metadata accessors for a document of a blob collection.
#[derive(Clone, Copy)]
pub struct BlobDocument<'a> {
    document: &'a DocumentReference,
}

impl BlobDocument<'_> {
    pub fn id(&self) -> String {
        match self.document.id() {
            Value::String(id) => id,
            other => other.display_text(),
        }
    }

    pub fn filename(&self) -> Option<String> {
        self.string_field("filename")
    }

    pub fn mime_type(&self) -> Option<String> {
        self.string_field("mimeType")
    }

    /// Stored length in bytes.
    pub fn size(&self) -> u64 {
        self.document
            .try_get("length")
            .and_then(|v| v.as_i64())
            .map_or(0, |n| n.max(0) as u64)
    }

    /// The id made safe for use as a file name.
    pub fn id_as_filename(&self) -> String {
        self.id()
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect()
    }

    /// Write the blob contents to `destination`. Returns the byte count.
    pub fn save_to(&self, destination: &Path) -> Result<u64> {
        let collection = self.document.collection().ok_or(RefError::Detached)?;
        let database = collection.database().ok_or(RefError::Detached)?;
        let id = self.id();
        let bytes = database.with_store(|store| store.download_blob(&id))?;
        fs::write(destination, &bytes)?;
        debug!(id = %id, path = %destination.display(), bytes = bytes.len(), "saved blob");
        Ok(bytes.len() as u64)
    }

    fn string_field(&self, key: &str) -> Option<String> {
        self.document
            .try_get(key)
            .and_then(|v| v.as_str().map(str::to_string))
    }
}
