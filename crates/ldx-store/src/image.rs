//! The in-memory contents of a store.
//!
//! [`StoreImage`] holds every collection and implements the document,
//! collection and blob operations shared by all backends. Backends add
//! lifecycle (open/close), access checks and persistence around it.

use indexmap::IndexMap;
use ldx_types::{identity_key, Document, ObjectId, Value, ID_FIELD};
use serde::{Deserialize, Serialize};

use crate::blob::{self, CHUNKS_COLLECTION, FILES_COLLECTION};
use crate::error::{StoreError, StoreResult};
use crate::traits::CollectionKind;

/// Documents of one collection keyed by identity key, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredCollection {
    documents: IndexMap<String, Document>,
}

impl StoredCollection {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }
}

/// Complete store contents: collections plus the user version tag.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreImage {
    user_version: i32,
    collections: IndexMap<String, StoredCollection>,
}

impl StoreImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_version(&self) -> i32 {
        self.user_version
    }

    pub fn set_user_version(&mut self, version: i32) {
        self.user_version = version;
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    pub fn collection(&self, name: &str) -> Option<&StoredCollection> {
        self.collections.get(name)
    }

    pub fn collection_kind(&self, name: &str) -> Option<CollectionKind> {
        if !self.collections.contains_key(name) {
            return None;
        }
        Some(match name {
            FILES_COLLECTION => CollectionKind::Blobs,
            CHUNKS_COLLECTION => CollectionKind::BlobChunks,
            _ => CollectionKind::Documents,
        })
    }

    /// Total number of documents across collections.
    pub fn document_count(&self) -> usize {
        self.collections.values().map(StoredCollection::len).sum()
    }

    // ---------------------------------------------------------------
    // Documents
    // ---------------------------------------------------------------

    pub fn find_all(&self, collection: &str) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|c| c.documents.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn find_by_id(&self, collection: &str, id: &Value) -> Option<Document> {
        self.collections
            .get(collection)
            .and_then(|c| c.documents.get(&identity_key(id)))
            .cloned()
    }

    pub fn insert(&mut self, collection: &str, mut doc: Document) -> StoreResult<Value> {
        validate_collection_name(collection)?;
        let id = match doc.id() {
            Some(Value::Null) | None => {
                let id = Value::ObjectId(ObjectId::new());
                doc.insert(ID_FIELD, id.clone());
                id
            }
            Some(id) => validate_id(id)?.clone(),
        };
        doc.move_id_first();

        let key = identity_key(&id);
        let target = self.collections.entry(collection.to_string()).or_default();
        if target.documents.contains_key(&key) {
            return Err(StoreError::DuplicateId {
                collection: collection.to_string(),
                id: key,
            });
        }
        target.documents.insert(key, doc);
        Ok(id)
    }

    pub fn update(&mut self, collection: &str, doc: &Document) -> StoreResult<bool> {
        let id = doc
            .id()
            .ok_or_else(|| StoreError::InvalidDocument("document has no _id".into()))?;
        let key = identity_key(validate_id(id)?);
        let Some(target) = self.collections.get_mut(collection) else {
            return Ok(false);
        };
        match target.documents.get_mut(&key) {
            Some(existing) => {
                *existing = doc.clone();
                existing.move_id_first();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete a document. Deleting blob metadata also deletes its chunks.
    pub fn delete(&mut self, collection: &str, id: &Value) -> bool {
        let key = identity_key(id);
        let removed = self
            .collections
            .get_mut(collection)
            .and_then(|c| c.documents.shift_remove(&key));
        let Some(removed) = removed else {
            return false;
        };
        if collection == FILES_COLLECTION {
            if let Some(blob_id) = removed.id().and_then(Value::as_str) {
                self.delete_chunks(blob_id);
            }
        }
        true
    }

    // ---------------------------------------------------------------
    // Collections
    // ---------------------------------------------------------------

    pub fn rename_collection(&mut self, old: &str, new: &str) -> StoreResult<()> {
        validate_collection_name(new)?;
        if self.collections.contains_key(new) {
            return Err(StoreError::CollectionExists(new.to_string()));
        }
        let index = self
            .collections
            .get_index_of(old)
            .ok_or_else(|| StoreError::CollectionNotFound(old.to_string()))?;
        let contents = self
            .collections
            .shift_remove(old)
            .ok_or_else(|| StoreError::CollectionNotFound(old.to_string()))?;
        self.collections.shift_insert(index, new.to_string(), contents);
        Ok(())
    }

    pub fn drop_collection(&mut self, name: &str) -> bool {
        let dropped = self.collections.shift_remove(name).is_some();
        if dropped && name == FILES_COLLECTION {
            self.collections.shift_remove(CHUNKS_COLLECTION);
        }
        dropped
    }

    // ---------------------------------------------------------------
    // Blobs
    // ---------------------------------------------------------------

    pub fn upload_blob(
        &mut self,
        id: &str,
        filename: &str,
        data: &[u8],
        chunk_size: usize,
    ) -> StoreResult<Document> {
        if id.is_empty() {
            return Err(StoreError::InvalidDocument("blob id must not be empty".into()));
        }
        if self.blob_exists(id) {
            return Err(StoreError::DuplicateId {
                collection: FILES_COLLECTION.to_string(),
                id: id.to_string(),
            });
        }

        let chunk_size = chunk_size.max(1);
        let chunks = self
            .collections
            .entry(CHUNKS_COLLECTION.to_string())
            .or_default();
        let mut count = 0;
        for (index, piece) in data.chunks(chunk_size).enumerate() {
            let chunk_id = blob::chunk_id(id, index);
            let mut chunk = Document::with_id(chunk_id.clone());
            chunk.insert("data", Value::Binary(piece.to_vec()));
            chunks.documents.insert(identity_key(&chunk_id), chunk);
            count += 1;
        }

        let meta = blob::metadata(id, filename, data.len(), count);
        self.collections
            .entry(FILES_COLLECTION.to_string())
            .or_default()
            .documents
            .insert(identity_key(&Value::from(id)), meta.clone());
        Ok(meta)
    }

    pub fn blob_exists(&self, id: &str) -> bool {
        self.find_by_id(FILES_COLLECTION, &Value::from(id)).is_some()
    }

    pub fn download_blob(&self, id: &str) -> StoreResult<Vec<u8>> {
        let meta = self
            .find_by_id(FILES_COLLECTION, &Value::from(id))
            .ok_or_else(|| StoreError::DocumentNotFound(id.to_string()))?;
        let count = meta.get("chunks").and_then(Value::as_i64).unwrap_or(0);

        let mut bytes = Vec::new();
        for index in 0..count as usize {
            let chunk = self
                .find_by_id(CHUNKS_COLLECTION, &blob::chunk_id(id, index))
                .ok_or_else(|| {
                    StoreError::Execution(format!("blob {id} is missing chunk {index}"))
                })?;
            match chunk.get("data") {
                Some(Value::Binary(data)) => bytes.extend_from_slice(data),
                _ => {
                    return Err(StoreError::Execution(format!(
                        "blob {id} chunk {index} has no data"
                    )))
                }
            }
        }
        Ok(bytes)
    }

    fn delete_chunks(&mut self, id: &str) {
        let Some(chunks) = self.collections.get_mut(CHUNKS_COLLECTION) else {
            return;
        };
        chunks.documents.retain(|_, chunk| {
            !matches!(
                chunk.id().and_then(Value::as_document).and_then(|d| d.get("f")),
                Some(Value::String(f)) if f == id
            )
        });
    }

    // ---------------------------------------------------------------
    // Info
    // ---------------------------------------------------------------

    /// Engine metadata shared by every backend.
    pub fn info(&self) -> Document {
        let mut info = Document::new();
        info.insert("userVersion", self.user_version);
        info.insert("collections", self.collections.len() as i32);
        info.insert("documents", self.document_count() as i64);
        info
    }
}

fn validate_collection_name(name: &str) -> StoreResult<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(StoreError::Execution(format!(
            "invalid collection name: {name:?}"
        )));
    }
    Ok(())
}

fn validate_id(id: &Value) -> StoreResult<&Value> {
    match id {
        Value::Null | Value::Array(_) => Err(StoreError::InvalidDocument(format!(
            "_id cannot be of type {}",
            id.type_name()
        ))),
        other => Ok(other),
    }
}
