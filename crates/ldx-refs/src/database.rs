//! Database references: the root of the reference tree.
//!
//! A [`DatabaseReference`] owns the store handle of one open file and the
//! ordered list of its collections. Structural operations (add, rename,
//! drop collection, add blob) run against the store first and only touch
//! the in-memory tree on success, updating it in place. [`refresh`]
//! re-reads everything and replaces the collection list wholesale.
//!
//! Closing is two-phase: [`before_dispose`] broadcasts `Dispose` to every
//! node exactly once, then [`close`] releases the store handle exactly once.
//!
//! [`refresh`]: DatabaseReference::refresh
//! [`before_dispose`]: DatabaseReference::before_dispose
//! [`close`]: DatabaseReference::close

use std::cell::{Cell, RefCell};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use std::sync::{Arc, Mutex, MutexGuard};

use ldx_store::{
    DocumentStore, FileStore, RebuildOptions, StoreError, StoreOptions, StoreResult,
    CHUNKS_COLLECTION, FILES_COLLECTION,
};
use ldx_types::{Document, Value};
use tracing::{debug, info, warn};

use crate::collection::{CollectionKind, CollectionReference, KeyOrder};
use crate::document::DocumentReference;
use crate::error::{RefError, Result};
use crate::names::validate_collection_name;
use crate::node::{ChangeAction, NodeRef, ReferenceChange, ReferenceNode};
use crate::query::QueryResult;

/// A store handle shared with background tasks.
pub(crate) type SharedStore = Arc<Mutex<Box<dyn DocumentStore>>>;

/// Options for opening a database.
#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    pub password: Option<String>,
    pub read_only: bool,
    /// Default order for [`CollectionReference::distinct_keys_default`].
    pub key_order: KeyOrder,
    pub chunk_size: Option<usize>,
}

impl OpenOptions {
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            ..Default::default()
        }
    }

    fn store_options(&self) -> StoreOptions {
        StoreOptions {
            password: self.password.clone().filter(|p| !p.is_empty()),
            read_only: self.read_only,
            chunk_size: self.chunk_size,
        }
    }
}

/// Contents of one collection as read from the store.
pub(crate) struct LoadedCollection {
    name: String,
    kind: CollectionKind,
    documents: Vec<Document>,
}

/// Read the visible collections: internal ones skipped, sorted by name.
pub(crate) fn load_collections(store: &dyn DocumentStore) -> StoreResult<Vec<LoadedCollection>> {
    let mut names = store.collection_names()?;
    names.retain(|name| name != CHUNKS_COLLECTION);
    names.sort();

    let mut loaded = Vec::with_capacity(names.len());
    for name in names {
        let kind = match store.collection_kind(&name)? {
            Some(kind) if kind.is_internal() => continue,
            Some(kind) => CollectionKind::from(kind),
            None => CollectionKind::Documents,
        };
        let documents = store.find_all(&name)?;
        loaded.push(LoadedCollection {
            name,
            kind,
            documents,
        });
    }
    Ok(loaded)
}

/// An opened store together with its initial contents. `Send`, so it can
/// be produced on a blocking thread and turned into a tree on the owner.
pub(crate) struct LoadedStore {
    store: Box<dyn DocumentStore>,
    collections: Vec<LoadedCollection>,
}

impl LoadedStore {
    pub(crate) fn open(path: &Path, options: &OpenOptions) -> Result<Self> {
        let store = FileStore::open(path, options.store_options())?;
        Self::from_store(Box::new(store))
    }

    pub(crate) fn create(path: &Path, options: &OpenOptions) -> Result<Self> {
        let store = FileStore::create(path, options.store_options())?;
        Self::from_store(Box::new(store))
    }

    pub(crate) fn from_store(mut store: Box<dyn DocumentStore>) -> Result<Self> {
        match load_collections(&*store) {
            Ok(collections) => Ok(Self { store, collections }),
            Err(e) => {
                let _ = store.close();
                Err(e.into())
            }
        }
    }

    /// Release a store that will not be turned into a tree.
    pub(crate) fn discard(mut self) {
        if let Err(e) = self.store.close() {
            warn!(error = %e, "failed to close discarded store");
        }
    }
}

pub(crate) fn lock_store(store: &SharedStore) -> Result<MutexGuard<'_, Box<dyn DocumentStore>>> {
    store
        .lock()
        .map_err(|_| RefError::Store(StoreError::Execution("store lock poisoned".into())))
}

/// One open database file.
pub struct DatabaseReference {
    self_ref: Weak<DatabaseReference>,
    location: PathBuf,
    name: String,
    format_version: u8,
    key_order: KeyOrder,
    read_only: bool,
    store: SharedStore,
    collections: RefCell<Vec<Rc<CollectionReference>>>,
    node: ReferenceNode,
    disposing: Cell<bool>,
    released: Cell<bool>,
}

impl DatabaseReference {
    /// Open an existing database file.
    pub fn open(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Rc<Self>> {
        let loaded = LoadedStore::open(path.as_ref(), options)?;
        Ok(Self::from_loaded(loaded, options))
    }

    /// Create a new, empty database file and open it.
    pub fn create(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Rc<Self>> {
        let loaded = LoadedStore::create(path.as_ref(), options)?;
        Ok(Self::from_loaded(loaded, options))
    }

    /// Wrap an already-open store, such as an in-memory one.
    pub fn from_store(store: Box<dyn DocumentStore>, options: &OpenOptions) -> Result<Rc<Self>> {
        let loaded = LoadedStore::from_store(store)?;
        Ok(Self::from_loaded(loaded, options))
    }

    pub(crate) fn from_loaded(loaded: LoadedStore, options: &OpenOptions) -> Rc<Self> {
        let LoadedStore { store, collections } = loaded;
        let location = store
            .location()
            .map_or_else(|| PathBuf::from(":memory:"), Path::to_path_buf);
        let name = location
            .file_name()
            .map_or_else(|| location.display().to_string(), |n| n.to_string_lossy().into_owned());
        let format_version = store.format_version();

        let db = Rc::new_cyclic(|self_ref: &Weak<Self>| {
            let collections = collections
                .into_iter()
                .map(|c| CollectionReference::new(c.name, c.kind, self_ref.clone(), c.documents))
                .collect();
            Self {
                self_ref: self_ref.clone(),
                location,
                name,
                format_version,
                key_order: options.key_order,
                read_only: options.read_only,
                store: Arc::new(Mutex::new(store)),
                collections: RefCell::new(collections),
                node: ReferenceNode::new(),
                disposing: Cell::new(false),
                released: Cell::new(false),
            }
        });
        info!(
            path = %db.location.display(),
            collections = db.collections.borrow().len(),
            "opened database"
        );
        db
    }

    pub fn node(&self) -> &ReferenceNode {
        &self.node
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Display name: the file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Format version of the underlying store.
    pub fn database_version(&self) -> u8 {
        self.format_version
    }

    pub fn key_order(&self) -> KeyOrder {
        self.key_order
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether close has started.
    pub fn is_disposed(&self) -> bool {
        self.disposing.get()
    }

    pub fn user_version(&self) -> Result<i32> {
        self.with_store(|store| store.user_version())
    }

    pub fn set_user_version(&self, version: i32) -> Result<()> {
        self.with_store(|store| store.set_user_version(version))
    }

    /// Current collections, sorted by name.
    pub fn collections(&self) -> Vec<Rc<CollectionReference>> {
        self.collections.borrow().clone()
    }

    /// Look up a collection by exact name.
    pub fn collection(&self, name: &str) -> Option<Rc<CollectionReference>> {
        self.collections
            .borrow()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    /// Whether a collection with this name exists, ignoring case.
    pub fn contains_collection(&self, name: &str) -> bool {
        self.collections
            .borrow()
            .iter()
            .any(|c| c.name().eq_ignore_ascii_case(name))
    }

    // ---------------------------------------------------------------
    // Structural operations
    // ---------------------------------------------------------------

    /// Re-read all collections and replace the list wholesale.
    ///
    /// Publishes `Remove` for the old collections, then `Add` for the new.
    /// References to the old collections are detached.
    pub fn refresh(&self) -> Result<()> {
        let loaded = self.with_store(|store| load_collections(store))?;
        self.replace_collections(loaded);
        Ok(())
    }

    pub(crate) fn replace_collections(&self, loaded: Vec<LoadedCollection>) {
        let fresh: Vec<Rc<CollectionReference>> = loaded
            .into_iter()
            .map(|c| CollectionReference::new(c.name, c.kind, self.self_ref.clone(), c.documents))
            .collect();
        let old = self.collections.replace(fresh.clone());
        for collection in &old {
            collection.detach();
        }
        info!(path = %self.location.display(), collections = fresh.len(), "refreshed database");

        if !old.is_empty() {
            let entities = old.into_iter().map(NodeRef::Collection).collect();
            self.raise(&ReferenceChange::new(ChangeAction::Remove, entities));
        }
        if !fresh.is_empty() {
            let entities = fresh.into_iter().map(NodeRef::Collection).collect();
            self.raise(&ReferenceChange::new(ChangeAction::Add, entities));
        }
    }

    /// Create an empty collection.
    ///
    /// The store creates collections on first insert, so a placeholder document
    /// is inserted and deleted again.
    pub fn add_collection(&self, name: &str) -> Result<Rc<CollectionReference>> {
        let exists = self.with_store(|store| Ok(store.collection_names()?.iter().any(|n| n == name)))?;
        if exists {
            return Err(RefError::DuplicateName {
                name: name.to_string(),
            });
        }
        validate_collection_name(name)?;

        self.with_store(|store| {
            let id = store.insert(name, Document::new())?;
            store.delete(name, &id)?;
            Ok(())
        })?;

        let collection = CollectionReference::new(
            name.to_string(),
            CollectionKind::Documents,
            self.self_ref.clone(),
            Vec::new(),
        );
        self.insert_sorted(collection.clone());
        info!(collection = %name, "added collection");
        collection.raise_self(ChangeAction::Add);
        Ok(collection)
    }

    /// Rename a collection in place. Existing references to it stay valid
    /// and report the new name.
    pub fn rename_collection(&self, old: &str, new: &str) -> Result<()> {
        let collection = self
            .collection(old)
            .ok_or_else(|| RefError::not_found(format!("collection {old}")))?;
        if collection.kind() == CollectionKind::Blobs {
            return Err(RefError::InvalidName {
                name: old.to_string(),
                reason: "the blob collection cannot be renamed".into(),
            });
        }
        validate_collection_name(new)?;
        self.with_store(|store| store.rename_collection(old, new))?;

        collection.set_name(new);
        self.collections.borrow_mut().sort_by_key(|c| c.name());
        info!(from = %old, to = %new, "renamed collection");
        collection.raise_self(ChangeAction::Update);
        Ok(())
    }

    /// Drop a collection from the store and from the tree.
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        let collection = self
            .collection(name)
            .ok_or_else(|| RefError::not_found(format!("collection {name}")))?;
        self.with_store(|store| store.drop_collection(name))?;

        self.collections
            .borrow_mut()
            .retain(|c| !Rc::ptr_eq(c, &collection));
        info!(collection = %name, "dropped collection");
        collection.raise_self(ChangeAction::Remove);
        collection.detach();
        Ok(())
    }

    /// Upload the file at `source` as blob `id`.
    pub fn add_blob(&self, id: &str, source: &Path) -> Result<Rc<DocumentReference>> {
        let data = fs::read(source).map_err(|e| match e.kind() {
            ErrorKind::NotFound => RefError::not_found(source.display().to_string()),
            _ => RefError::Io(e),
        })?;
        let filename = source
            .file_name()
            .map_or_else(|| id.to_string(), |n| n.to_string_lossy().into_owned());
        self.add_blob_bytes(id, &filename, &data)
    }

    /// Store `data` as blob `id`. The blob collection is created on first use.
    pub fn add_blob_bytes(
        &self,
        id: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<Rc<DocumentReference>> {
        if self.blob_exists(id)? {
            return Err(RefError::DuplicateId {
                collection: FILES_COLLECTION.to_string(),
                id: id.to_string(),
            });
        }
        let meta = self.with_store(|store| store.upload_blob(id, filename, data))?;
        info!(id = %id, filename = %filename, bytes = data.len(), "added blob");
        self.attach_blob(meta)
    }

    /// Add the metadata document of a freshly uploaded blob to the tree.
    ///
    /// When the tree has no blob collection yet, it is built from every file
    /// document the store holds, not just the new one.
    pub(crate) fn attach_blob(&self, meta: Document) -> Result<Rc<DocumentReference>> {
        if let Some(files) = self.collection(FILES_COLLECTION) {
            let doc = files.push_document(meta);
            doc.raise(ChangeAction::Add);
            return Ok(doc);
        }

        let id = meta.id().cloned().unwrap_or(Value::Null);
        let stored = self.with_store(|store| store.find_all(FILES_COLLECTION))?;
        let files = CollectionReference::new(
            FILES_COLLECTION.to_string(),
            CollectionKind::Blobs,
            self.self_ref.clone(),
            stored,
        );
        self.insert_sorted(files.clone());
        files.raise_self(ChangeAction::Add);
        let doc = match files.get(&id) {
            Some(doc) => doc,
            None => files.push_document(meta),
        };
        doc.raise(ChangeAction::Add);
        Ok(doc)
    }

    pub fn blob_exists(&self, id: &str) -> Result<bool> {
        self.with_store(|store| store.blob_exists(id))
    }

    // ---------------------------------------------------------------
    // Commands and maintenance
    // ---------------------------------------------------------------

    /// Execute a command. The tree is not refreshed afterwards.
    pub fn run_command(&self, command: &str) -> Result<Vec<Value>> {
        debug!(command = %command, "running command");
        self.with_store(|store| store.execute(command))
    }

    /// Execute a command and classify its result.
    pub fn query(&self, command: &str) -> Result<QueryResult> {
        Ok(QueryResult::from_values(self.run_command(command)?))
    }

    /// Rewrite the store, setting, changing or clearing (`None` or empty)
    /// its password. Returns the new size in bytes.
    ///
    /// Blocks for the duration of the rewrite; see
    /// [`rebuild_in_background`](crate::tasks::rebuild_in_background).
    pub fn rebuild(&self, password: Option<&str>) -> Result<u64> {
        let options = RebuildOptions {
            password: password.map(str::to_string),
        };
        let size = self.with_store(|store| store.rebuild(&options))?;
        self.refresh()?;
        Ok(size)
    }

    /// Engine metadata for display.
    pub fn engine_info(&self) -> Result<Document> {
        let mut info = self.with_store(|store| store.info())?;
        info.insert("name", self.name.clone());
        info.insert("databaseVersion", i32::from(self.format_version));
        Ok(info)
    }

    // ---------------------------------------------------------------
    // Disposal
    // ---------------------------------------------------------------

    /// First phase of close: publish `Dispose` on every document, every
    /// collection, then this database. Runs at most once.
    pub fn before_dispose(&self) {
        if self.disposing.replace(true) {
            return;
        }
        debug!(path = %self.location.display(), "disposing database");
        for collection in self.collections() {
            collection.broadcast_dispose();
        }
        let change =
            ReferenceChange::single(ChangeAction::Dispose, NodeRef::Database(self.self_ref.clone()));
        self.node.publish(&change);
    }

    /// Dispose and release the store handle. Safe to call repeatedly.
    pub fn close(&self) -> Result<()> {
        self.before_dispose();
        if self.released.replace(true) {
            return Ok(());
        }
        lock_store(&self.store)?.close()?;
        info!(path = %self.location.display(), "closed database");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    /// Run `op` against the store, failing if the database is disposed.
    pub(crate) fn with_store<T>(
        &self,
        op: impl FnOnce(&mut dyn DocumentStore) -> StoreResult<T>,
    ) -> Result<T> {
        self.ensure_live()?;
        let mut store = lock_store(&self.store)?;
        Ok(op(&mut **store)?)
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.disposing.get() {
            Err(RefError::Disposed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn store_handle(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub(crate) fn raise(&self, change: &ReferenceChange) {
        self.node.publish(change);
    }

    fn insert_sorted(&self, collection: Rc<CollectionReference>) {
        let name = collection.name();
        let mut collections = self.collections.borrow_mut();
        let index = collections.partition_point(|c| c.name() < name);
        collections.insert(index, collection);
    }
}

impl Drop for DatabaseReference {
    fn drop(&mut self) {
        if self.released.get() {
            return;
        }
        match self.store.lock() {
            Ok(mut store) => {
                if let Err(e) = store.close() {
                    warn!(path = %self.location.display(), error = %e, "failed to close store on drop");
                }
            }
            Err(_) => warn!(path = %self.location.display(), "store lock poisoned on drop"),
        }
    }
}

impl std::fmt::Debug for DatabaseReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseReference")
            .field("location", &self.location)
            .field("collections", &self.collections.borrow().len())
            .field("disposed", &self.disposing.get())
            .finish()
    }
}
