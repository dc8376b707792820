//! The set of open databases, one per file.
//!
//! A [`StoreRegistry`] is created once by the application and owns every
//! open [`DatabaseReference`]. Opening a path that is already open returns
//! the existing reference, so a file never has two store handles.
//! Dropping the registry closes everything still open.

use std::cell::RefCell;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::config::ExplorerConfig;
use crate::database::DatabaseReference;
use crate::error::{RefError, Result};
use crate::tasks::{self, CancellationToken};

/// What a password prompt is told about the request.
#[derive(Clone, Copy, Debug)]
pub struct PasswordPrompt<'a> {
    pub path: &'a Path,
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Whether a previous password was rejected.
    pub retry: bool,
}

/// Open databases keyed by canonical path.
#[derive(Default)]
pub struct StoreRegistry {
    config: ExplorerConfig,
    open: RefCell<IndexMap<PathBuf, Rc<DatabaseReference>>>,
}

impl StoreRegistry {
    pub fn new(config: ExplorerConfig) -> Self {
        Self {
            config,
            open: RefCell::new(IndexMap::new()),
        }
    }

    pub fn config(&self) -> &ExplorerConfig {
        &self.config
    }

    /// The open database for `path`, if any.
    pub fn get(&self, path: impl AsRef<Path>) -> Option<Rc<DatabaseReference>> {
        let key = canonical(path.as_ref()).ok()?;
        self.live(&key)
    }

    pub fn is_open(&self, path: impl AsRef<Path>) -> bool {
        self.get(path).is_some()
    }

    /// Return the open database for `path`, opening it if needed.
    ///
    /// When the path is already open the password is ignored.
    pub fn get_or_open(
        &self,
        path: impl AsRef<Path>,
        password: Option<&str>,
    ) -> Result<Rc<DatabaseReference>> {
        let key = canonical(path.as_ref())?;
        if let Some(db) = self.live(&key) {
            debug!(path = %key.display(), "database already open");
            return Ok(db);
        }
        let db = DatabaseReference::open(&key, &self.config.open_options(password))?;
        Ok(self.register(key, db))
    }

    /// Create a new database file and register it.
    pub fn create(
        &self,
        path: impl AsRef<Path>,
        password: Option<&str>,
    ) -> Result<Rc<DatabaseReference>> {
        let key = canonical_in_parent(path.as_ref())?;
        let db = DatabaseReference::create(&key, &self.config.open_options(password))?;
        Ok(self.register(key, db))
    }

    /// Open `path`, asking `prompt` for a password while the file demands
    /// one. The prompt is shown at most `max_password_attempts` times; it
    /// returning `None` cancels.
    pub fn open_with_prompt<F>(
        &self,
        path: impl AsRef<Path>,
        mut prompt: F,
    ) -> Result<Rc<DatabaseReference>>
    where
        F: FnMut(&PasswordPrompt<'_>) -> Option<String>,
    {
        let key = canonical(path.as_ref())?;
        if let Some(db) = self.live(&key) {
            return Ok(db);
        }
        if !ldx_store::is_password_protected(&key)? {
            return self.get_or_open(&key, None);
        }

        let max_attempts = self.config.max_password_attempts.max(1);
        let mut last_error = RefError::PasswordRequired { path: key.clone() };
        for attempt in 1..=max_attempts {
            let request = PasswordPrompt {
                path: &key,
                attempt,
                max_attempts,
                retry: attempt > 1,
            };
            let Some(password) = prompt(&request) else {
                info!(path = %key.display(), "password prompt canceled");
                return Err(RefError::Canceled);
            };
            match self.get_or_open(&key, Some(&password)) {
                Ok(db) => return Ok(db),
                Err(e) if e.is_credential_failure() => {
                    warn!(path = %key.display(), attempt, "password rejected");
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    /// Open `path` on the blocking pool. A canceled request never
    /// registers anything.
    pub async fn open_in_background(
        &self,
        path: impl AsRef<Path>,
        password: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<Rc<DatabaseReference>> {
        if cancel.is_cancelled() {
            return Err(RefError::Canceled);
        }
        let key = canonical(path.as_ref())?;
        if let Some(db) = self.live(&key) {
            return Ok(db);
        }
        let options = self.config.open_options(password);
        let db = tasks::open_in_background(key.clone(), options, cancel.clone()).await?;
        if cancel.is_cancelled() {
            db.close()?;
            return Err(RefError::Canceled);
        }
        // Another open of the same path may have finished first.
        if let Some(existing) = self.live(&key) {
            db.close()?;
            return Ok(existing);
        }
        Ok(self.register(key, db))
    }

    /// Register a database opened elsewhere. If its path is already open
    /// the new reference is closed and the existing one returned.
    pub fn adopt(&self, db: Rc<DatabaseReference>) -> Result<Rc<DatabaseReference>> {
        let key = canonical(db.location()).unwrap_or_else(|_| db.location().to_path_buf());
        if let Some(existing) = self.live(&key) {
            if !Rc::ptr_eq(&existing, &db) {
                db.close()?;
            }
            return Ok(existing);
        }
        Ok(self.register(key, db))
    }

    /// Close and unregister `path`. Returns `false` if it was not open.
    ///
    /// A file moved or deleted while open is still found by the path it
    /// was opened under.
    pub fn close(&self, path: impl AsRef<Path>) -> Result<bool> {
        let Some(key) = self.registered_key(path.as_ref()) else {
            return Ok(false);
        };
        let removed = self.open.borrow_mut().shift_remove(&key);
        match removed {
            Some(db) => {
                db.close()?;
                info!(path = %key.display(), "unregistered database");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Open databases in opening order. Entries closed directly through
    /// their reference are pruned.
    pub fn databases(&self) -> Vec<Rc<DatabaseReference>> {
        self.prune();
        self.open.borrow().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.prune();
        self.open.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every open database. All are attempted; the first error is
    /// returned.
    pub fn close_all(&self) -> Result<()> {
        let drained: Vec<_> = self.open.borrow_mut().drain(..).collect();
        let mut first_error = None;
        for (path, db) in drained {
            if let Err(e) = db.close() {
                warn!(path = %path.display(), error = %e, "failed to close database");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn registered_key(&self, path: &Path) -> Option<PathBuf> {
        if let Ok(key) = canonical(path) {
            return Some(key);
        }
        let mut candidates = vec![path.to_path_buf()];
        if let Ok(key) = canonical_in_parent(path) {
            candidates.push(key);
        }
        self.open
            .borrow()
            .iter()
            .find(|(key, db)| {
                candidates
                    .iter()
                    .any(|c| c == *key || c.as_path() == db.location())
            })
            .map(|(key, _)| key.clone())
    }

    fn live(&self, key: &Path) -> Option<Rc<DatabaseReference>> {
        let mut open = self.open.borrow_mut();
        match open.get(key) {
            Some(db) if db.is_disposed() => {
                open.shift_remove(key);
                None
            }
            Some(db) => Some(db.clone()),
            None => None,
        }
    }

    fn register(&self, key: PathBuf, db: Rc<DatabaseReference>) -> Rc<DatabaseReference> {
        info!(path = %key.display(), "registered database");
        self.open.borrow_mut().insert(key, db.clone());
        db
    }

    fn prune(&self) {
        self.open.borrow_mut().retain(|_, db| !db.is_disposed());
    }
}

impl Drop for StoreRegistry {
    fn drop(&mut self) {
        if let Err(e) = self.close_all() {
            warn!(error = %e, "error closing databases on shutdown");
        }
    }
}

fn canonical(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => RefError::not_found(path.display().to_string()),
        _ => RefError::Io(e),
    })
}

/// Canonical parent joined with the file name, for paths that need not exist.
fn canonical_in_parent(path: &Path) -> Result<PathBuf> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| RefError::not_found(path.display().to_string()))?;
    Ok(canonical(parent)?.join(file_name))
}
