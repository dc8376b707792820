//! Change notification.
//!
//! Every database, collection and document reference embeds a
//! [`ReferenceNode`]: a list of listeners that receive each published
//! [`ReferenceChange`] synchronously, in subscription order. Changes travel
//! upward only. A document republishes on its collection, the collection on
//! its database, and the database on its own listeners.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use thiserror::Error;
use tracing::{debug, warn};

use crate::collection::CollectionReference;
use crate::database::DatabaseReference;
use crate::document::DocumentReference;

/// What happened to the affected entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeAction {
    Add,
    Remove,
    Update,
    /// The owning database is about to be closed.
    Dispose,
}

/// An entity affected by a change.
///
/// The database is held weakly so that a listener keeping a change around
/// does not keep a closed database alive.
#[derive(Clone)]
pub enum NodeRef {
    Database(Weak<DatabaseReference>),
    Collection(Rc<CollectionReference>),
    Document(Rc<DocumentReference>),
}

impl NodeRef {
    pub fn as_collection(&self) -> Option<&Rc<CollectionReference>> {
        match self {
            Self::Collection(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Rc<DocumentReference>> {
        match self {
            Self::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_database(&self) -> Option<Rc<DatabaseReference>> {
        match self {
            Self::Database(db) => db.upgrade(),
            _ => None,
        }
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database(db) => match db.upgrade() {
                Some(db) => write!(f, "Database({})", db.name()),
                None => f.write_str("Database(<dropped>)"),
            },
            Self::Collection(c) => write!(f, "Collection({})", c.name()),
            Self::Document(d) => write!(f, "Document({})", d.identity_key()),
        }
    }
}

/// A typed change event.
#[derive(Clone, Debug)]
pub struct ReferenceChange {
    pub action: ChangeAction,
    pub entities: Vec<NodeRef>,
}

impl ReferenceChange {
    pub fn new(action: ChangeAction, entities: Vec<NodeRef>) -> Self {
        Self { action, entities }
    }

    pub fn single(action: ChangeAction, entity: NodeRef) -> Self {
        Self::new(action, vec![entity])
    }

    /// Documents among the affected entities.
    pub fn documents(&self) -> impl Iterator<Item = &Rc<DocumentReference>> {
        self.entities.iter().filter_map(NodeRef::as_document)
    }

    /// Collections among the affected entities.
    pub fn collections(&self) -> impl Iterator<Item = &Rc<CollectionReference>> {
        self.entities.iter().filter_map(NodeRef::as_collection)
    }
}

/// Failure reported by a listener. Logged and otherwise ignored.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Handle returned by [`ReferenceNode::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Listener = Rc<dyn Fn(&ReferenceChange) -> Result<(), ListenerError>>;

/// Listener registry of one reference.
#[derive(Default)]
pub struct ReferenceNode {
    listeners: RefCell<Vec<(SubscriptionId, Listener)>>,
    next_id: Cell<u64>,
}

impl ReferenceNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It sees every change published after this call.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&ReferenceChange) -> Result<(), ListenerError> + 'static,
    {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Deliver `change` to every listener registered at the time of the
    /// call. A failing or panicking listener is logged and skipped; the
    /// rest still run. Returns the number of listeners that succeeded.
    pub fn publish(&self, change: &ReferenceChange) -> usize {
        let snapshot: Vec<(SubscriptionId, Listener)> = self.listeners.borrow().clone();
        if snapshot.is_empty() {
            return 0;
        }
        debug!(
            action = ?change.action,
            entities = change.entities.len(),
            listeners = snapshot.len(),
            "publishing change"
        );

        let mut delivered = 0;
        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(change))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(subscription = id.0, action = ?change.action, error = %e, "listener failed")
                }
                Err(_) => warn!(subscription = id.0, action = ?change.action, "listener panicked"),
            }
        }
        delivered
    }
}

impl fmt::Debug for ReferenceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceNode")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
