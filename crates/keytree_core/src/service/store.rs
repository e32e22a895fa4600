//! Opened-store handle shared by commands, runners and browsers.
//!
//! # Responsibility
//! - Own the tree and its persistence gateway for one opened store.
//! - Carry the read-only fact decided at open time.
//! - Serialize mutations behind one lock held across mutate and save.
//!
//! # Invariants
//! - The read-only flag never changes for the lifetime of a handle.
//! - Readers only observe the tree between completed mutations.

use crate::db::{open_db, open_db_in_memory, open_db_read_only, DbError};
use crate::model::node::DEFAULT_ICON;
use crate::model::tree::NodeTree;
use crate::repo::tree_repo::{PersistError, PersistResult, PersistenceGateway, SqliteTreeRepository};
use log::{info, warn};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Options deciding how a store is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Reject every structural mutation.
    pub read_only: bool,
    /// Root name used when initializing an empty store.
    pub root_name: String,
    /// Root policy used when initializing an empty store.
    pub allow_entries_at_root: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            root_name: "Root".to_string(),
            allow_entries_at_root: true,
        }
    }
}

/// Errors from opening or explicitly saving a store.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    Persist(PersistError),
    /// Store was opened read-only.
    ReadOnly,
    /// Read-only open found no saved tree to show.
    Empty,
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Persist(err) => write!(f, "{err}"),
            Self::ReadOnly => write!(f, "store is opened read-only"),
            Self::Empty => write!(f, "store holds no saved tree"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Persist(err) => Some(err),
            Self::ReadOnly | Self::Empty => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<PersistError> for StoreError {
    fn from(value: PersistError) -> Self {
        Self::Persist(value)
    }
}

/// Tree plus gateway, reachable only through the handle's lock.
pub struct StoreState {
    tree: NodeTree,
    gateway: Box<dyn PersistenceGateway>,
}

impl StoreState {
    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub(crate) fn tree_mut(&mut self) -> &mut NodeTree {
        &mut self.tree
    }

    /// Persists the tree as it is now.
    pub(crate) fn save(&mut self) -> PersistResult<()> {
        self.gateway.save(&self.tree)
    }
}

struct StoreInner {
    read_only: bool,
    state: Mutex<StoreState>,
}

/// Cloneable handle to one opened store.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<StoreInner>,
}

impl Debug for StoreHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("read_only", &self.inner.read_only)
            .finish_non_exhaustive()
    }
}

impl StoreHandle {
    /// Wraps an already loaded tree and its gateway.
    pub fn open(
        tree: NodeTree,
        gateway: impl PersistenceGateway + 'static,
        read_only: bool,
    ) -> Self {
        info!(
            "event=store_open module=service status=ok read_only={} groups={} entries={}",
            read_only,
            tree.group_count(),
            tree.entry_count()
        );
        Self {
            inner: Arc::new(StoreInner {
                read_only,
                state: Mutex::new(StoreState {
                    tree,
                    gateway: Box::new(gateway),
                }),
            }),
        }
    }

    /// Opens an SQLite store file.
    ///
    /// A writable open initializes an empty file with a fresh root; a
    /// read-only open requires a previously saved tree.
    pub fn open_sqlite(path: impl AsRef<Path>, options: &StoreOptions) -> Result<Self, StoreError> {
        let conn = if options.read_only {
            open_db_read_only(path)?
        } else {
            open_db(path)?
        };
        Self::open_connection(conn, options)
    }

    /// Opens a fresh in-memory SQLite store.
    pub fn open_sqlite_in_memory(options: &StoreOptions) -> Result<Self, StoreError> {
        Self::open_connection(open_db_in_memory()?, options)
    }

    fn open_connection(conn: Connection, options: &StoreOptions) -> Result<Self, StoreError> {
        let mut repo = SqliteTreeRepository::try_new(conn)?;
        let tree = match repo.load()? {
            Some(tree) => tree,
            None if options.read_only => return Err(StoreError::Empty),
            None => {
                let tree = NodeTree::new(
                    options.root_name.as_str(),
                    DEFAULT_ICON,
                    options.allow_entries_at_root,
                );
                repo.save(&tree)?;
                tree
            }
        };
        Ok(Self::open(tree, repo, options.read_only))
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    /// Runs `f` against the tree between mutations.
    pub fn read<T>(&self, f: impl FnOnce(&NodeTree) -> T) -> T {
        let state = self.lock();
        f(state.tree())
    }

    /// Returns a copy of the current tree.
    pub fn snapshot(&self) -> NodeTree {
        self.read(|tree| tree.clone())
    }

    /// Re-persists the current tree, e.g. after a failed save.
    pub fn save_now(&self) -> Result<(), StoreError> {
        if self.is_read_only() {
            return Err(StoreError::ReadOnly);
        }
        self.lock().save().map_err(StoreError::Persist)
    }

    /// Acquires the mutation guard.
    pub(crate) fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner.state.lock().unwrap_or_else(|poisoned| {
            warn!("event=store_lock module=service status=recovered reason=poisoned");
            PoisonError::into_inner(poisoned)
        })
    }
}
