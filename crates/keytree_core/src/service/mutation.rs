//! Structural mutation commands.
//!
//! # Responsibility
//! - Validate preconditions, mutate the tree, then persist, in that order.
//! - Report a specific error kind for every failure.
//!
//! # Invariants
//! - Precondition failures leave the tree and the backing store untouched.
//! - Persistence runs only after the in-memory tree reflects the end state.
//! - A failed save keeps the in-memory change; there is no rollback.
//! - The store lock is held from precondition check through save.

use crate::model::node::{AttachmentId, Entry, EntryId, Group, GroupId, IconId, Node, NodeRef};
use crate::model::tree::{RemovedSubtree, TreeError};
use crate::repo::tree_repo::PersistError;
use crate::service::store::StoreHandle;
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Result delivered for one executed command.
pub type MutationResult = Result<MutationOutcome, MutationError>;

/// One change to the tree and its attachment pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationCommand {
    CreateGroup {
        parent: GroupId,
        name: String,
        icon: IconId,
    },
    DeleteGroup {
        target: GroupId,
    },
    DeleteEntry {
        target: EntryId,
    },
    /// Drops attachment blobs no entry links any more.
    RemoveUnlinkedData,
}

/// What a successful (or applied-but-unsaved) command changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    GroupCreated(Group),
    GroupDeleted(RemovedSubtree),
    EntryDeleted(Entry),
    /// Ids of the dropped blobs, sorted; empty when nothing was unlinked.
    UnlinkedDataRemoved(Vec<AttachmentId>),
}

impl MutationOutcome {
    /// Snapshot of the node the presentation layer should add or remove;
    /// `None` when no visible node changed.
    pub fn node(&self) -> Option<Node> {
        match self {
            Self::GroupCreated(group) => Some(Node::Group(group.clone())),
            Self::GroupDeleted(removed) => Some(Node::Group(removed.group.clone())),
            Self::EntryDeleted(entry) => Some(Node::Entry(entry.clone())),
            Self::UnlinkedDataRemoved(_) => None,
        }
    }

    /// Returns `true` when the outcome added a node.
    pub fn is_addition(&self) -> bool {
        matches!(self, Self::GroupCreated(_))
    }
}

/// Errors from executing a command.
#[derive(Debug)]
pub enum MutationError {
    /// Store is opened read-only.
    ReadOnlyViolation,
    /// Target no longer exists, e.g. double delete.
    NotFound(NodeRef),
    /// Parent is not part of the tree.
    InvalidParent(GroupId),
    /// The root group cannot be deleted.
    CannotRemoveRoot,
    /// Group name is blank after trim.
    InvalidDisplayName,
    /// Any other structural rejection from the tree.
    Structural(TreeError),
    /// The tree changed but the backing store write failed.
    Persist {
        applied: Box<MutationOutcome>,
        source: PersistError,
    },
}

impl MutationError {
    /// `true` when the command was refused before any change.
    pub fn is_rejection(&self) -> bool {
        !self.may_not_be_saved()
    }

    /// `true` when the in-memory tree is ahead of the backing store.
    pub fn may_not_be_saved(&self) -> bool {
        matches!(self, Self::Persist { .. })
    }

    /// Stable code for logs and user messages.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ReadOnlyViolation => "read_only",
            Self::NotFound(_) => "not_found",
            Self::InvalidParent(_) => "invalid_parent",
            Self::CannotRemoveRoot => "cannot_remove_root",
            Self::InvalidDisplayName => "invalid_display_name",
            Self::Structural(_) => "structural",
            Self::Persist { .. } => "persist_failed",
        }
    }
}

impl Display for MutationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadOnlyViolation => write!(f, "store is read-only"),
            Self::NotFound(node) => write!(f, "{node} not found"),
            Self::InvalidParent(id) => write!(f, "group {id} cannot be used as parent"),
            Self::CannotRemoveRoot => write!(f, "the root group cannot be removed"),
            Self::InvalidDisplayName => write!(f, "display name must not be blank"),
            Self::Structural(err) => write!(f, "{err}"),
            Self::Persist { source, .. } => {
                write!(f, "change applied but the store could not be saved: {source}")
            }
        }
    }
}

impl Error for MutationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Structural(err) => Some(err),
            Self::Persist { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<TreeError> for MutationError {
    fn from(value: TreeError) -> Self {
        match value {
            TreeError::NotFound(node) => Self::NotFound(node),
            TreeError::InvalidParent(id) => Self::InvalidParent(id),
            TreeError::CannotRemoveRoot => Self::CannotRemoveRoot,
            TreeError::InvalidDisplayName => Self::InvalidDisplayName,
            other => Self::Structural(other),
        }
    }
}

impl MutationCommand {
    pub fn create_group(parent: GroupId, name: impl Into<String>, icon: IconId) -> Self {
        Self::CreateGroup {
            parent,
            name: name.into(),
            icon,
        }
    }

    pub fn delete_group(target: GroupId) -> Self {
        Self::DeleteGroup { target }
    }

    pub fn delete_entry(target: EntryId) -> Self {
        Self::DeleteEntry { target }
    }

    pub fn remove_unlinked_data() -> Self {
        Self::RemoveUnlinkedData
    }

    /// Builds the delete command matching a node kind.
    pub fn delete(node: NodeRef) -> Self {
        match node {
            NodeRef::Group(id) => Self::delete_group(id),
            NodeRef::Entry(id) => Self::delete_entry(id),
        }
    }

    /// Short operation name used in logs.
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::CreateGroup { .. } => "create_group",
            Self::DeleteGroup { .. } => "delete_group",
            Self::DeleteEntry { .. } => "delete_entry",
            Self::RemoveUnlinkedData => "remove_unlinked_data",
        }
    }

    /// Node the command acts on; the parent for creation, `None` for
    /// store-wide commands.
    pub fn target(&self) -> Option<NodeRef> {
        match self {
            Self::CreateGroup { parent, .. } => Some(NodeRef::Group(*parent)),
            Self::DeleteGroup { target } => Some(NodeRef::Group(*target)),
            Self::DeleteEntry { target } => Some(NodeRef::Entry(*target)),
            Self::RemoveUnlinkedData => None,
        }
    }

    /// Runs the command against `store`: check, mutate, save.
    pub fn execute(self, store: &StoreHandle) -> MutationResult {
        let started_at = Instant::now();
        let op = self.op_name();
        let target = self
            .target()
            .map_or_else(|| "store".to_string(), |node| node.to_string());
        info!("event=mutation module=service status=start op={op} target={target}");

        let mut state = store.lock();
        if store.is_read_only() {
            warn!(
                "event=mutation module=service status=rejected op={} error_code={}",
                op,
                MutationError::ReadOnlyViolation.code()
            );
            return Err(MutationError::ReadOnlyViolation);
        }

        let tree = state.tree_mut();
        let applied = match self {
            Self::CreateGroup { parent, name, icon } => {
                let group = Group::new(tree.mint_group_id(), name, icon);
                tree.insert_group(parent, group)
                    .and_then(|id| tree.lookup_group(id).cloned())
                    .map(MutationOutcome::GroupCreated)
            }
            Self::DeleteGroup { target } => {
                tree.remove_group(target).map(MutationOutcome::GroupDeleted)
            }
            Self::DeleteEntry { target } => {
                tree.remove_entry(target).map(MutationOutcome::EntryDeleted)
            }
            Self::RemoveUnlinkedData => Ok(MutationOutcome::UnlinkedDataRemoved(
                tree.remove_unlinked_attachments(),
            )),
        };
        let applied = match applied {
            Ok(applied) => applied,
            Err(err) => {
                let err = MutationError::from(err);
                warn!(
                    "event=mutation module=service status=rejected op={} error_code={} error={}",
                    op,
                    err.code(),
                    err
                );
                return Err(err);
            }
        };

        match state.save() {
            Ok(()) => {
                info!(
                    "event=mutation module=service status=ok op={} target={} duration_ms={}",
                    op,
                    target,
                    started_at.elapsed().as_millis()
                );
                Ok(applied)
            }
            Err(source) => {
                error!(
                    "event=mutation module=service status=error op={} error_code=persist_failed duration_ms={} error={}",
                    op,
                    started_at.elapsed().as_millis(),
                    source
                );
                Err(MutationError::Persist {
                    applied: Box::new(applied),
                    source,
                })
            }
        }
    }
}
