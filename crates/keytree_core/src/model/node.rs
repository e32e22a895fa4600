//! Group and entry records.
//!
//! # Responsibility
//! - Define the two node kinds held by the tree: groups and entries.
//! - Name the shared attachment blobs entries refer to.
//! - Keep relations as ids so the tree can own every node in flat tables.
//!
//! # Invariants
//! - `Group::parent` is `None` only for the tree root.
//! - `Entry::group` always names the group that lists the entry.
//! - Ids are never reused for another node.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a group.
pub type GroupId = Uuid;

/// Stable identifier of an entry.
pub type EntryId = Uuid;

/// Stable identifier of one blob in the attachment pool.
pub type AttachmentId = Uuid;

/// Reference into the store's built-in icon set.
pub type IconId = u32;

/// Icon assigned when a caller does not pick one.
pub const DEFAULT_ICON: IconId = 0;

/// Container node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub icon: IconId,
    /// `None` only for the root.
    pub parent: Option<GroupId>,
    /// Child groups in display order.
    pub groups: Vec<GroupId>,
    /// Child entries in display order.
    pub entries: Vec<EntryId>,
    /// Root policy: whether entries may sit directly under this group when it
    /// is the root. Ignored for every other group.
    pub allow_entries_at_root: bool,
}

impl Group {
    /// Creates a detached group with no children.
    pub fn new(id: GroupId, name: impl Into<String>, icon: IconId) -> Self {
        Self {
            id,
            name: name.into(),
            icon,
            parent: None,
            groups: Vec::new(),
            entries: Vec::new(),
            allow_entries_at_root: true,
        }
    }

    /// Returns whether the group has no child groups and no entries.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.entries.is_empty()
    }
}

/// Leaf record carrying secret payload.
///
/// The payload is opaque here; field layout and encryption belong to the
/// storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    /// Owning group.
    pub group: GroupId,
    pub title: String,
    pub icon: IconId,
    pub payload: Vec<u8>,
    /// Pool blobs this entry links, in display order.
    #[serde(default)]
    pub attachments: Vec<AttachmentId>,
}

impl Entry {
    /// Creates an entry with a generated id.
    ///
    /// `group` is overwritten when the entry is inserted into a tree.
    pub fn new(title: impl Into<String>, icon: IconId, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            group: Uuid::nil(),
            title: title.into(),
            icon,
            payload,
            attachments: Vec::new(),
        }
    }
}

/// Address of one node, used by requests and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum NodeRef {
    Group(GroupId),
    Entry(EntryId),
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Group(id) => write!(f, "group {id}"),
            Self::Entry(id) => write!(f, "entry {id}"),
        }
    }
}

/// Owned snapshot of one node, handed to tree observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Group(Group),
    Entry(Entry),
}

impl Node {
    /// Returns the address of this node.
    pub fn node_ref(&self) -> NodeRef {
        match self {
            Self::Group(group) => NodeRef::Group(group.id),
            Self::Entry(entry) => NodeRef::Entry(entry.id),
        }
    }
}
