//! In-memory group/entry hierarchy.
//!
//! # Responsibility
//! - Own every group and entry of one opened store in flat id-keyed tables.
//! - Enforce root/parent invariants on insert and remove.
//!
//! # Invariants
//! - Exactly one group (the root) has no parent.
//! - A group is in the table iff it is reachable from the root.
//! - Every entry is listed by exactly the group its `group` field names.
//! - Every attachment an entry links is present in the pool. Pool blobs stay
//!   after their last entry is removed, until `remove_unlinked_attachments`.
//! - No I/O happens here; persistence is the gateway's job.

use crate::model::node::{AttachmentId, Entry, EntryId, Group, GroupId, IconId, NodeRef};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Result type used by tree operations.
pub type TreeResult<T> = Result<T, TreeError>;

/// Errors from tree operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Node id is not present in the tree.
    NotFound(NodeRef),
    /// Target parent is absent or may not hold the node.
    InvalidParent(GroupId),
    /// The root group cannot be removed.
    CannotRemoveRoot,
    /// Display name is blank after trim.
    InvalidDisplayName,
    /// Node id is already present in the tree.
    DuplicateId(NodeRef),
    /// Group passed to `insert_group` already lists children.
    NotDetached(GroupId),
    /// Attachment id is not in the pool.
    AttachmentNotFound(AttachmentId),
    /// Rebuilt tree violates structural invariants.
    Corrupt(Vec<TreeViolation>),
}

impl Display for TreeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(node) => write!(f, "{node} not found"),
            Self::InvalidParent(id) => write!(f, "group {id} cannot be used as parent"),
            Self::CannotRemoveRoot => write!(f, "the root group cannot be removed"),
            Self::InvalidDisplayName => write!(f, "display name must not be blank"),
            Self::DuplicateId(node) => write!(f, "{node} already exists"),
            Self::NotDetached(id) => write!(f, "group {id} must have no children to be inserted"),
            Self::AttachmentNotFound(id) => write!(f, "attachment {id} not found"),
            Self::Corrupt(violations) => {
                write!(f, "tree has {} invariant violation(s)", violations.len())?;
                if let Some(first) = violations.first() {
                    write!(f, ", first: {first}")?;
                }
                Ok(())
            }
        }
    }
}

impl Error for TreeError {}

/// One broken structural invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeViolation {
    MissingRoot(GroupId),
    RootHasParent(GroupId),
    DuplicateNode(NodeRef),
    /// Group's parent id is not in the table.
    DanglingParent { group: GroupId, parent: GroupId },
    /// Parent lists a child id that is missing or names another parent.
    ChildMismatch { parent: GroupId, child: GroupId },
    /// Group is listed by more than one parent, or twice by one.
    SharedChild(GroupId),
    /// Group cannot be reached from the root (orphan or cycle).
    Unreachable(GroupId),
    /// Entry names a group that is not in the table.
    EntryGroupMissing { entry: EntryId, group: GroupId },
    /// Entry is not listed by the group it names, or listed elsewhere.
    EntryMismatch { entry: EntryId, group: GroupId },
    /// Entry links an attachment missing from the pool.
    DanglingAttachment {
        entry: EntryId,
        attachment: AttachmentId,
    },
}

impl Display for TreeViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRoot(id) => write!(f, "root group {id} is missing"),
            Self::RootHasParent(id) => write!(f, "root group {id} has a parent"),
            Self::DuplicateNode(node) => write!(f, "{node} appears more than once"),
            Self::DanglingParent { group, parent } => {
                write!(f, "group {group} names missing parent {parent}")
            }
            Self::ChildMismatch { parent, child } => {
                write!(f, "group {parent} lists child {child} that does not point back")
            }
            Self::SharedChild(id) => write!(f, "group {id} is listed more than once"),
            Self::Unreachable(id) => write!(f, "group {id} is unreachable from the root"),
            Self::EntryGroupMissing { entry, group } => {
                write!(f, "entry {entry} names missing group {group}")
            }
            Self::EntryMismatch { entry, group } => {
                write!(f, "entry {entry} is not listed consistently under group {group}")
            }
            Self::DanglingAttachment { entry, attachment } => {
                write!(f, "entry {entry} links missing attachment {attachment}")
            }
        }
    }
}

/// Everything detached by one `remove_group` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedSubtree {
    /// The group that was asked to be removed.
    pub group: Group,
    /// Every descendant group, parents before children.
    pub descendants: Vec<Group>,
    /// Every entry owned anywhere in the subtree.
    pub entries: Vec<Entry>,
}

impl RemovedSubtree {
    /// Returns the ids of the removed group and all its descendants.
    pub fn group_ids(&self) -> Vec<GroupId> {
        std::iter::once(self.group.id)
            .chain(self.descendants.iter().map(|group| group.id))
            .collect()
    }
}

/// Arena-backed tree of one opened store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTree {
    root: GroupId,
    groups: HashMap<GroupId, Group>,
    entries: HashMap<EntryId, Entry>,
    attachments: HashMap<AttachmentId, Vec<u8>>,
}

impl NodeTree {
    /// Creates a tree holding only a root group.
    ///
    /// `allow_entries_at_root` is the root policy stored on the root group.
    pub fn new(
        root_name: impl Into<String>,
        root_icon: IconId,
        allow_entries_at_root: bool,
    ) -> Self {
        let mut root = Group::new(Uuid::new_v4(), root_name, root_icon);
        root.allow_entries_at_root = allow_entries_at_root;
        let root_id = root.id;
        let mut groups = HashMap::new();
        groups.insert(root_id, root);
        Self {
            root: root_id,
            groups,
            entries: HashMap::new(),
            attachments: HashMap::new(),
        }
    }

    /// Rebuilds a tree from persisted rows.
    ///
    /// # Errors
    /// - `Corrupt` when the rows do not form a valid tree rooted at `root`.
    pub fn from_parts(
        root: GroupId,
        groups: Vec<Group>,
        entries: Vec<Entry>,
        attachments: HashMap<AttachmentId, Vec<u8>>,
    ) -> TreeResult<Self> {
        let mut duplicates = Vec::new();
        let mut group_table = HashMap::with_capacity(groups.len());
        for group in groups {
            let id = group.id;
            if group_table.insert(id, group).is_some() {
                duplicates.push(TreeViolation::DuplicateNode(NodeRef::Group(id)));
            }
        }
        let mut entry_table = HashMap::with_capacity(entries.len());
        for entry in entries {
            let id = entry.id;
            if entry_table.insert(id, entry).is_some() {
                duplicates.push(TreeViolation::DuplicateNode(NodeRef::Entry(id)));
            }
        }

        let tree = Self {
            root,
            groups: group_table,
            entries: entry_table,
            attachments,
        };
        let mut violations = duplicates;
        violations.extend(tree.invariant_violations());
        if violations.is_empty() {
            Ok(tree)
        } else {
            Err(TreeError::Corrupt(violations))
        }
    }

    pub fn root_id(&self) -> GroupId {
        self.root
    }

    /// Returns the root group.
    ///
    /// # Panics
    /// Never for trees built by `new` or accepted by `from_parts`: both
    /// guarantee the root row, and `remove_group` refuses the root.
    pub fn root(&self) -> &Group {
        &self.groups[&self.root]
    }

    /// Identity check against this tree's root.
    pub fn is_root(&self, id: GroupId) -> bool {
        id == self.root
    }

    /// Returns `false` only for the root when its policy forbids direct entries.
    pub fn can_add_entry(&self, id: GroupId) -> bool {
        let forbidden_at_root = self
            .groups
            .get(&self.root)
            .is_some_and(|root| !root.allow_entries_at_root);
        !(self.is_root(id) && forbidden_at_root)
    }

    pub fn lookup_group(&self, id: GroupId) -> TreeResult<&Group> {
        self.groups
            .get(&id)
            .ok_or(TreeError::NotFound(NodeRef::Group(id)))
    }

    pub fn lookup_entry(&self, id: EntryId) -> TreeResult<&Entry> {
        self.entries
            .get(&id)
            .ok_or(TreeError::NotFound(NodeRef::Entry(id)))
    }

    pub fn contains_group(&self, id: GroupId) -> bool {
        self.groups.contains_key(&id)
    }

    pub fn contains_entry(&self, id: EntryId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Returns the parent of a group, `None` for the root.
    pub fn parent_of(&self, id: GroupId) -> TreeResult<Option<&Group>> {
        let group = self.lookup_group(id)?;
        match group.parent {
            Some(parent) => self.lookup_group(parent).map(Some),
            None => Ok(None),
        }
    }

    /// Lists child groups in display order.
    pub fn child_groups(&self, id: GroupId) -> TreeResult<Vec<&Group>> {
        let group = self.lookup_group(id)?;
        Ok(group
            .groups
            .iter()
            .filter_map(|child| self.groups.get(child))
            .collect())
    }

    /// Lists child entries in display order.
    pub fn child_entries(&self, id: GroupId) -> TreeResult<Vec<&Entry>> {
        let group = self.lookup_group(id)?;
        Ok(group
            .entries
            .iter()
            .filter_map(|entry| self.entries.get(entry))
            .collect())
    }

    /// Returns the parent chain of a group, nearest first, ending at the root.
    pub fn ancestors(&self, id: GroupId) -> TreeResult<Vec<GroupId>> {
        let mut chain = Vec::new();
        let mut cursor = self.lookup_group(id)?.parent;
        while let Some(current) = cursor {
            if chain.len() > self.groups.len() {
                break;
            }
            chain.push(current);
            cursor = self.lookup_group(current)?.parent;
        }
        Ok(chain)
    }

    /// Walks all groups from the root, parents before children.
    pub fn walk_groups(&self) -> Vec<&Group> {
        let mut order = Vec::with_capacity(self.groups.len());
        let mut seen = HashSet::with_capacity(self.groups.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(group) = self.groups.get(&id) else {
                continue;
            };
            order.push(group);
            stack.extend(group.groups.iter().rev().copied());
        }
        order
    }

    /// Returns a group id not used by any group in this tree.
    pub fn mint_group_id(&self) -> GroupId {
        loop {
            let candidate = Uuid::new_v4();
            if !self.groups.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Appends a detached group under `parent` and indexes it.
    ///
    /// # Errors
    /// - `InvalidParent` when `parent` is not part of the tree.
    /// - `DuplicateId` when the group id is already used.
    /// - `NotDetached` when the group already lists children.
    /// - `InvalidDisplayName` when the name is blank.
    pub fn insert_group(&mut self, parent: GroupId, mut group: Group) -> TreeResult<GroupId> {
        if !self.groups.contains_key(&parent) {
            return Err(TreeError::InvalidParent(parent));
        }
        if self.groups.contains_key(&group.id) {
            return Err(TreeError::DuplicateId(NodeRef::Group(group.id)));
        }
        if !group.is_empty() {
            return Err(TreeError::NotDetached(group.id));
        }
        group.name = normalize_display_name(&group.name)?;
        group.parent = Some(parent);

        let id = group.id;
        if let Some(parent_group) = self.groups.get_mut(&parent) {
            parent_group.groups.push(id);
        }
        self.groups.insert(id, group);
        Ok(id)
    }

    /// Appends an entry under `group_id` and indexes it.
    ///
    /// # Errors
    /// - `InvalidParent` when the group is absent or the root policy forbids
    ///   entries there.
    /// - `DuplicateId` when the entry id is already used.
    pub fn insert_entry(&mut self, group_id: GroupId, mut entry: Entry) -> TreeResult<EntryId> {
        if !self.groups.contains_key(&group_id) || !self.can_add_entry(group_id) {
            return Err(TreeError::InvalidParent(group_id));
        }
        if self.entries.contains_key(&entry.id) {
            return Err(TreeError::DuplicateId(NodeRef::Entry(entry.id)));
        }
        if let Some(missing) = entry
            .attachments
            .iter()
            .find(|id| !self.attachments.contains_key(id))
        {
            return Err(TreeError::AttachmentNotFound(*missing));
        }
        entry.group = group_id;

        let id = entry.id;
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.entries.push(id);
        }
        self.entries.insert(id, entry);
        Ok(id)
    }

    /// Detaches a group and drops its whole subtree from the tables.
    ///
    /// # Errors
    /// - `NotFound` when the group is not in the tree.
    /// - `CannotRemoveRoot` when `id` is the root.
    pub fn remove_group(&mut self, id: GroupId) -> TreeResult<RemovedSubtree> {
        let parent = self.lookup_group(id)?.parent;
        if self.is_root(id) {
            return Err(TreeError::CannotRemoveRoot);
        }

        let subtree = self.subtree_ids(id);
        if let Some(parent_group) = parent.and_then(|parent| self.groups.get_mut(&parent)) {
            parent_group.groups.retain(|child| *child != id);
        }

        let mut removed_groups = Vec::with_capacity(subtree.len());
        let mut removed_entries = Vec::new();
        for group_id in subtree {
            let Some(group) = self.groups.remove(&group_id) else {
                continue;
            };
            for entry_id in &group.entries {
                if let Some(entry) = self.entries.remove(entry_id) {
                    removed_entries.push(entry);
                }
            }
            removed_groups.push(group);
        }

        let mut removed_groups = removed_groups.into_iter();
        let group = removed_groups
            .next()
            .ok_or(TreeError::NotFound(NodeRef::Group(id)))?;
        Ok(RemovedSubtree {
            group,
            descendants: removed_groups.collect(),
            entries: removed_entries,
        })
    }

    /// Detaches an entry from its owning group.
    ///
    /// # Errors
    /// - `NotFound` when the entry or its owning group is gone.
    pub fn remove_entry(&mut self, id: EntryId) -> TreeResult<Entry> {
        let owner = self.lookup_entry(id)?.group;
        let group = self
            .groups
            .get_mut(&owner)
            .ok_or(TreeError::NotFound(NodeRef::Group(owner)))?;
        group.entries.retain(|entry| *entry != id);
        self.entries
            .remove(&id)
            .ok_or(TreeError::NotFound(NodeRef::Entry(id)))
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    pub fn attachment(&self, id: AttachmentId) -> TreeResult<&[u8]> {
        self.attachments
            .get(&id)
            .map(Vec::as_slice)
            .ok_or(TreeError::AttachmentNotFound(id))
    }

    /// Iterates the whole attachment pool, linked or not.
    pub fn attachments(&self) -> impl Iterator<Item = (AttachmentId, &[u8])> {
        self.attachments
            .iter()
            .map(|(id, data)| (*id, data.as_slice()))
    }

    /// Stores a blob in the pool and returns its new id.
    pub fn add_attachment(&mut self, data: Vec<u8>) -> AttachmentId {
        let id = loop {
            let candidate = Uuid::new_v4();
            if !self.attachments.contains_key(&candidate) {
                break candidate;
            }
        };
        self.attachments.insert(id, data);
        id
    }

    /// Links a pool blob to an entry; linking twice is a no-op.
    ///
    /// # Errors
    /// - `NotFound` when the entry is absent.
    /// - `AttachmentNotFound` when the blob is not in the pool.
    pub fn link_attachment(
        &mut self,
        entry_id: EntryId,
        attachment: AttachmentId,
    ) -> TreeResult<()> {
        if !self.attachments.contains_key(&attachment) {
            return Err(TreeError::AttachmentNotFound(attachment));
        }
        let entry = self
            .entries
            .get_mut(&entry_id)
            .ok_or(TreeError::NotFound(NodeRef::Entry(entry_id)))?;
        if !entry.attachments.contains(&attachment) {
            entry.attachments.push(attachment);
        }
        Ok(())
    }

    /// Lists pool blobs no entry links, sorted by id.
    pub fn unlinked_attachments(&self) -> Vec<AttachmentId> {
        let linked: HashSet<AttachmentId> = self
            .entries
            .values()
            .flat_map(|entry| entry.attachments.iter().copied())
            .collect();
        let mut unlinked: Vec<AttachmentId> = self
            .attachments
            .keys()
            .filter(|id| !linked.contains(id))
            .copied()
            .collect();
        unlinked.sort();
        unlinked
    }

    /// Drops every pool blob no entry links and returns the dropped ids.
    pub fn remove_unlinked_attachments(&mut self) -> Vec<AttachmentId> {
        let unlinked = self.unlinked_attachments();
        for id in &unlinked {
            self.attachments.remove(id);
        }
        unlinked
    }

    /// Reports every broken structural invariant.
    ///
    /// Always empty for trees built through the public API.
    pub fn invariant_violations(&self) -> Vec<TreeViolation> {
        let mut violations = Vec::new();

        match self.groups.get(&self.root) {
            None => {
                violations.push(TreeViolation::MissingRoot(self.root));
                return violations;
            }
            Some(root) if root.parent.is_some() => {
                violations.push(TreeViolation::RootHasParent(self.root));
            }
            Some(_) => {}
        }

        for group in self.groups.values() {
            if let Some(parent) = group.parent {
                if !self.groups.contains_key(&parent) {
                    violations.push(TreeViolation::DanglingParent {
                        group: group.id,
                        parent,
                    });
                }
            }
            for child in &group.groups {
                let points_back = self
                    .groups
                    .get(child)
                    .is_some_and(|child_group| child_group.parent == Some(group.id));
                if !points_back {
                    violations.push(TreeViolation::ChildMismatch {
                        parent: group.id,
                        child: *child,
                    });
                }
            }
            for entry_id in &group.entries {
                let points_back = self
                    .entries
                    .get(entry_id)
                    .is_some_and(|entry| entry.group == group.id);
                if !points_back {
                    violations.push(TreeViolation::EntryMismatch {
                        entry: *entry_id,
                        group: group.id,
                    });
                }
            }
        }

        let mut reached = HashSet::with_capacity(self.groups.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if !reached.insert(id) {
                violations.push(TreeViolation::SharedChild(id));
                continue;
            }
            if let Some(group) = self.groups.get(&id) {
                stack.extend(group.groups.iter().copied());
            }
        }
        for id in self.groups.keys() {
            if !reached.contains(id) {
                violations.push(TreeViolation::Unreachable(*id));
            }
        }

        for entry in self.entries.values() {
            for attachment in &entry.attachments {
                if !self.attachments.contains_key(attachment) {
                    violations.push(TreeViolation::DanglingAttachment {
                        entry: entry.id,
                        attachment: *attachment,
                    });
                }
            }
            match self.groups.get(&entry.group) {
                None => violations.push(TreeViolation::EntryGroupMissing {
                    entry: entry.id,
                    group: entry.group,
                }),
                Some(group) => {
                    let listed = group.entries.iter().filter(|id| **id == entry.id).count();
                    if listed != 1 {
                        violations.push(TreeViolation::EntryMismatch {
                            entry: entry.id,
                            group: entry.group,
                        });
                    }
                }
            }
        }

        violations
    }

    fn subtree_ids(&self, id: GroupId) -> Vec<GroupId> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            order.push(current);
            if let Some(group) = self.groups.get(&current) {
                stack.extend(group.groups.iter().rev().copied());
            }
        }
        order
    }
}

/// Trims a display name and rejects blank values.
pub fn normalize_display_name(value: &str) -> TreeResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TreeError::InvalidDisplayName);
    }
    Ok(trimmed.to_string())
}
