use keytree_core::{
    Entry, Group, GroupId, NodeRef, NodeTree, TreeError, TreeViolation, DEFAULT_ICON,
};
use std::collections::HashMap;

fn add_group(tree: &mut NodeTree, parent: GroupId, name: &str) -> GroupId {
    let group = Group::new(tree.mint_group_id(), name, DEFAULT_ICON);
    tree.insert_group(parent, group).unwrap()
}

#[test]
fn new_tree_holds_only_the_root() {
    let tree = NodeTree::new("Root", DEFAULT_ICON, true);

    assert_eq!(tree.group_count(), 1);
    assert_eq!(tree.entry_count(), 0);
    assert!(tree.root().parent.is_none());
    assert_eq!(tree.lookup_group(tree.root_id()).unwrap().name, "Root");
    assert!(tree.invariant_violations().is_empty());
}

#[test]
fn inserted_group_is_indexed_and_linked_to_parent() {
    let mut tree = NodeTree::new("Root", DEFAULT_ICON, true);
    let root = tree.root_id();

    let bills = add_group(&mut tree, root, "  Bills ");

    let group = tree.lookup_group(bills).unwrap();
    assert_eq!(group.name, "Bills");
    assert_eq!(group.parent, Some(root));
    assert_eq!(tree.root().groups, vec![bills]);
    assert_eq!(tree.parent_of(bills).unwrap().map(|g| g.id), Some(root));
    assert!(!tree.is_root(bills));
}

#[test]
fn insert_group_rejects_missing_parent_without_changes() {
    let mut tree = NodeTree::new("Root", DEFAULT_ICON, true);
    let before = tree.clone();
    let stranger = uuid::Uuid::new_v4();

    let err = tree
        .insert_group(stranger, Group::new(tree.mint_group_id(), "X", DEFAULT_ICON))
        .unwrap_err();

    assert_eq!(err, TreeError::InvalidParent(stranger));
    assert_eq!(tree, before);
}

#[test]
fn insert_group_rejects_blank_names_and_duplicate_ids() {
    let mut tree = NodeTree::new("Root", DEFAULT_ICON, true);
    let root = tree.root_id();

    let blank = tree
        .insert_group(root, Group::new(tree.mint_group_id(), "   ", DEFAULT_ICON))
        .unwrap_err();
    assert_eq!(blank, TreeError::InvalidDisplayName);

    let err = tree
        .insert_group(root, Group::new(root, "Again", DEFAULT_ICON))
        .unwrap_err();
    assert_eq!(err, TreeError::DuplicateId(NodeRef::Group(root)));
    assert_eq!(tree.group_count(), 1);
}

#[test]
fn remove_group_drops_whole_subtree() {
    let mut tree = NodeTree::new("Root", DEFAULT_ICON, true);
    let root = tree.root_id();
    let a = add_group(&mut tree, root, "A");
    let b = add_group(&mut tree, a, "B");
    let c = add_group(&mut tree, b, "C");
    let sibling = add_group(&mut tree, root, "Sibling");
    let e = tree
        .insert_entry(b, Entry::new("E", DEFAULT_ICON, b"pw".to_vec()))
        .unwrap();
    let f = tree
        .insert_entry(c, Entry::new("F", DEFAULT_ICON, Vec::new()))
        .unwrap();

    let removed = tree.remove_group(a).unwrap();

    assert_eq!(removed.group.id, a);
    assert_eq!(removed.group_ids(), vec![a, b, c]);
    assert_eq!(removed.entries.len(), 2);
    for id in [a, b, c] {
        assert_eq!(
            tree.lookup_group(id).unwrap_err(),
            TreeError::NotFound(NodeRef::Group(id))
        );
    }
    assert!(!tree.contains_entry(e));
    assert!(!tree.contains_entry(f));
    assert_eq!(tree.root().groups, vec![sibling]);
    assert!(tree.invariant_violations().is_empty());
}

#[test]
fn remove_root_fails_and_leaves_tree_unchanged() {
    let mut tree = NodeTree::new("Root", DEFAULT_ICON, true);
    let root = tree.root_id();
    add_group(&mut tree, root, "A");
    let before = tree.clone();

    assert_eq!(tree.remove_group(root).unwrap_err(), TreeError::CannotRemoveRoot);
    assert_eq!(tree.remove_group(root).unwrap_err(), TreeError::CannotRemoveRoot);
    assert_eq!(tree, before);
}

#[test]
fn remove_group_twice_reports_not_found() {
    let mut tree = NodeTree::new("Root", DEFAULT_ICON, true);
    let root = tree.root_id();
    let a = add_group(&mut tree, root, "A");

    tree.remove_group(a).unwrap();

    assert_eq!(
        tree.remove_group(a).unwrap_err(),
        TreeError::NotFound(NodeRef::Group(a))
    );
}

#[test]
fn remove_entry_detaches_and_second_remove_is_not_found() {
    let mut tree = NodeTree::new("Root", DEFAULT_ICON, true);
    let root = tree.root_id();
    let a = add_group(&mut tree, root, "A");
    let e = tree
        .insert_entry(a, Entry::new("E", 2, vec![1, 2, 3]))
        .unwrap();

    let removed = tree.remove_entry(e).unwrap();

    assert_eq!(removed.id, e);
    assert_eq!(removed.group, a);
    assert!(tree.lookup_group(a).unwrap().entries.is_empty());
    assert_eq!(
        tree.remove_entry(e).unwrap_err(),
        TreeError::NotFound(NodeRef::Entry(e))
    );
}

#[test]
fn can_add_entry_follows_root_policy_only_for_root() {
    let mut forbidding = NodeTree::new("Root", DEFAULT_ICON, false);
    let root = forbidding.root_id();
    let child = add_group(&mut forbidding, root, "Child");

    assert!(!forbidding.can_add_entry(root));
    assert!(forbidding.can_add_entry(child));

    let mut allowing = NodeTree::new("Root", DEFAULT_ICON, true);
    let root = allowing.root_id();
    let child = add_group(&mut allowing, root, "Child");
    assert!(allowing.can_add_entry(root));
    assert!(allowing.can_add_entry(child));
}

#[test]
fn insert_entry_respects_root_policy() {
    let mut tree = NodeTree::new("Root", DEFAULT_ICON, false);
    let root = tree.root_id();

    let err = tree
        .insert_entry(root, Entry::new("E", DEFAULT_ICON, Vec::new()))
        .unwrap_err();

    assert_eq!(err, TreeError::InvalidParent(root));
    assert_eq!(tree.entry_count(), 0);
}

#[test]
fn ancestors_lists_parents_up_to_root() {
    let mut tree = NodeTree::new("Root", DEFAULT_ICON, true);
    let root = tree.root_id();
    let a = add_group(&mut tree, root, "A");
    let b = add_group(&mut tree, a, "B");

    assert_eq!(tree.ancestors(b).unwrap(), vec![a, root]);
    assert!(tree.ancestors(root).unwrap().is_empty());
}

#[test]
fn child_listing_keeps_insertion_order() {
    let mut tree = NodeTree::new("Root", DEFAULT_ICON, true);
    let root = tree.root_id();
    let names = ["Mail", "Bank", "Work"];
    for name in names {
        add_group(&mut tree, root, name);
    }
    tree.insert_entry(root, Entry::new("router", DEFAULT_ICON, Vec::new()))
        .unwrap();

    let listed: Vec<_> = tree
        .child_groups(root)
        .unwrap()
        .iter()
        .map(|group| group.name.clone())
        .collect();
    assert_eq!(listed, names);
    assert_eq!(tree.child_entries(root).unwrap()[0].title, "router");
}

#[test]
fn from_parts_rejects_inconsistent_entry_links() {
    let mut tree = NodeTree::new("Root", DEFAULT_ICON, true);
    let root = tree.root_id();
    let a = add_group(&mut tree, root, "A");

    let groups: Vec<Group> = tree.walk_groups().into_iter().cloned().collect();
    let mut stray = Entry::new("stray", DEFAULT_ICON, Vec::new());
    stray.group = a;

    let err = NodeTree::from_parts(root, groups, vec![stray.clone()], HashMap::new()).unwrap_err();
    match err {
        TreeError::Corrupt(violations) => {
            assert!(violations.contains(&TreeViolation::EntryMismatch {
                entry: stray.id,
                group: a
            }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn from_parts_accepts_a_walked_tree() {
    let mut tree = NodeTree::new("Root", DEFAULT_ICON, true);
    let root = tree.root_id();
    let a = add_group(&mut tree, root, "A");
    tree.insert_entry(a, Entry::new("E", DEFAULT_ICON, Vec::new()))
        .unwrap();

    let groups: Vec<Group> = tree.walk_groups().into_iter().cloned().collect();
    let entries: Vec<Entry> = tree
        .child_entries(a)
        .unwrap()
        .into_iter()
        .cloned()
        .collect();

    assert_eq!(NodeTree::from_parts(root, groups, entries, HashMap::new()).unwrap(), tree);
}

#[test]
fn insert_entry_rejects_links_to_missing_attachments() {
    let mut tree = NodeTree::new("Root", DEFAULT_ICON, true);
    let root = tree.root_id();
    let missing = uuid::Uuid::new_v4();
    let mut entry = Entry::new("E", DEFAULT_ICON, Vec::new());
    entry.attachments.push(missing);

    let err = tree.insert_entry(root, entry).unwrap_err();

    assert_eq!(err, TreeError::AttachmentNotFound(missing));
    assert_eq!(tree.entry_count(), 0);
}

#[test]
fn from_parts_reports_dangling_attachment_links() {
    let mut tree = NodeTree::new("Root", DEFAULT_ICON, true);
    let root = tree.root_id();
    let blob = tree.add_attachment(vec![7; 4]);
    let e = tree
        .insert_entry(root, Entry::new("E", DEFAULT_ICON, Vec::new()))
        .unwrap();
    tree.link_attachment(e, blob).unwrap();

    let groups: Vec<Group> = tree.walk_groups().into_iter().cloned().collect();
    let entries: Vec<Entry> = tree
        .child_entries(root)
        .unwrap()
        .into_iter()
        .cloned()
        .collect();

    let err = NodeTree::from_parts(root, groups, entries, HashMap::new()).unwrap_err();
    assert_eq!(
        err,
        TreeError::Corrupt(vec![TreeViolation::DanglingAttachment {
            entry: e,
            attachment: blob
        }])
    );
}
