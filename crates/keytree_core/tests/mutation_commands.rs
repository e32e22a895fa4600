use keytree_core::{
    AttachmentId, Entry, Group, GroupId, MutationCommand, MutationError, MutationOutcome, NodeRef,
    NodeTree, PersistError, PersistResult, PersistenceGateway, StoreHandle, DEFAULT_ICON,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Gateway that counts saves and optionally fails them.
struct CountingGateway {
    saves: Arc<AtomicUsize>,
    fail: bool,
}

impl PersistenceGateway for CountingGateway {
    fn save(&mut self, _tree: &NodeTree) -> PersistResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PersistError::Backend("disk full".to_string()));
        }
        Ok(())
    }
}

struct Fixture {
    store: StoreHandle,
    saves: Arc<AtomicUsize>,
    root: GroupId,
    a: GroupId,
    b: GroupId,
    e: keytree_core::EntryId,
    scan: AttachmentId,
}

/// Root -> A -> B -> entry E, plus a sibling group. E links one blob.
fn fixture(read_only: bool, fail: bool) -> Fixture {
    let mut tree = NodeTree::new("Root", DEFAULT_ICON, true);
    let root = tree.root_id();
    let a = tree
        .insert_group(root, Group::new(tree.mint_group_id(), "A", DEFAULT_ICON))
        .unwrap();
    let b = tree
        .insert_group(a, Group::new(tree.mint_group_id(), "B", DEFAULT_ICON))
        .unwrap();
    tree.insert_group(root, Group::new(tree.mint_group_id(), "Sibling", DEFAULT_ICON))
        .unwrap();
    let e = tree
        .insert_entry(b, Entry::new("E", DEFAULT_ICON, b"secret".to_vec()))
        .unwrap();
    let scan = tree.add_attachment(b"scan.pdf".to_vec());
    tree.link_attachment(e, scan).unwrap();

    let saves = Arc::new(AtomicUsize::new(0));
    let gateway = CountingGateway {
        saves: Arc::clone(&saves),
        fail,
    };
    Fixture {
        store: StoreHandle::open(tree, gateway, read_only),
        saves,
        root,
        a,
        b,
        e,
        scan,
    }
}

#[test]
fn create_group_adds_lookupable_group_and_saves_once() {
    let fx = fixture(false, false);

    let outcome = MutationCommand::create_group(fx.root, "Bills", 3)
        .execute(&fx.store)
        .unwrap();

    let MutationOutcome::GroupCreated(created) = outcome else {
        panic!("expected GroupCreated");
    };
    assert_eq!(created.name, "Bills");
    assert_eq!(created.icon, 3);
    assert_eq!(created.parent, Some(fx.root));
    fx.store.read(|tree| {
        assert_eq!(tree.lookup_group(created.id).unwrap(), &created);
        assert!(tree.root().groups.contains(&created.id));
    });
    assert_eq!(fx.saves.load(Ordering::SeqCst), 1);
}

#[test]
fn delete_group_removes_descendants_and_entries() {
    let fx = fixture(false, false);

    let outcome = MutationCommand::delete_group(fx.a)
        .execute(&fx.store)
        .unwrap();

    let MutationOutcome::GroupDeleted(removed) = outcome else {
        panic!("expected GroupDeleted");
    };
    assert_eq!(removed.group_ids(), vec![fx.a, fx.b]);
    fx.store.read(|tree| {
        assert!(!tree.contains_group(fx.a));
        assert!(!tree.contains_group(fx.b));
        assert!(!tree.contains_entry(fx.e));
        assert!(tree.invariant_violations().is_empty());
    });
    assert_eq!(fx.saves.load(Ordering::SeqCst), 1);
}

#[test]
fn delete_entry_twice_reports_not_found_without_second_save() {
    let fx = fixture(false, false);

    let first = MutationCommand::delete_entry(fx.e).execute(&fx.store);
    assert!(matches!(first, Ok(MutationOutcome::EntryDeleted(ref entry)) if entry.id == fx.e));

    let second = MutationCommand::delete_entry(fx.e)
        .execute(&fx.store)
        .unwrap_err();
    assert!(matches!(second, MutationError::NotFound(NodeRef::Entry(id)) if id == fx.e));
    assert!(second.is_rejection());
    assert_eq!(fx.saves.load(Ordering::SeqCst), 1);
}

#[test]
fn deleting_root_is_rejected_and_tree_is_unchanged() {
    let fx = fixture(false, false);
    let before = fx.store.snapshot();

    for _ in 0..2 {
        let err = MutationCommand::delete_group(fx.root)
            .execute(&fx.store)
            .unwrap_err();
        assert!(matches!(err, MutationError::CannotRemoveRoot));
    }

    assert_eq!(fx.store.snapshot(), before);
    assert_eq!(fx.saves.load(Ordering::SeqCst), 0);
}

#[test]
fn read_only_store_rejects_every_command_without_changes() {
    let fx = fixture(true, false);
    let before = fx.store.snapshot();

    let commands = [
        MutationCommand::create_group(fx.root, "Bills", DEFAULT_ICON),
        MutationCommand::delete_group(fx.a),
        MutationCommand::delete_entry(fx.e),
        MutationCommand::remove_unlinked_data(),
    ];
    for command in commands {
        let err = command.execute(&fx.store).unwrap_err();
        assert!(matches!(err, MutationError::ReadOnlyViolation));
        assert_eq!(err.code(), "read_only");
    }

    assert_eq!(fx.store.snapshot(), before);
    assert_eq!(fx.saves.load(Ordering::SeqCst), 0);
}

#[test]
fn invalid_parent_and_blank_name_are_rejected_before_saving() {
    let fx = fixture(false, false);
    let before = fx.store.snapshot();
    let stranger = uuid::Uuid::new_v4();

    let err = MutationCommand::create_group(stranger, "Bills", DEFAULT_ICON)
        .execute(&fx.store)
        .unwrap_err();
    assert!(matches!(err, MutationError::InvalidParent(id) if id == stranger));

    let err = MutationCommand::create_group(fx.root, " \t ", DEFAULT_ICON)
        .execute(&fx.store)
        .unwrap_err();
    assert!(matches!(err, MutationError::InvalidDisplayName));

    assert_eq!(fx.store.snapshot(), before);
    assert_eq!(fx.saves.load(Ordering::SeqCst), 0);
}

#[test]
fn failed_save_keeps_in_memory_change_and_reports_persist_error() {
    let fx = fixture(false, true);

    let err = MutationCommand::create_group(fx.root, "Bills", DEFAULT_ICON)
        .execute(&fx.store)
        .unwrap_err();

    assert!(err.may_not_be_saved());
    assert!(!err.is_rejection());
    let MutationError::Persist { applied, source } = err else {
        panic!("expected Persist");
    };
    assert!(matches!(source, PersistError::Backend(ref message) if message == "disk full"));
    let MutationOutcome::GroupCreated(created) = *applied else {
        panic!("expected GroupCreated");
    };
    fx.store.read(|tree| {
        assert_eq!(tree.lookup_group(created.id).unwrap().name, "Bills");
    });
    assert_eq!(fx.saves.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_delete_save_keeps_subtree_removed() {
    let fx = fixture(false, true);

    let err = MutationCommand::delete_group(fx.a)
        .execute(&fx.store)
        .unwrap_err();

    assert!(matches!(err, MutationError::Persist { .. }));
    fx.store.read(|tree| {
        assert!(!tree.contains_group(fx.a));
        assert!(!tree.contains_entry(fx.e));
    });
}

#[test]
fn save_now_retries_through_the_gateway() {
    let fx = fixture(false, false);

    fx.store.save_now().unwrap();

    assert_eq!(fx.saves.load(Ordering::SeqCst), 1);
}

#[test]
fn deleted_entry_leaves_blob_until_unlinked_data_is_removed() {
    let fx = fixture(false, false);

    MutationCommand::delete_entry(fx.e)
        .execute(&fx.store)
        .unwrap();
    fx.store.read(|tree| {
        assert_eq!(tree.attachment(fx.scan).unwrap(), b"scan.pdf");
        assert_eq!(tree.unlinked_attachments(), vec![fx.scan]);
    });

    let outcome = MutationCommand::remove_unlinked_data()
        .execute(&fx.store)
        .unwrap();

    assert_eq!(outcome, MutationOutcome::UnlinkedDataRemoved(vec![fx.scan]));
    assert!(outcome.node().is_none());
    fx.store.read(|tree| {
        assert_eq!(tree.attachment_count(), 0);
        assert!(tree.invariant_violations().is_empty());
    });
    assert_eq!(fx.saves.load(Ordering::SeqCst), 2);
}

#[test]
fn remove_unlinked_data_keeps_linked_blobs_and_still_saves() {
    let fx = fixture(false, false);
    let before = fx.store.snapshot();

    let outcome = MutationCommand::remove_unlinked_data()
        .execute(&fx.store)
        .unwrap();

    assert_eq!(outcome, MutationOutcome::UnlinkedDataRemoved(Vec::new()));
    assert_eq!(fx.store.snapshot(), before);
    assert_eq!(fx.saves.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_save_after_removing_unlinked_data_keeps_blobs_dropped() {
    let fx = fixture(false, true);
    MutationCommand::delete_group(fx.a)
        .execute(&fx.store)
        .unwrap_err();

    let err = MutationCommand::remove_unlinked_data()
        .execute(&fx.store)
        .unwrap_err();

    let MutationError::Persist { applied, .. } = err else {
        panic!("expected Persist");
    };
    assert_eq!(*applied, MutationOutcome::UnlinkedDataRemoved(vec![fx.scan]));
    assert_eq!(fx.store.read(|tree| tree.attachment_count()), 0);
    assert_eq!(fx.saves.load(Ordering::SeqCst), 2);
}
