//! Event batch semantics: linkage, identity, delete reachability, delete
//! collapsing, notifications and failure isolation.

mod common;

use common::{TestVfs, assert_invalid, assert_parent};
use mirrorfs_core::{
    FileId, FileProperty, Notification, RecordingListener, VfsError, VfsEvent, VfsListener,
};
use std::sync::Arc;

fn create(parent: FileId, name: &str, is_directory: bool) -> VfsEvent {
    VfsEvent::Create {
        parent,
        name: name.to_string(),
        is_directory,
    }
}

/// `/proj/dir/{a.txt, sub/{b.txt, deep/c.txt}}`, fully listed.
fn populated() -> (TestVfs, FileId, FileId, Vec<FileId>) {
    let t = TestVfs::new();
    t.mem.add_file("/proj/dir/a.txt", b"a");
    t.mem.add_file("/proj/dir/sub/b.txt", b"b");
    t.mem.add_file("/proj/dir/sub/deep/c.txt", b"c");
    t.mem.add_file("/proj/other.txt", b"o");
    let root = t.root("/proj");
    let dir = t.file("/proj/dir");
    let descendants = vec![
        t.file("/proj/dir/a.txt"),
        t.file("/proj/dir/sub"),
        t.file("/proj/dir/sub/b.txt"),
        t.file("/proj/dir/sub/deep"),
        t.file("/proj/dir/sub/deep/c.txt"),
    ];
    for id in &descendants {
        t.find_file_by_id(*id).unwrap();
    }
    (t, root, dir, descendants)
}

#[test]
fn test_created_child_is_linked_to_parent() {
    let t = TestVfs::new();
    let root = t.root("/proj");
    t.mem.mkdirs("/proj/a/b");
    t.mem.add_file("/proj/a/b/c.txt", b"c");

    t.process_events(vec![create(root, "a", true)]).unwrap();
    let a = t.find_child(root, "a").unwrap().unwrap();
    t.process_events(vec![create(a, "b", true)]).unwrap();
    let b = t.find_child(a, "b").unwrap().unwrap();
    t.process_events(vec![create(b, "c.txt", false)]).unwrap();
    let c = t.find_child(b, "c.txt").unwrap().unwrap();

    assert_parent(&t, a, root);
    assert_parent(&t, b, a);
    assert_parent(&t, c, b);
}

#[test]
fn test_repeated_create_keeps_existing_record() {
    let t = TestVfs::new();
    t.mem.add_file("/proj/a.txt", b"a");
    let root = t.root("/proj");
    let a = t.find_child(root, "a.txt").unwrap().unwrap();
    let report = t
        .process_events(vec![create(root, "a.txt", false)])
        .unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(t.find_child(root, "a.txt").unwrap(), Some(a));
    assert_eq!(t.names(root), vec!["a.txt"]);
}

#[test]
fn test_delete_invalidates_every_descendant() {
    let (t, root, dir, descendants) = populated();
    t.mem.remove("/proj/dir");
    t.process_events(vec![VfsEvent::Delete { file: dir }])
        .unwrap();
    assert_invalid(&t, dir);
    for id in descendants {
        assert_invalid(&t, id);
    }
    assert_eq!(t.names(root), vec!["other.txt"]);
}

#[test]
fn test_rename_preserves_identity() {
    let (t, _, dir, descendants) = populated();
    let a = descendants[0];
    t.process_events(vec![
        VfsEvent::Rename {
            file: a,
            new_name: "renamed.txt".into(),
        },
        VfsEvent::Rename {
            file: dir,
            new_name: "folder".into(),
        },
    ])
    .unwrap();
    assert_eq!(t.name(a).as_deref(), Some("renamed.txt"));
    assert_eq!(t.find_file_by_id(a).unwrap().id, a);
    assert_eq!(&*t.find_file_by_id(dir).unwrap().name, "folder");
    // Descendants keep resolving through the renamed directory.
    assert_eq!(t.path_of(descendants[4]).as_deref(), Some("/proj/folder/sub/deep/c.txt"));
}

#[test]
fn test_redundant_child_delete_is_collapsed() {
    let (with_child, _, dir_a, desc_a) = populated();
    let (alone, _, dir_b, _) = populated();
    assert_eq!(dir_a, dir_b);

    let report = with_child
        .process_events(vec![
            VfsEvent::Delete { file: desc_a[2] },
            VfsEvent::Delete { file: dir_a },
            VfsEvent::Delete { file: desc_a[1] },
        ])
        .unwrap();
    assert_eq!(report.collapsed, 2);
    assert_eq!(report.applied, 1);
    assert!(report.failures.is_empty());

    alone
        .process_events(vec![VfsEvent::Delete { file: dir_b }])
        .unwrap();

    let left = with_child.snapshot();
    let right = alone.snapshot();
    assert_eq!(left.records, right.records);
    assert_eq!(left.roots, right.roots);
    assert_eq!(left.next_file_id, right.next_file_id);
}

#[test]
fn test_listeners_see_before_and_after() {
    let t = TestVfs::new();
    t.mem.add_file("/proj/a.txt", b"a");
    let root = t.root("/proj");
    let a = t.find_child(root, "a.txt").unwrap().unwrap();

    let recorder = Arc::new(RecordingListener::new());
    let sub = t.subscribe(Arc::clone(&recorder) as Arc<dyn VfsListener>);
    let events = vec![
        VfsEvent::Rename {
            file: a,
            new_name: "b.txt".into(),
        },
        VfsEvent::PropertyChange {
            file: a,
            property: FileProperty::Hidden(true),
        },
    ];
    t.process_events(events.clone()).unwrap();
    assert_eq!(
        recorder.take(),
        vec![
            Notification::Before(events.clone()),
            Notification::PropertyChanged(a, FileProperty::Hidden(true)),
            Notification::After(events),
        ]
    );

    assert!(t.unsubscribe(sub));
    t.process_events(vec![VfsEvent::Delete { file: a }]).unwrap();
    assert!(recorder.calls().is_empty());
}

#[test]
fn test_failures_do_not_abort_the_batch() {
    let t = TestVfs::new();
    t.mem.add_file("/proj/a.txt", b"a");
    t.mem.add_file("/proj/b.txt", b"b");
    let root = t.root("/proj");
    let a = t.find_child(root, "a.txt").unwrap().unwrap();
    let b = t.find_child(root, "b.txt").unwrap().unwrap();

    let report = t
        .process_events(vec![
            create(root, "missing.txt", false),
            VfsEvent::Rename {
                file: a,
                new_name: "b.txt".into(),
            },
            VfsEvent::Delete { file: b },
            VfsEvent::Rename {
                file: b,
                new_name: "c.txt".into(),
            },
        ])
        .unwrap();

    assert_eq!(report.applied, 1);
    let failed: Vec<usize> = report.failures.iter().map(|(i, _)| *i).collect();
    assert_eq!(failed, vec![0, 1, 3]);
    assert!(report.failures[0].1.is_delegate());
    assert!(matches!(report.failures[1].1, VfsError::AlreadyExists { .. }));
    assert!(matches!(report.failures[2].1, VfsError::InvalidFile(_)));
    assert!(!t.exists(b));
    assert_eq!(t.name(a).as_deref(), Some("a.txt"));
}

#[test]
fn test_before_phase_sees_old_state() {
    use parking_lot::Mutex;

    struct ParentProbe {
        vfs: Arc<mirrorfs_core::PersistentFs>,
        file: FileId,
        seen: Mutex<Vec<Option<FileId>>>,
    }
    impl VfsListener for ParentProbe {
        fn before(&self, _: &[VfsEvent]) {
            self.seen.lock().push(self.vfs.parent(self.file));
        }
        fn after(&self, _: &[VfsEvent]) {
            self.seen.lock().push(self.vfs.parent(self.file));
        }
    }

    let TestVfs { vfs, mem, .. } = TestVfs::new();
    let vfs = Arc::new(vfs);
    mem.add_file("/proj/a.txt", b"a");
    mem.mkdirs("/proj/dir");
    let root = vfs.find_root("mem", "/proj").unwrap().unwrap();
    let a = vfs.find_child(root, "a.txt").unwrap().unwrap();
    let dir = vfs.find_child(root, "dir").unwrap().unwrap();

    let probe = Arc::new(ParentProbe {
        vfs: Arc::clone(&vfs),
        file: a,
        seen: Mutex::new(Vec::new()),
    });
    vfs.subscribe(Arc::clone(&probe) as Arc<dyn VfsListener>);
    vfs.process_events(vec![VfsEvent::Move {
        file: a,
        new_parent: dir,
    }])
    .unwrap();
    assert_eq!(*probe.seen.lock(), vec![Some(root), Some(dir)]);
}
