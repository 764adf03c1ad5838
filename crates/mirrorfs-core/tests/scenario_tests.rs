//! End-to-end walk through a project tree: create, list, move, delete.

mod common;

use common::{TestVfs, assert_invalid, assert_parent};
use mirrorfs_core::{DelegateFs, FileFlags, VfsEvent};

const T: i64 = 1_700_000_123_000;

#[test]
fn test_project_scenario_through_events() {
    let t = TestVfs::new();
    let root = t.root("/proj");

    // Directory appears on the delegate, then is announced.
    t.mem.mkdirs("/proj/src");
    let report = t
        .process_events(vec![VfsEvent::Create {
            parent: root,
            name: "src".into(),
            is_directory: true,
        }])
        .unwrap();
    assert!(report.is_clean());
    let src = t.find_child(root, "src").unwrap().unwrap();
    assert!(t.is_directory(src));
    assert_parent(&t, src, root);

    t.mem.add_file("/proj/src/A.java", &[b'x'; 120]);
    t.mem.set_timestamp("/proj/src/A.java", T);
    t.process_events(vec![VfsEvent::Create {
        parent: src,
        name: "A.java".into(),
        is_directory: false,
    }])
    .unwrap();
    let a = t.find_child(src, "A.java").unwrap().unwrap();
    assert_eq!(t.length(a), Some(120));
    assert_eq!(t.timestamp(a), Some(T));

    assert_eq!(t.names(src), vec!["A.java"]);
    assert_eq!(t.list_children(src).unwrap()[0].id, a);

    t.mem.move_to("/proj/src/A.java", "/proj").unwrap();
    t.process_events(vec![VfsEvent::Move {
        file: a,
        new_parent: root,
    }])
    .unwrap();
    assert_parent(&t, a, root);
    assert!(t.names(src).is_empty());

    t.process_events(vec![VfsEvent::Delete { file: root }])
        .unwrap();
    assert_invalid(&t, src);
    assert_invalid(&t, a);
    assert_invalid(&t, root);
}

#[test]
fn test_project_scenario_through_operations() {
    let t = TestVfs::new();
    let root = t.root("/proj");

    let src = t.create_child_directory(root, "src").unwrap();
    let a = t.create_child_file(src, "A.java").unwrap();
    let mut writer = t.open_writer(a).unwrap();
    writer.write(0, &[b'x'; 120]);
    t.commit(writer).unwrap();
    assert_eq!(t.length(a), Some(120));
    assert_eq!(t.names(src), vec!["A.java"]);

    t.move_file(a, root).unwrap();
    assert_parent(&t, a, root);
    assert_eq!(t.path_of(a).as_deref(), Some("/proj/A.java"));
    assert!(t.mem.attributes("/proj/src/A.java").unwrap().is_none());
    assert_eq!(t.mem.read("/proj/A.java").unwrap().len(), 120);

    t.delete_file(root).unwrap();
    assert_invalid(&t, src);
    assert_invalid(&t, a);
}

#[test]
fn test_children_cached_flag_after_listing() {
    let t = TestVfs::new();
    t.mem.add_file("/proj/a.txt", b"a");
    let root = t.root("/proj");
    assert!(!t.record(root).unwrap().flags.contains(FileFlags::CHILDREN_CACHED));
    t.names(root);
    assert!(t.record(root).unwrap().flags.contains(FileFlags::CHILDREN_CACHED));
}

#[test]
fn test_low_memory_and_reset_keep_records() {
    let t = TestVfs::new();
    t.mem.add_file("/proj/src/A.java", b"class A {}");
    let a = t.file("/proj/src/A.java");
    t.read_content(a).unwrap();
    t.find_file_by_id(a).unwrap();

    t.on_low_memory();
    assert_eq!(t.stats().cached_nodes, 0);
    assert_eq!(t.stats().content.blobs, 1);

    t.reset_derived_state();
    assert_eq!(t.stats().registered_roots, 0);
    assert_eq!(t.find_file_by_id(a).unwrap().id, a);
    assert_eq!(t.path_of(a).as_deref(), Some("/proj/src/A.java"));
    assert_eq!(t.roots().len(), 1);
}
