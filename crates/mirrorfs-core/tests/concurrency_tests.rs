//! Many readers, one writer.
//!
//! Readers need no permit and may race on listing, root creation and
//! content loads. Writers must hold the permit on their own thread.

mod common;

use common::TestVfs;
use mirrorfs_core::{ExclusivePermit, FileId, VfsError, VfsEvent};
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;

fn tree(t: &TestVfs) {
    for d in 0..4 {
        for f in 0..10 {
            t.mem.add_file(&format!("/proj/d{d}/f{f}.txt"), format!("{d}-{f}").as_bytes());
        }
    }
}

#[test]
fn test_concurrent_listing_reconciles_once() {
    let t = TestVfs::new();
    tree(&t);
    let root = t.root("/proj");
    let t = Arc::new(t);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let t = Arc::clone(&t);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut seen = BTreeSet::new();
                for dir in t.list_children(root).unwrap() {
                    seen.insert((dir.id, dir.name.to_string()));
                    for child in t.list_children(dir.id).unwrap() {
                        seen.insert((child.id, child.name.to_string()));
                    }
                }
                seen
            })
        })
        .collect();

    let results: Vec<BTreeSet<(FileId, String)>> =
        handles.into_iter().map(|h| h.join().expect("reader panicked")).collect();
    assert_eq!(results[0].len(), 44);
    for result in &results[1..] {
        assert_eq!(result, &results[0]);
    }
    // One delegate listing per directory: root plus four subdirectories.
    assert_eq!(t.mem.list_count(), 5);
    assert_eq!(t.stats().records.live_records, 45);
}

#[test]
fn test_concurrent_root_creation_yields_one_root() {
    let t = Arc::new(TestVfs::new());
    t.mem.mkdirs("/proj");
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let t = Arc::clone(&t);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                t.find_root("mem", "/proj").unwrap().unwrap()
            })
        })
        .collect();
    let ids: BTreeSet<FileId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(ids.len(), 1);
    assert_eq!(t.roots().len(), 1);
}

#[test]
fn test_concurrent_path_lookups_agree() {
    let t = TestVfs::new();
    tree(&t);
    t.root("/proj");
    let t = Arc::new(t);
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let t = Arc::clone(&t);
            thread::spawn(move || {
                (0..40)
                    .map(|n| {
                        let k = (n + i) % 40;
                        let path = format!("mem:///proj/d{}/f{}.txt", k / 10, k % 10);
                        (k, t.find_file_by_path(&path).unwrap().unwrap())
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut by_key = std::collections::BTreeMap::new();
    for handle in handles {
        for (k, id) in handle.join().unwrap() {
            let first = *by_key.entry(k).or_insert(id);
            assert_eq!(first, id, "path {k} resolved to two ids");
        }
    }
    assert_eq!(by_key.len(), 40);
}

#[test]
fn test_mutations_require_the_permit_on_the_calling_thread() {
    let permit = Arc::new(ExclusivePermit::new());
    let t = TestVfs::with_permit(Arc::clone(&permit) as Arc<dyn mirrorfs_core::WritePermit>);
    t.mem.add_file("/proj/a.txt", b"a");
    let root = t.root("/proj");
    let a = t.find_child(root, "a.txt").unwrap().unwrap();

    // Reads and cache population work without it.
    assert_eq!(&*t.read_content(a).unwrap(), b"a");
    assert!(matches!(
        t.process_events(vec![VfsEvent::Delete { file: a }]),
        Err(VfsError::WritePermitRequired)
    ));
    assert!(matches!(
        t.rename_file(a, "b.txt"),
        Err(VfsError::WritePermitRequired)
    ));

    let guard = permit.acquire();
    let t = Arc::new(t);
    let other = {
        let t = Arc::clone(&t);
        thread::spawn(move || t.set_writable(a, false)).join().unwrap()
    };
    assert!(matches!(other, Err(VfsError::WritePermitRequired)));
    t.rename_file(a, "b.txt").unwrap();
    drop(guard);
    assert_eq!(t.name(a).as_deref(), Some("b.txt"));
}

#[test]
fn test_readers_see_whole_content_during_commits() {
    let t = TestVfs::new();
    t.mem.add_file("/proj/a.txt", b"AAAAAAAA");
    let a = t.file("/proj/a.txt");
    let t = Arc::new(t);

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let t = Arc::clone(&t);
            thread::spawn(move || {
                for _ in 0..200 {
                    let bytes = t.read_content(a).unwrap();
                    assert!(
                        &*bytes == b"AAAAAAAA" || &*bytes == b"BBBBBBBB",
                        "torn read: {bytes:?}"
                    );
                }
            })
        })
        .collect();

    for i in 0..50 {
        let mut writer = t.open_writer(a).unwrap();
        let fill = if i % 2 == 0 { b"BBBBBBBB" } else { b"AAAAAAAA" };
        writer.write(0, fill);
        t.commit(writer).unwrap();
    }
    for reader in readers {
        reader.join().expect("reader panicked");
    }
}
