//! Property tests over generated trees and URLs.

mod common;

use common::TestVfs;
use mirrorfs_core::{FileId, RootUrl, VfsEvent};
use proptest::prelude::*;

fn relative_paths() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop::collection::vec("[a-e]{1,2}", 1..4).prop_map(|segments| segments.join("/")),
        1..12,
    )
}

/// Builds `/proj/<path>` files. A path that collides with an earlier one
/// is skipped.
fn build(paths: &[String]) -> (TestVfs, FileId) {
    let t = TestVfs::new();
    for path in paths {
        let full = format!("/proj/{path}");
        if !is_occupied(&t, &full) {
            t.mem.add_file(&full, path.as_bytes());
        }
    }
    let root = t.root("/proj");
    (t, root)
}

fn is_occupied(t: &TestVfs, path: &str) -> bool {
    use mirrorfs_core::DelegateFs;
    if matches!(t.mem.attributes(path), Ok(Some(_))) {
        return true;
    }
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        if let Ok(Some(attrs)) = t.mem.attributes(&current)
            && !attrs.is_directory
        {
            return true;
        }
    }
    false
}

fn walk(t: &TestVfs, dir: FileId, out: &mut Vec<(FileId, FileId, String)>) {
    for child in t.list_children(dir).unwrap() {
        out.push((child.id, dir, child.name.to_string()));
        if t.is_directory(child.id) {
            walk(t, child.id, out);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_root_url_normalization_is_idempotent(
        protocol in "(file|mem|zip)",
        path in "[a-zA-Z0-9._!/\\\\-]{0,48}",
        case_sensitive in any::<bool>(),
    ) {
        let once = RootUrl::new(&protocol, &path, case_sensitive);
        let twice = RootUrl::new(&protocol, once.path(), case_sensitive);
        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(once.to_string(), twice.to_string());
    }

    #[test]
    fn prop_listing_twice_is_identical(paths in relative_paths()) {
        let (t, root) = build(&paths);
        let mut first = Vec::new();
        walk(&t, root, &mut first);
        let mut second = Vec::new();
        walk(&t, root, &mut second);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_every_listed_child_points_at_its_parent(paths in relative_paths()) {
        let (t, root) = build(&paths);
        let mut all = Vec::new();
        walk(&t, root, &mut all);
        for (id, parent, name) in all {
            prop_assert_eq!(t.parent(id), Some(parent));
            let got = t.name(id);
            prop_assert_eq!(got.as_deref(), Some(name.as_str()));
        }
    }

    #[test]
    fn prop_delete_invalidates_the_subtree(paths in relative_paths(), pick in any::<prop::sample::Index>()) {
        let (t, root) = build(&paths);
        let mut all = Vec::new();
        walk(&t, root, &mut all);
        let (victim, _, _) = all[pick.index(all.len())].clone();
        let doomed: Vec<FileId> = all
            .iter()
            .map(|(id, _, _)| *id)
            .filter(|id| {
                let mut current = Some(*id);
                while let Some(c) = current {
                    if c == victim {
                        return true;
                    }
                    current = t.parent(c);
                }
                false
            })
            .collect();

        t.process_events(vec![VfsEvent::Delete { file: victim }]).unwrap();
        for id in doomed {
            prop_assert!(!t.exists(id));
            prop_assert!(t.find_file_by_id(id).is_none());
        }
    }

    #[test]
    fn prop_rename_keeps_the_id(paths in relative_paths(), pick in any::<prop::sample::Index>()) {
        let (t, root) = build(&paths);
        let mut all = Vec::new();
        walk(&t, root, &mut all);
        let (id, parent, _) = all[pick.index(all.len())].clone();

        let report = t
            .process_events(vec![VfsEvent::Rename { file: id, new_name: "zz-renamed".into() }])
            .unwrap();
        prop_assert_eq!(report.applied, 1);
        prop_assert_eq!(t.find_child(parent, "zz-renamed").unwrap(), Some(id));
        prop_assert_eq!(t.find_file_by_id(id).map(|f| f.id), Some(id));
    }
}
