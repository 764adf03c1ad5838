//! Custom assertions for mirrorfs integration tests.

use mirrorfs_core::{FileId, PersistentFs};

/// Assert that `id` no longer resolves.
pub fn assert_invalid(vfs: &PersistentFs, id: FileId) {
    assert!(!vfs.exists(id), "{id} should be invalid");
    assert!(
        vfs.find_file_by_id(id).is_none(),
        "{id} should not resolve"
    );
}

/// Assert that `id` resolves and has `parent` as parent.
pub fn assert_parent(vfs: &PersistentFs, id: FileId, parent: FileId) {
    let file = vfs
        .find_file_by_id(id)
        .unwrap_or_else(|| panic!("{id} should resolve"));
    assert_eq!(file.parent_id, parent, "wrong parent for {id}");
    assert_eq!(vfs.parent(id), Some(parent));
}
