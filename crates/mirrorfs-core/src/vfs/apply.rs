//! Event batch application.

use super::PersistentFs;
use crate::error::{VfsError, VfsResult};
use crate::events::{BatchReport, FileProperty, VfsEvent, collapse_redundant_deletes};
use crate::record::{FileAttributes, FileFlags, FileId, FileRecord};
use std::io;
use tracing::{debug, instrument, trace, warn};

/// Names a record can carry: non-empty, no separator, not a dot entry.
pub(super) fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != ".."
}

impl PersistentFs {
    /// Applies a batch of structural events.
    ///
    /// Invalid events are dropped, deletes covered by a shallower delete
    /// in the same batch are collapsed, and the rest is applied in
    /// submission order between the `before` and `after` notifications.
    /// A failing event is logged and reported without stopping the batch.
    #[instrument(level = "debug", skip_all, fields(events = events.len()))]
    pub fn process_events(&self, events: Vec<VfsEvent>) -> VfsResult<BatchReport> {
        self.require_permit()?;
        let mut report = BatchReport::default();

        let mut indices = Vec::with_capacity(events.len());
        let mut valid = Vec::with_capacity(events.len());
        for (index, event) in events.into_iter().enumerate() {
            match self.validate(&event) {
                Ok(()) => {
                    indices.push(index);
                    valid.push(event);
                }
                Err(reason) => {
                    debug!(index, kind = event.kind(), %reason, "dropping invalid event");
                    report.dropped_invalid += 1;
                }
            }
        }

        let keep = collapse_redundant_deletes(
            &valid,
            |id| self.store.depth(id),
            |ancestor, id| self.store.is_ancestor(ancestor, id),
        );
        let mut batch = Vec::with_capacity(valid.len());
        let mut positions = Vec::with_capacity(valid.len());
        for ((index, event), keep) in indices.into_iter().zip(valid).zip(keep) {
            if keep {
                positions.push(index);
                batch.push(event);
            } else {
                trace!(index, "collapsed redundant delete");
                report.collapsed += 1;
            }
        }
        if batch.is_empty() {
            return Ok(report);
        }

        self.bus.before(&batch);
        let mut property_changes = Vec::new();
        {
            let _structure = self.reconcile_lock.lock();
            for (index, event) in positions.into_iter().zip(&batch) {
                match self.apply_event(event) {
                    Ok(()) => {
                        report.applied += 1;
                        if let VfsEvent::PropertyChange { file, property } = event {
                            property_changes.push((*file, *property));
                        }
                    }
                    Err(e) => {
                        warn!(index, kind = event.kind(), target = %event.target(), error = %e, "event failed");
                        report.failures.push((index, e));
                    }
                }
            }
        }
        for (file, property) in &property_changes {
            self.bus.property_changed(*file, property);
        }
        self.bus.after(&batch);

        debug!(
            applied = report.applied,
            dropped = report.dropped_invalid,
            collapsed = report.collapsed,
            failed = report.failures.len(),
            "processed event batch"
        );
        Ok(report)
    }

    fn validate(&self, event: &VfsEvent) -> Result<(), String> {
        let target = event.target();
        if !self.store.is_valid(target) {
            return Err(format!("{target} is not a live record"));
        }
        let destination = |dir: FileId| {
            if self.is_directory(dir) {
                Ok(())
            } else {
                Err(format!("{dir} is not a live directory"))
            }
        };
        let name = |name: &str| {
            if is_valid_name(name) {
                Ok(())
            } else {
                Err(format!("invalid name {name:?}"))
            }
        };
        match event {
            VfsEvent::Create { parent, name: n, .. } => {
                destination(*parent)?;
                name(n)
            }
            VfsEvent::Copy {
                new_parent,
                new_name,
                ..
            } => {
                destination(*new_parent)?;
                name(new_name)
            }
            VfsEvent::Move { file, new_parent } => {
                destination(*new_parent)?;
                if self.store.parent(*file).is_none_or(|p| p.is_none()) {
                    return Err(format!("{file} is a root"));
                }
                if self.store.is_ancestor(*file, *new_parent) {
                    return Err(format!("{new_parent} is inside {file}"));
                }
                Ok(())
            }
            VfsEvent::Rename { file, new_name } => {
                if self.store.parent(*file).is_none_or(|p| p.is_none()) {
                    return Err(format!("{file} is a root"));
                }
                name(new_name)
            }
            VfsEvent::Delete { .. }
            | VfsEvent::ContentChange { .. }
            | VfsEvent::PropertyChange { .. } => Ok(()),
        }
    }

    fn apply_event(&self, event: &VfsEvent) -> VfsResult<()> {
        // Earlier events of the batch may have removed the target.
        let target = event.target();
        if !self.store.is_valid(target) {
            return Err(VfsError::InvalidFile(target));
        }
        match event {
            VfsEvent::Create { parent, name, .. } => self.link_probed(*parent, name).map(|_| ()),
            VfsEvent::Copy {
                new_parent,
                new_name,
                ..
            } => self.link_probed(*new_parent, new_name).map(|_| ()),
            VfsEvent::Delete { file } => {
                self.free_subtree(*file);
                Ok(())
            }
            VfsEvent::Move { file, new_parent } => self.apply_move(*file, *new_parent),
            VfsEvent::Rename { file, new_name } => self.apply_rename(*file, new_name),
            VfsEvent::ContentChange {
                file,
                reload_from_delegate,
            } => {
                let attrs = self.probe(*file)?;
                self.store.set_length(*file, attrs.record_length());
                self.store.set_timestamp(*file, attrs.last_modified);
                if *reload_from_delegate {
                    self.store
                        .set_flags(*file, FileFlags::MUST_RELOAD_CONTENT, true);
                }
                Ok(())
            }
            VfsEvent::PropertyChange { file, property } => {
                match property {
                    FileProperty::Writable(writable) => {
                        self.store.set_flags(*file, FileFlags::READ_ONLY, !writable)
                    }
                    FileProperty::Hidden(hidden) => {
                        self.store.set_flags(*file, FileFlags::HIDDEN, *hidden)
                    }
                };
                if let Some(flags) = self.store.flags(*file) {
                    self.cache.update_flags(*file, flags);
                }
                Ok(())
            }
        }
    }

    fn probe(&self, id: FileId) -> VfsResult<FileAttributes> {
        let (fs, path) = self.delegate_path(id)?;
        fs.attributes(&path)
            .map_err(|e| VfsError::delegate(&path, e))?
            .ok_or_else(|| VfsError::delegate(&path, io::Error::from(io::ErrorKind::NotFound)))
    }

    /// Links `parent/name` from a fresh delegate probe. A child already
    /// linked under that name is kept as is.
    fn link_probed(&self, parent: FileId, name: &str) -> VfsResult<FileId> {
        let (fs, path) = self.delegate_path(parent)?;
        if let Some(existing) = self.child_named(parent, name, fs.as_ref()) {
            trace!(%parent, %existing, name, "child already linked");
            return Ok(existing);
        }
        let child_path = fs.join(&path, name);
        let attrs = fs
            .attributes(&child_path)
            .map_err(|e| VfsError::delegate(&child_path, e))?
            .ok_or_else(|| {
                VfsError::delegate(&child_path, io::Error::from(io::ErrorKind::NotFound))
            })?;
        let id = self.store.allocate(parent, self.names.intern(name), &attrs);
        self.cache.invalidate_children(parent);
        trace!(%parent, %id, name, "linked child");
        Ok(id)
    }

    fn ensure_free_name(&self, dir: FileId, name: &str, file: FileId) -> VfsResult<()> {
        let fs = self
            .file_system_of(dir)
            .ok_or_else(|| VfsError::Inconsistent(format!("{dir} has no filesystem")))?;
        match self.child_named(dir, name, fs.as_ref()) {
            Some(other) if other != file => Err(VfsError::AlreadyExists {
                parent: dir,
                name: name.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn apply_move(&self, file: FileId, new_parent: FileId) -> VfsResult<()> {
        let name = self.name(file).ok_or(VfsError::InvalidFile(file))?;
        self.ensure_free_name(new_parent, &name, file)?;
        let old_parent = self.store.parent(file).unwrap_or(FileId::NONE);
        if !self.store.move_child(file, new_parent) {
            return Err(VfsError::InvalidFile(new_parent));
        }
        self.cache.evict(file);
        self.cache.invalidate_children(old_parent);
        self.cache.invalidate_children(new_parent);
        Ok(())
    }

    fn apply_rename(&self, file: FileId, new_name: &str) -> VfsResult<()> {
        let parent = self.store.parent(file).unwrap_or(FileId::NONE);
        self.ensure_free_name(parent, new_name, file)?;
        self.store.set_name(file, self.names.intern(new_name));
        self.cache.evict(file);
        Ok(())
    }

    /// Frees `id` with its subtree: records, content references, cache
    /// nodes and root registrations.
    pub(super) fn free_subtree(&self, id: FileId) -> Vec<FileRecord> {
        let parent = self.store.parent(id);
        let freed = self.store.delete_subtree(id);
        for record in &freed {
            if let Err(e) = self.content.release(record.content_id) {
                warn!(id = %record.id, content = %record.content_id, error = %e, "failed to release content");
            }
            if record.is_root() {
                self.roots.unregister(record.id);
            }
        }
        let evicted = self.cache.evict_subtree(freed.iter().map(|r| r.id));
        if let Some(parent) = parent {
            self.cache.invalidate_children(parent);
        }
        trace!(%id, freed = freed.len(), evicted, "freed subtree");
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::open_mem;
    use super::*;
    use crate::notify::{Notification, RecordingListener, VfsListener};
    use std::sync::Arc;

    #[test]
    fn test_name_validation() {
        assert!(is_valid_name("a.txt"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("a/b"));
        assert!(!is_valid_name(".."));
    }

    #[test]
    fn test_create_links_probed_child() {
        let (vfs, mem, _) = open_mem();
        mem.mkdirs("/proj");
        let root = vfs.find_root("mem", "/proj").unwrap().unwrap();
        mem.add_file("/proj/new.txt", b"12345");

        let report = vfs
            .process_events(vec![VfsEvent::Create {
                parent: root,
                name: "new.txt".into(),
                is_directory: false,
            }])
            .unwrap();
        assert!(report.is_clean());
        let child = vfs.child_named(root, "new.txt", mem.as_ref()).unwrap();
        assert_eq!(vfs.parent(child), Some(root));
        assert_eq!(vfs.length(child), Some(5));
    }

    #[test]
    fn test_create_of_missing_entry_fails_alone() {
        let (vfs, mem, _) = open_mem();
        mem.add_file("/proj/a.txt", b"a");
        let root = vfs.find_root("mem", "/proj").unwrap().unwrap();
        let a = vfs.find_child(root, "a.txt").unwrap().unwrap();

        let report = vfs
            .process_events(vec![
                VfsEvent::Create {
                    parent: root,
                    name: "ghost".into(),
                    is_directory: false,
                },
                VfsEvent::Rename {
                    file: a,
                    new_name: "b.txt".into(),
                },
            ])
            .unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, 0);
        assert!(report.failures[0].1.is_delegate());
        assert_eq!(vfs.name(a).as_deref(), Some("b.txt"));
    }

    #[test]
    fn test_invalid_events_are_dropped() {
        let (vfs, mem, _) = open_mem();
        mem.add_file("/proj/dir/a.txt", b"a");
        let root = vfs.find_root("mem", "/proj").unwrap().unwrap();
        let dir = vfs.find_child(root, "dir").unwrap().unwrap();
        let a = vfs.find_child(dir, "a.txt").unwrap().unwrap();

        let report = vfs
            .process_events(vec![
                VfsEvent::Delete {
                    file: FileId::from_raw(999),
                },
                VfsEvent::Move {
                    file: dir,
                    new_parent: a,
                },
                VfsEvent::Move {
                    file: root,
                    new_parent: dir,
                },
                VfsEvent::Rename {
                    file: a,
                    new_name: "x/y".into(),
                },
            ])
            .unwrap();
        assert_eq!(report.dropped_invalid, 4);
        assert_eq!(report.applied, 0);
        assert_eq!(vfs.parent(dir), Some(root));
    }

    #[test]
    fn test_move_into_own_subtree_is_dropped() {
        let (vfs, mem, _) = open_mem();
        mem.mkdirs("/proj/a/b");
        let root = vfs.find_root("mem", "/proj").unwrap().unwrap();
        let a = vfs.find_child(root, "a").unwrap().unwrap();
        let b = vfs.find_child(a, "b").unwrap().unwrap();
        let report = vfs
            .process_events(vec![VfsEvent::Move {
                file: a,
                new_parent: b,
            }])
            .unwrap();
        assert_eq!(report.dropped_invalid, 1);
        assert_eq!(vfs.parent(a), Some(root));
    }

    #[test]
    fn test_rename_conflict_is_reported() {
        let (vfs, mem, _) = open_mem();
        mem.add_file("/proj/a.txt", b"a");
        mem.add_file("/proj/b.txt", b"b");
        let root = vfs.find_root("mem", "/proj").unwrap().unwrap();
        vfs.list_children(root).unwrap();
        let a = vfs.find_child(root, "a.txt").unwrap().unwrap();

        let report = vfs
            .process_events(vec![VfsEvent::Rename {
                file: a,
                new_name: "b.txt".into(),
            }])
            .unwrap();
        assert!(matches!(
            report.failures.as_slice(),
            [(0, VfsError::AlreadyExists { .. })]
        ));
        assert_eq!(vfs.name(a).as_deref(), Some("a.txt"));
    }

    #[test]
    fn test_property_change_notifies() {
        let (vfs, mem, _) = open_mem();
        mem.add_file("/proj/a.txt", b"a");
        let a = vfs.find_file_by_path("mem:///proj/a.txt").unwrap().unwrap();
        let recorder = Arc::new(RecordingListener::new());
        vfs.subscribe(Arc::clone(&recorder) as Arc<dyn VfsListener>);

        let event = VfsEvent::PropertyChange {
            file: a,
            property: FileProperty::Writable(false),
        };
        vfs.process_events(vec![event.clone()]).unwrap();
        assert!(!vfs.is_writable(a));
        assert_eq!(
            recorder.take(),
            vec![
                Notification::Before(vec![event.clone()]),
                Notification::PropertyChanged(a, FileProperty::Writable(false)),
                Notification::After(vec![event]),
            ]
        );
    }

    #[test]
    fn test_property_notice_follows_the_whole_batch() {
        struct NameAtNotice {
            vfs: Arc<PersistentFs>,
            seen: parking_lot::Mutex<Vec<Option<Arc<str>>>>,
        }
        impl VfsListener for NameAtNotice {
            fn before(&self, _: &[VfsEvent]) {}
            fn after(&self, _: &[VfsEvent]) {}
            fn property_changed(&self, file: FileId, _: &FileProperty) {
                self.seen.lock().push(self.vfs.name(file));
            }
        }

        let (vfs, mem, _) = open_mem();
        let vfs = Arc::new(vfs);
        mem.add_file("/proj/a.txt", b"a");
        let a = vfs.find_file_by_path("mem:///proj/a.txt").unwrap().unwrap();
        let listener = Arc::new(NameAtNotice {
            vfs: Arc::clone(&vfs),
            seen: parking_lot::Mutex::new(Vec::new()),
        });
        vfs.subscribe(Arc::clone(&listener) as Arc<dyn VfsListener>);

        vfs.process_events(vec![
            VfsEvent::PropertyChange {
                file: a,
                property: FileProperty::Hidden(true),
            },
            VfsEvent::Rename {
                file: a,
                new_name: "b.txt".into(),
            },
        ])
        .unwrap();
        assert_eq!(*listener.seen.lock(), vec![Some(Arc::<str>::from("b.txt"))]);
    }

    #[test]
    fn test_content_change_marks_reload() {
        let (vfs, mem, _) = open_mem();
        mem.add_file("/proj/a.txt", b"a");
        let a = vfs.find_file_by_path("mem:///proj/a.txt").unwrap().unwrap();
        vfs.read_content(a).unwrap();
        mem.add_file("/proj/a.txt", b"abc");
        mem.set_timestamp("/proj/a.txt", 42);

        vfs.process_events(vec![VfsEvent::ContentChange {
            file: a,
            reload_from_delegate: true,
        }])
        .unwrap();
        let record = vfs.record(a).unwrap();
        assert_eq!(record.length, 3);
        assert_eq!(record.timestamp, 42);
        assert!(record.flags.contains(FileFlags::MUST_RELOAD_CONTENT));
        assert_eq!(&*vfs.read_content(a).unwrap(), b"abc");
    }

    #[test]
    fn test_deleting_root_unregisters_it() {
        let (vfs, mem, _) = open_mem();
        mem.mkdirs("/proj/sub");
        let root = vfs.find_root("mem", "/proj").unwrap().unwrap();
        let sub = vfs.find_child(root, "sub").unwrap().unwrap();
        vfs.process_events(vec![VfsEvent::Delete { file: root }])
            .unwrap();
        assert!(!vfs.exists(root));
        assert!(!vfs.exists(sub));
        assert!(vfs.roots().is_empty());
        assert!(vfs.store.root_urls().is_empty());
    }
}
