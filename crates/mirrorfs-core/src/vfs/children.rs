//! Child listing and reconciliation against the delegate.

use super::PersistentFs;
use crate::delegate::DelegateFs;
use crate::error::{VfsError, VfsResult};
use crate::record::{FileAttributes, FileFlags, FileId, FileRecord};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

/// One child of a directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChildEntry {
    /// Child id.
    pub id: FileId,
    /// Child name. Roots listed under the super-root carry their URL.
    pub name: Arc<str>,
}

/// A child with its full record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildInfo {
    /// Child id.
    pub id: FileId,
    /// Child name.
    pub name: Arc<str>,
    /// Record copy.
    pub record: FileRecord,
}

fn fold(name: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        name.to_string()
    } else {
        name.to_lowercase()
    }
}

impl PersistentFs {
    /// Children of `dir` in stored order.
    ///
    /// Answered from the stored child list when the directory is marked
    /// `CHILDREN_CACHED`. Otherwise the delegate is listed once and the
    /// result reconciled into the store first. Listing
    /// [`FileId::NONE`] gives the registered roots.
    #[instrument(level = "debug", skip(self))]
    pub fn list_children(&self, dir: FileId) -> VfsResult<Vec<ChildEntry>> {
        if dir.is_none() {
            return Ok(self
                .roots()
                .iter()
                .map(|root| ChildEntry {
                    id: root.id,
                    name: Arc::from(root.url.to_string()),
                })
                .collect());
        }
        let ids = self.child_ids(dir)?;
        Ok(ids
            .into_iter()
            .filter_map(|id| {
                let name = self.name(id);
                if name.is_none() {
                    warn!(%dir, child = %id, "stored child list references a missing record");
                }
                Some(ChildEntry { id, name: name? })
            })
            .collect())
    }

    /// Like [`PersistentFs::list_children`], with each child's record.
    pub fn list_all(&self, dir: FileId) -> VfsResult<Vec<ChildInfo>> {
        Ok(self
            .list_children(dir)?
            .into_iter()
            .filter_map(|child| {
                Some(ChildInfo {
                    record: self.store.record(child.id)?,
                    id: child.id,
                    name: child.name,
                })
            })
            .collect())
    }

    pub(super) fn directory_record(&self, dir: FileId) -> VfsResult<FileRecord> {
        let record = self.store.record(dir).ok_or(VfsError::InvalidFile(dir))?;
        if !record.is_directory() {
            return Err(VfsError::NotADirectory(dir));
        }
        Ok(record)
    }

    fn child_ids(&self, dir: FileId) -> VfsResult<Vec<FileId>> {
        let record = self.directory_record(dir)?;
        if record.flags.contains(FileFlags::CHILDREN_CACHED) {
            if let Some(children) = self.cache.get(dir).and_then(|node| node.children()) {
                trace!(%dir, "child cell hit");
                return Ok(children.to_vec());
            }
            let children = self.store.children(dir).unwrap_or_default();
            if let Some(node) = self.cache.get(dir) {
                node.set_children(&children);
            }
            trace!(%dir, "stored child list hit");
            return Ok(children);
        }
        self.reconcile(dir)
    }

    /// Brings the stored child list of `dir` in line with the delegate's
    /// listing and marks it `CHILDREN_CACHED`.
    fn reconcile(&self, dir: FileId) -> VfsResult<Vec<FileId>> {
        let _reconciling = self.reconcile_lock.lock();
        // Another thread may have finished the same reconciliation.
        let record = self.directory_record(dir)?;
        if record.flags.contains(FileFlags::CHILDREN_CACHED) {
            return Ok(self.store.children(dir).unwrap_or_default());
        }

        let (fs, path) = self.delegate_path(dir)?;
        let listed = fs.list(&path).map_err(|e| VfsError::delegate(&path, e))?;
        let case_sensitive = fs.is_case_sensitive();

        let mut known: HashMap<String, FileId> = HashMap::new();
        for child in self.store.children(dir).unwrap_or_default() {
            match self.name(child) {
                Some(name) => {
                    known.insert(fold(&name, case_sensitive), child);
                }
                None => warn!(%dir, %child, "dropping dangling child id"),
            }
        }

        let mut slots: Vec<Option<FileId>> = Vec::with_capacity(listed.len());
        let mut unmatched = Vec::new();
        let mut kept = HashSet::new();
        for (index, name) in listed.iter().enumerate() {
            match known.get(&fold(name, case_sensitive)) {
                Some(id) if kept.insert(*id) => slots.push(Some(*id)),
                Some(_) => slots.push(None),
                None => {
                    slots.push(None);
                    unmatched.push(index);
                }
            }
        }

        let probes: Vec<(usize, Option<FileAttributes>)> = unmatched
            .par_iter()
            .map(|&index| {
                let child_path = fs.join(&path, &listed[index]);
                match fs.attributes(&child_path) {
                    Ok(attrs) => (index, attrs),
                    Err(e) => {
                        warn!(path = %child_path, error = %e, "probe failed, skipping child");
                        (index, None)
                    }
                }
            })
            .collect();

        let mut created = 0usize;
        for (index, attrs) in probes {
            let Some(attrs) = attrs else {
                trace!(name = %listed[index], "delegate no longer confirms child");
                continue;
            };
            let id = self
                .store
                .allocate(dir, self.names.intern(&listed[index]), &attrs);
            slots[index] = Some(id);
            created += 1;
        }

        let children: Vec<FileId> = slots.into_iter().flatten().collect();
        let retained: HashSet<FileId> = children.iter().copied().collect();
        let mut removed = 0usize;
        for child in self.store.children(dir).unwrap_or_default() {
            if !retained.contains(&child) {
                self.free_subtree(child);
                removed += 1;
            }
        }

        self.store.set_children(dir, children.clone());
        self.store.set_flags(dir, FileFlags::CHILDREN_CACHED, true);
        self.store.set_flags(dir, FileFlags::DIRTY, false);
        if let Some(node) = self.cache.get(dir) {
            node.set_children(&children);
            if let Some(flags) = self.store.flags(dir) {
                node.set_flags(flags);
            }
        }
        debug!(
            %dir,
            kept = kept.len(),
            created,
            removed,
            "reconciled children"
        );
        Ok(children)
    }

    /// Looks up one child by name.
    ///
    /// A cached directory answers from its stored list. Otherwise a known
    /// child is returned directly, and an unknown one is probed on the
    /// delegate and linked if it exists, without marking the directory
    /// cached.
    pub fn find_child(&self, dir: FileId, name: &str) -> VfsResult<Option<FileId>> {
        let record = self.directory_record(dir)?;
        let fs = self
            .file_system_of(dir)
            .ok_or_else(|| VfsError::Inconsistent(format!("{dir} has no filesystem")))?;
        if let Some(id) = self.child_named(dir, name, fs.as_ref()) {
            return Ok(Some(id));
        }
        if record.flags.contains(FileFlags::CHILDREN_CACHED) {
            return Ok(None);
        }

        let _reconciling = self.reconcile_lock.lock();
        if let Some(id) = self.child_named(dir, name, fs.as_ref()) {
            return Ok(Some(id));
        }
        let (fs, path) = self.delegate_path(dir)?;
        let child_path = fs.join(&path, name);
        let Some(attrs) = fs
            .attributes(&child_path)
            .map_err(|e| VfsError::delegate(&child_path, e))?
        else {
            return Ok(None);
        };
        let id = self.store.allocate(dir, self.names.intern(name), &attrs);
        self.cache.invalidate_children(dir);
        trace!(%dir, %id, name, "linked probed child");
        Ok(Some(id))
    }

    /// Stored child of `dir` called `name`, under the delegate's case rule.
    pub(super) fn child_named(&self, dir: FileId, name: &str, fs: &dyn DelegateFs) -> Option<FileId> {
        let case_sensitive = fs.is_case_sensitive();
        let wanted = fold(name, case_sensitive);
        self.store
            .children(dir)?
            .into_iter()
            .find(|child| {
                self.name(*child)
                    .is_some_and(|n| fold(&n, case_sensitive) == wanted)
            })
    }
}
