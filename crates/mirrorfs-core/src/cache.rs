//! Live directory-node cache and id resolution.
//!
//! [`DirectoryEntryCache`] maps record ids to in-memory [`DirectoryNode`]s so
//! that repeated lookups skip the walk through the record store. Nodes hold
//! their parent as an id, never a pointer. The cache is pure derived state:
//! it can be dropped at any time (low memory, reset) and is rebuilt lazily.
//!
//! Population races are settled by the DashMap entry API: the first insert
//! wins and a losing racer's node is dropped.

use crate::names::NameTable;
use crate::record::{FileFlags, FileId, FileRecord};
use crate::store::FileRecordStore;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{trace, warn};

/// In-memory directory object.
#[derive(Debug)]
pub struct DirectoryNode {
    id: FileId,
    parent_id: FileId,
    name: Arc<str>,
    flags: AtomicU32,
    /// Child ids, filled on first listing.
    children: RwLock<Option<Arc<[FileId]>>>,
}

impl DirectoryNode {
    fn from_record(record: &FileRecord, name: Arc<str>) -> Self {
        Self {
            id: record.id,
            parent_id: record.parent_id,
            name,
            flags: AtomicU32::new(record.flags.bits()),
            children: RwLock::new(None),
        }
    }

    /// Record id.
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Parent id, [`FileId::NONE`] for roots.
    pub fn parent_id(&self) -> FileId {
        self.parent_id
    }

    /// Name.
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Mirrored flag bits.
    pub fn flags(&self) -> FileFlags {
        FileFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    /// Overwrites the mirrored flags.
    pub fn set_flags(&self, flags: FileFlags) {
        self.flags.store(flags.bits(), Ordering::Release);
    }

    /// Cached child ids, if filled.
    pub fn children(&self) -> Option<Arc<[FileId]>> {
        self.children.read().clone()
    }

    /// Fills the child-id cell.
    pub fn set_children(&self, children: &[FileId]) {
        *self.children.write() = Some(Arc::from(children));
    }

    /// Empties the child-id cell.
    pub fn clear_children(&self) {
        *self.children.write() = None;
    }

    fn to_virtual_file(&self) -> VirtualFile {
        VirtualFile {
            id: self.id,
            parent_id: self.parent_id,
            name: Arc::clone(&self.name),
            is_directory: true,
        }
    }
}

/// Resolved handle to a live file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFile {
    /// Record id.
    pub id: FileId,
    /// Parent id, [`FileId::NONE`] for roots.
    pub parent_id: FileId,
    /// Name.
    pub name: Arc<str>,
    /// Directory or file.
    pub is_directory: bool,
}

/// Concurrent `FileId` to node map.
#[derive(Debug)]
pub struct DirectoryEntryCache {
    nodes: DashMap<FileId, Arc<DirectoryNode>>,
    max_depth: usize,
}

impl DirectoryEntryCache {
    /// Empty cache that gives up on parent chains longer than `max_depth`.
    pub fn new(max_depth: usize) -> Self {
        Self {
            nodes: DashMap::new(),
            max_depth,
        }
    }

    /// Cached node for `id`.
    pub fn get(&self, id: FileId) -> Option<Arc<DirectoryNode>> {
        self.nodes.get(&id).map(|n| Arc::clone(&n))
    }

    /// Caches a directory node. If one is already present it is kept and
    /// returned.
    pub fn insert(&self, record: &FileRecord, name: Arc<str>) -> Arc<DirectoryNode> {
        let node = self
            .nodes
            .entry(record.id)
            .or_insert_with(|| Arc::new(DirectoryNode::from_record(record, name)));
        Arc::clone(&node)
    }

    /// Resolves `id` to a live file, materializing nodes for every
    /// directory between it and its root.
    ///
    /// Walks up through `parent_id` until a cached ancestor or a root
    /// accepted by `is_root` is reached, then walks back down caching each
    /// directory. A dangling parent, a cycle or a chain deeper than the
    /// depth limit is logged and gives `None`.
    pub fn find_file_by_id(
        &self,
        store: &FileRecordStore,
        names: &NameTable,
        id: FileId,
        is_root: impl Fn(FileId) -> bool,
    ) -> Option<VirtualFile> {
        if id.is_none() {
            return None;
        }
        if let Some(node) = self.get(id) {
            trace!(%id, "node cache hit");
            return Some(node.to_virtual_file());
        }
        let target = store.record(id)?;

        // Upward walk: records not yet cached, nearest first.
        let mut chain = vec![target];
        let mut seen = HashSet::from([id]);
        let mut current = target;
        loop {
            if current.parent_id.is_none() {
                if !is_root(current.id) {
                    warn!(%id, top = %current.id, "parent chain ends at an unregistered root");
                    return None;
                }
                break;
            }
            if self.nodes.contains_key(&current.parent_id) {
                break;
            }
            if chain.len() > self.max_depth {
                warn!(%id, depth = chain.len(), "parent chain exceeds traversal limit");
                return None;
            }
            let Some(parent) = store.record(current.parent_id) else {
                warn!(%id, missing = %current.parent_id, "parent chain references a missing record");
                return None;
            };
            if !seen.insert(parent.id) {
                warn!(%id, at = %parent.id, "cycle in parent chain");
                return None;
            }
            chain.push(parent);
            current = parent;
        }
        trace!(%id, walked = chain.len(), "node cache miss");

        // Downward walk: memoize directories root-most first.
        let mut resolved = None;
        for record in chain.iter().rev() {
            let name = names.name(record.name_id).unwrap_or_else(|| Arc::from(""));
            if record.is_directory() {
                resolved = Some(self.insert(record, name).to_virtual_file());
            } else {
                resolved = Some(VirtualFile {
                    id: record.id,
                    parent_id: record.parent_id,
                    name,
                    is_directory: false,
                });
            }
        }
        resolved
    }

    /// Resolves `id` without materializing anything.
    ///
    /// Directories resolve only if their node is cached. Files resolve only
    /// if their parent's node is cached.
    pub fn find_file_by_id_if_cached(
        &self,
        store: &FileRecordStore,
        names: &NameTable,
        id: FileId,
    ) -> Option<VirtualFile> {
        if let Some(node) = self.get(id) {
            return Some(node.to_virtual_file());
        }
        let record = store.record(id)?;
        if record.is_directory() || !self.nodes.contains_key(&record.parent_id) {
            return None;
        }
        Some(VirtualFile {
            id,
            parent_id: record.parent_id,
            name: names.name(record.name_id).unwrap_or_else(|| Arc::from("")),
            is_directory: false,
        })
    }

    /// Drops the node for `id`.
    pub fn evict(&self, id: FileId) -> bool {
        self.nodes.remove(&id).is_some()
    }

    /// Drops the nodes for every id in `ids`.
    pub fn evict_subtree(&self, ids: impl IntoIterator<Item = FileId>) -> usize {
        ids.into_iter().filter(|id| self.evict(*id)).count()
    }

    /// Empties a directory's child-id cell, if the node is cached.
    pub fn invalidate_children(&self, id: FileId) {
        if let Some(node) = self.nodes.get(&id) {
            node.clear_children();
        }
    }

    /// Refreshes a cached node's mirrored flags.
    pub fn update_flags(&self, id: FileId, flags: FileFlags) {
        if let Some(node) = self.nodes.get(&id) {
            node.set_flags(flags);
        }
    }

    /// Drops every node.
    pub fn clear(&self) {
        self.nodes.clear();
    }

    /// Number of cached nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
