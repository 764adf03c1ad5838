//! The persisted table of file records.
//!
//! Records live in an arena indexed by [`FileId`]. Parent links are plain
//! ids, and each directory slot carries the ids of its children, so both
//! directions of the tree are walked by repeated lookups and nothing holds a
//! reference cycle.
//!
//! # Concurrency
//!
//! The table sits behind one `parking_lot::RwLock`. Readers take short
//! shared locks and copy out what they need. The single logical writer
//! (whoever holds the host's write permit) takes short exclusive locks. No
//! lock is held across delegate I/O.
//!
//! # Id policy
//!
//! Ids are allocated monotonically and never reused. Deleting a record
//! leaves a hole in the arena, and the high-water mark is persisted. A stale
//! id kept by a caller therefore stays invalid forever instead of aliasing
//! a later file.

use crate::record::{ContentId, FileAttributes, FileFlags, FileId, FileRecord, NameId};
use crate::storage::PersistedRecord;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{trace, warn};

#[derive(Debug, Clone)]
struct Slot {
    record: FileRecord,
    children: Vec<FileId>,
}

#[derive(Debug)]
struct RecordTable {
    /// Index = id. Index 0 is never used.
    slots: Vec<Option<Slot>>,
    next_id: u32,
    roots: BTreeMap<String, FileId>,
}

impl RecordTable {
    fn slot(&self, id: FileId) -> Option<&Slot> {
        if id.is_none() {
            return None;
        }
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, id: FileId) -> Option<&mut Slot> {
        if id.is_none() {
            return None;
        }
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }
}

/// Counters describing the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordStats {
    /// Live records.
    pub live_records: usize,
    /// Next id that will be allocated.
    pub next_id: u32,
    /// Registered roots.
    pub roots: usize,
}

/// Thread-safe record table.
#[derive(Debug)]
pub struct FileRecordStore {
    table: RwLock<RecordTable>,
    max_depth: usize,
    modified: AtomicBool,
}

impl FileRecordStore {
    /// Creates an empty table.
    pub fn new(max_depth: usize) -> Self {
        Self {
            table: RwLock::new(RecordTable {
                slots: vec![None],
                next_id: 1,
                roots: BTreeMap::new(),
            }),
            max_depth,
            modified: AtomicBool::new(false),
        }
    }

    /// Rebuilds a table from persisted parts.
    pub fn restore(
        max_depth: usize,
        next_id: u32,
        records: Vec<PersistedRecord>,
        roots: BTreeMap<String, FileId>,
    ) -> Self {
        let next_id = next_id.max(1);
        let mut slots: Vec<Option<Slot>> = vec![None; next_id as usize];
        for persisted in records {
            let idx = persisted.record.id.index();
            if idx == 0 || idx >= slots.len() {
                warn!(id = %persisted.record.id, "dropping out-of-range persisted record");
                continue;
            }
            slots[idx] = Some(Slot {
                record: persisted.record,
                children: persisted.children,
            });
        }
        let roots = roots
            .into_iter()
            .filter(|(url, id)| {
                let ok = slots.get(id.index()).is_some_and(Option::is_some);
                if !ok {
                    warn!(%url, %id, "dropping persisted root without a record");
                }
                ok
            })
            .collect();
        Self {
            table: RwLock::new(RecordTable {
                slots,
                next_id,
                roots,
            }),
            max_depth,
            modified: AtomicBool::new(false),
        }
    }

    /// Copies the table out for persistence: `(next_id, records, roots)`.
    pub fn snapshot_parts(&self) -> (u32, Vec<PersistedRecord>, BTreeMap<String, FileId>) {
        let table = self.table.read();
        let records = table
            .slots
            .iter()
            .flatten()
            .map(|slot| PersistedRecord {
                record: slot.record,
                children: slot.children.clone(),
            })
            .collect();
        (table.next_id, records, table.roots.clone())
    }

    /// Returns and clears the "changed since last save" marker.
    pub fn take_modified(&self) -> bool {
        self.modified.swap(false, Ordering::AcqRel)
    }

    fn touch(&self) {
        self.modified.store(true, Ordering::Release);
    }

    /// Forces the next flush to save (used after a failed save).
    pub fn mark_modified(&self) {
        self.touch();
    }

    /// Traversal depth limit.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    // ==================== Allocation ====================

    /// Allocates a record and links it under `parent` (unless `parent` is
    /// [`FileId::NONE`], which makes a root record).
    pub fn allocate(&self, parent: FileId, name_id: NameId, attrs: &FileAttributes) -> FileId {
        let mut table = self.table.write();
        let id = FileId::from_raw(table.next_id);
        table.next_id += 1;

        let record = FileRecord {
            id,
            parent_id: parent,
            name_id,
            flags: attrs.to_flags(),
            length: attrs.record_length(),
            timestamp: attrs.last_modified,
            content_id: ContentId::NONE,
        };
        if table.slots.len() <= id.index() {
            table.slots.resize(id.index() + 1, None);
        }
        table.slots[id.index()] = Some(Slot {
            record,
            children: Vec::new(),
        });
        if !parent.is_none() {
            match table.slot_mut(parent) {
                Some(parent_slot) => parent_slot.children.push(id),
                None => warn!(%parent, %id, "allocated child under a missing parent"),
            }
        }
        drop(table);
        self.touch();
        trace!(%id, %parent, "allocated record");
        id
    }

    // ==================== Reads ====================

    /// Copy of the record.
    pub fn record(&self, id: FileId) -> Option<FileRecord> {
        self.table.read().slot(id).map(|s| s.record)
    }

    /// True if `id` names a live record.
    pub fn is_valid(&self, id: FileId) -> bool {
        self.table.read().slot(id).is_some()
    }

    /// Parent id.
    pub fn parent(&self, id: FileId) -> Option<FileId> {
        self.record(id).map(|r| r.parent_id)
    }

    /// Name id.
    pub fn name_id(&self, id: FileId) -> Option<NameId> {
        self.record(id).map(|r| r.name_id)
    }

    /// Flag bits.
    pub fn flags(&self, id: FileId) -> Option<FileFlags> {
        self.record(id).map(|r| r.flags)
    }

    /// Byte length, `-1` if unknown.
    pub fn length(&self, id: FileId) -> Option<i64> {
        self.record(id).map(|r| r.length)
    }

    /// Timestamp in ms.
    pub fn timestamp(&self, id: FileId) -> Option<i64> {
        self.record(id).map(|r| r.timestamp)
    }

    /// Attached content id.
    pub fn content_id(&self, id: FileId) -> Option<ContentId> {
        self.record(id).map(|r| r.content_id)
    }

    /// Child ids in stored order.
    pub fn children(&self, id: FileId) -> Option<Vec<FileId>> {
        self.table.read().slot(id).map(|s| s.children.clone())
    }

    // ==================== Writes ====================

    fn update<R>(&self, id: FileId, f: impl FnOnce(&mut Slot) -> R) -> Option<R> {
        let mut table = self.table.write();
        let result = table.slot_mut(id).map(f);
        drop(table);
        if result.is_some() {
            self.touch();
        }
        result
    }

    /// Rewrites the parent link without touching child lists.
    pub fn set_parent(&self, id: FileId, parent: FileId) -> bool {
        self.update(id, |s| s.record.parent_id = parent).is_some()
    }

    /// Rewrites the name.
    pub fn set_name(&self, id: FileId, name_id: NameId) -> bool {
        self.update(id, |s| s.record.name_id = name_id).is_some()
    }

    /// Sets or clears exactly the bits in `mask`. Every other bit, reserved
    /// ones included, is kept.
    pub fn set_flags(&self, id: FileId, mask: FileFlags, on: bool) -> bool {
        self.update(id, |s| s.record.flags.set(mask, on)).is_some()
    }

    /// Byte length.
    pub fn set_length(&self, id: FileId, length: i64) -> bool {
        self.update(id, |s| s.record.length = length).is_some()
    }

    /// Timestamp.
    pub fn set_timestamp(&self, id: FileId, timestamp: i64) -> bool {
        self.update(id, |s| s.record.timestamp = timestamp).is_some()
    }

    /// Swaps the content id and returns the previous one.
    pub fn set_content_id(&self, id: FileId, content_id: ContentId) -> Option<ContentId> {
        self.update(id, |s| std::mem::replace(&mut s.record.content_id, content_id))
    }

    /// Refreshes the delegate-derived fields from a probe. Cache
    /// bookkeeping bits and reserved bits are kept.
    pub fn update_attributes(&self, id: FileId, attrs: &FileAttributes) -> bool {
        self.update(id, |s| {
            let kept = s.record.flags.difference(FileFlags::ATTRIBUTE_MASK);
            s.record.flags = kept.union(attrs.to_flags());
            s.record.length = attrs.record_length();
            s.record.timestamp = attrs.last_modified;
        })
        .is_some()
    }

    /// Replaces the child list.
    pub fn set_children(&self, id: FileId, children: Vec<FileId>) -> bool {
        self.update(id, |s| s.children = children).is_some()
    }

    /// Appends a child id if not already present.
    pub fn add_child(&self, parent: FileId, child: FileId) -> bool {
        self.update(parent, |s| {
            if !s.children.contains(&child) {
                s.children.push(child);
            }
        })
        .is_some()
    }

    /// Removes a child id. Returns true if it was present.
    pub fn remove_child(&self, parent: FileId, child: FileId) -> bool {
        self.update(parent, |s| {
            let before = s.children.len();
            s.children.retain(|c| *c != child);
            before != s.children.len()
        })
        .unwrap_or(false)
    }

    /// Reparents `id` under `new_parent`, moving it across child lists in
    /// one critical section.
    pub fn move_child(&self, id: FileId, new_parent: FileId) -> bool {
        let mut table = self.table.write();
        let Some(old_parent) = table.slot(id).map(|s| s.record.parent_id) else {
            return false;
        };
        if table.slot(new_parent).is_none() {
            return false;
        }
        if let Some(old) = table.slot_mut(old_parent) {
            old.children.retain(|c| *c != id);
        }
        if let Some(new) = table.slot_mut(new_parent)
            && !new.children.contains(&id)
        {
            new.children.push(id);
        }
        if let Some(slot) = table.slot_mut(id) {
            slot.record.parent_id = new_parent;
        }
        drop(table);
        self.touch();
        true
    }

    /// Frees `id` and every descendant, unlinking `id` from its parent and
    /// dropping any root entry that pointed into the subtree.
    ///
    /// Returns the freed records so their content references can be
    /// released. Cycles and dangling child ids are logged and skipped. The
    /// whole subtree is freed regardless of depth, so no record is left
    /// with a freed parent.
    pub fn delete_subtree(&self, id: FileId) -> Vec<FileRecord> {
        let mut table = self.table.write();
        let Some(parent) = table.slot(id).map(|s| s.record.parent_id) else {
            return Vec::new();
        };
        if let Some(parent_slot) = table.slot_mut(parent) {
            parent_slot.children.retain(|c| *c != id);
        }

        let mut freed = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                warn!(id = %current, "cycle detected while deleting subtree");
                continue;
            }
            let Some(slot) = table.slots.get_mut(current.index()).and_then(Option::take) else {
                warn!(id = %current, "dangling child id while deleting subtree");
                continue;
            };
            stack.extend(slot.children.iter().copied());
            freed.push(slot.record);
        }

        table.roots.retain(|_, root| !seen.contains(root));
        drop(table);
        self.touch();
        trace!(%id, freed = freed.len(), "deleted subtree");
        freed
    }

    /// True if `ancestor` is `id` or one of its ancestors. Stops at the
    /// depth limit.
    pub fn is_ancestor(&self, ancestor: FileId, id: FileId) -> bool {
        let table = self.table.read();
        let mut current = id;
        for _ in 0..=self.max_depth {
            if current == ancestor {
                return true;
            }
            match table.slot(current) {
                Some(slot) if !slot.record.parent_id.is_none() => current = slot.record.parent_id,
                _ => return false,
            }
        }
        false
    }

    /// Number of parent hops from `id` to its root, `None` if the chain is
    /// broken, cyclic or longer than the depth limit.
    pub fn depth(&self, id: FileId) -> Option<usize> {
        let table = self.table.read();
        let mut current = table.slot(id)?;
        for depth in 0..=self.max_depth {
            if current.record.parent_id.is_none() {
                return Some(depth);
            }
            current = table.slot(current.record.parent_id)?;
        }
        None
    }

    // ==================== Roots ====================

    /// Persisted root id for a normalized URL.
    pub fn root_id(&self, url: &str) -> Option<FileId> {
        self.table.read().roots.get(url).copied()
    }

    /// Records `url` as the key of root record `id`.
    pub fn register_root(&self, url: &str, id: FileId) {
        self.table.write().roots.insert(url.to_string(), id);
        self.touch();
    }

    /// Forgets the root entry for `id`, returning its URL.
    pub fn unregister_root(&self, id: FileId) -> Option<String> {
        let mut table = self.table.write();
        let url = table
            .roots
            .iter()
            .find(|(_, root)| **root == id)
            .map(|(url, _)| url.clone())?;
        table.roots.remove(&url);
        drop(table);
        self.touch();
        Some(url)
    }

    /// True if a persisted root entry points at `id`.
    pub fn is_root_entry(&self, id: FileId) -> bool {
        !id.is_none() && self.table.read().roots.values().any(|root| *root == id)
    }

    /// All persisted roots.
    pub fn root_urls(&self) -> Vec<(String, FileId)> {
        self.table
            .read()
            .roots
            .iter()
            .map(|(url, id)| (url.clone(), *id))
            .collect()
    }

    /// Table counters.
    pub fn stats(&self) -> RecordStats {
        let table = self.table.read();
        RecordStats {
            live_records: table.slots.iter().flatten().count(),
            next_id: table.next_id,
            roots: table.roots.len(),
        }
    }
}
