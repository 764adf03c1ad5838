//! Content blob area.
//!
//! Blobs are keyed by [`ContentId`] and carry a reference count. A count is
//! held by each record whose `content_id` points at the blob, plus one per
//! explicit [`ContentStore::acquire`]. When the count reaches zero the blob
//! is deleted from storage. Identical byte strings share one blob, found by
//! SHA-256 digest.
//!
//! Loaded blobs sit in a moka cache bounded by total byte weight, so hot
//! content is served without touching storage.

use crate::error::StorageError;
use crate::record::{ContentId, FileId};
use crate::storage::{PersistedContent, Storage};
use moka::sync::Cache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone)]
struct ContentEntry {
    digest: String,
    refs: u32,
    length: u64,
}

#[derive(Debug, Default)]
struct ContentTable {
    entries: HashMap<ContentId, ContentEntry>,
    by_digest: HashMap<String, ContentId>,
    next_id: u32,
}

/// Counters describing the blob area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentStats {
    /// Live blobs.
    pub blobs: usize,
    /// Sum of live blob lengths.
    pub bytes: u64,
    /// Blobs currently held in the in-memory cache.
    pub cached: u64,
}

/// Ref-counted, deduplicating blob store.
pub struct ContentStore {
    storage: Arc<dyn Storage>,
    table: Mutex<ContentTable>,
    cache: Cache<ContentId, Arc<[u8]>>,
    modified: AtomicBool,
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl ContentStore {
    /// Creates an empty blob area over `storage`.
    pub fn new(storage: Arc<dyn Storage>, cache_capacity: u64) -> Self {
        Self::restore(storage, cache_capacity, 1, Vec::new())
    }

    /// Rebuilds the bookkeeping from persisted entries.
    pub fn restore(
        storage: Arc<dyn Storage>,
        cache_capacity: u64,
        next_id: u32,
        contents: Vec<PersistedContent>,
    ) -> Self {
        let mut table = ContentTable {
            next_id: next_id.max(1),
            ..ContentTable::default()
        };
        for content in contents {
            if content.id.is_none() || content.refs == 0 {
                continue;
            }
            table.by_digest.insert(content.digest.clone(), content.id);
            table.entries.insert(
                content.id,
                ContentEntry {
                    digest: content.digest,
                    refs: content.refs,
                    length: content.length,
                },
            );
        }
        let cache = Cache::builder()
            .max_capacity(cache_capacity)
            .weigher(|_id: &ContentId, bytes: &Arc<[u8]>| {
                u32::try_from(bytes.len()).unwrap_or(u32::MAX)
            })
            .build();
        Self {
            storage,
            table: Mutex::new(table),
            cache,
            modified: AtomicBool::new(false),
        }
    }

    /// Copies the bookkeeping out for persistence: `(next_id, entries)`.
    pub fn snapshot_parts(&self) -> (u32, Vec<PersistedContent>) {
        let table = self.table.lock();
        let mut contents: Vec<_> = table
            .entries
            .iter()
            .map(|(id, e)| PersistedContent {
                id: *id,
                digest: e.digest.clone(),
                refs: e.refs,
                length: e.length,
            })
            .collect();
        contents.sort_by_key(|c| c.id);
        (table.next_id, contents)
    }

    /// Returns and clears the "changed since last save" marker.
    pub fn take_modified(&self) -> bool {
        self.modified.swap(false, Ordering::AcqRel)
    }

    /// Stores `bytes` and takes one reference on the resulting blob.
    ///
    /// If a blob with the same digest exists, it is reused and nothing is
    /// written.
    pub fn store(&self, bytes: &[u8]) -> Result<ContentId, StorageError> {
        let digest = digest_hex(bytes);
        let mut table = self.table.lock();
        if let Some(id) = table.by_digest.get(&digest).copied()
            && let Some(entry) = table.entries.get_mut(&id)
        {
            entry.refs += 1;
            trace!(%id, refs = entry.refs, "deduplicated blob");
            drop(table);
            self.modified.store(true, Ordering::Release);
            return Ok(id);
        }

        let id = ContentId::from_raw(table.next_id);
        self.storage.save_blob(id, bytes)?;
        table.next_id += 1;
        table.by_digest.insert(digest.clone(), id);
        table.entries.insert(
            id,
            ContentEntry {
                digest,
                refs: 1,
                length: bytes.len() as u64,
            },
        );
        drop(table);
        self.cache.insert(id, Arc::from(bytes));
        self.modified.store(true, Ordering::Release);
        debug!(%id, len = bytes.len(), "stored blob");
        Ok(id)
    }

    /// Takes an extra reference. Returns false for unknown ids.
    pub fn acquire(&self, id: ContentId) -> bool {
        let mut table = self.table.lock();
        match table.entries.get_mut(&id) {
            Some(entry) => {
                entry.refs += 1;
                self.modified.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Drops one reference, deleting the blob at zero.
    ///
    /// Releasing [`ContentId::NONE`] or an unknown id is a no-op.
    pub fn release(&self, id: ContentId) -> Result<(), StorageError> {
        if id.is_none() {
            return Ok(());
        }
        let mut table = self.table.lock();
        let Some(entry) = table.entries.get_mut(&id) else {
            warn!(%id, "release of unknown blob");
            return Ok(());
        };
        entry.refs = entry.refs.saturating_sub(1);
        self.modified.store(true, Ordering::Release);
        if entry.refs > 0 {
            return Ok(());
        }
        if let Some(entry) = table.entries.remove(&id) {
            table.by_digest.remove(&entry.digest);
        }
        drop(table);
        self.cache.invalidate(&id);
        debug!(%id, "deleting unreferenced blob");
        self.storage.delete_blob(id)
    }

    /// Loads blob bytes, through the in-memory cache.
    ///
    /// Unknown ids give `Ok(None)`. A known id whose bytes are gone from
    /// storage is logged and also gives `Ok(None)`.
    pub fn load(&self, id: ContentId) -> Result<Option<Arc<[u8]>>, StorageError> {
        if !self.table.lock().entries.contains_key(&id) {
            return Ok(None);
        }
        if let Some(bytes) = self.cache.get(&id) {
            trace!(%id, "blob cache hit");
            return Ok(Some(bytes));
        }
        trace!(%id, "blob cache miss");
        match self.storage.load_blob(id)? {
            Some(bytes) => {
                let bytes: Arc<[u8]> = Arc::from(bytes);
                self.cache.insert(id, Arc::clone(&bytes));
                Ok(Some(bytes))
            }
            None => {
                warn!(%id, "blob referenced by bookkeeping is missing from storage");
                Ok(None)
            }
        }
    }

    /// Current reference count, 0 for unknown ids.
    pub fn ref_count(&self, id: ContentId) -> u32 {
        self.table.lock().entries.get(&id).map_or(0, |e| e.refs)
    }

    /// Drops every cached blob (storage is untouched).
    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }

    /// Blob counters.
    pub fn stats(&self) -> ContentStats {
        let table = self.table.lock();
        ContentStats {
            blobs: table.entries.len(),
            bytes: table.entries.values().map(|e| e.length).sum(),
            cached: self.cache.entry_count(),
        }
    }
}

/// Buffered writer for one file's content.
///
/// Writes land in memory at arbitrary offsets. Nothing reaches the delegate
/// or the blob store until the writer is handed to
/// [`crate::PersistentFs::commit`]. Dropping an uncommitted writer discards
/// the buffer.
///
/// ```
/// use mirrorfs_core::{ContentWriter, FileId};
///
/// let mut w = ContentWriter::new_empty(FileId::from_raw(7));
/// w.write(0, b"Hello, World!");
/// assert_eq!(w.len(), 13);
/// assert!(w.is_dirty());
/// assert_eq!(w.read(0, 5), b"Hello");
/// ```
#[derive(Debug)]
pub struct ContentWriter {
    file: FileId,
    content: Vec<u8>,
    dirty: bool,
    finished: bool,
}

impl ContentWriter {
    /// Writer seeded with the file's current bytes.
    pub fn new(file: FileId, existing: Vec<u8>) -> Self {
        Self {
            file,
            content: existing,
            dirty: false,
            finished: false,
        }
    }

    /// Writer that starts empty (truncating open).
    pub fn new_empty(file: FileId) -> Self {
        Self {
            file,
            content: Vec::new(),
            dirty: true,
            finished: false,
        }
    }

    /// Writes `data` at `offset`, zero-filling any gap. Returns the number
    /// of bytes written, or `None` (buffer untouched) when the end of the
    /// write is not addressable.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Option<usize> {
        let Some((offset, end)) = usize::try_from(offset)
            .ok()
            .and_then(|offset| Some((offset, offset.checked_add(data.len())?)))
        else {
            warn!(file = %self.file, offset, len = data.len(), "rejected write past addressable range");
            return None;
        };
        if end > self.content.len() {
            let new_capacity = std::cmp::max(end, (self.content.capacity() * 3) / 2);
            if new_capacity > self.content.capacity() {
                self.content.reserve(new_capacity - self.content.len());
            }
            self.content.resize(end, 0);
        }
        self.content[offset..end].copy_from_slice(data);
        self.dirty = true;
        Some(data.len())
    }

    /// Reads up to `size` bytes from `offset`. Empty past the end.
    pub fn read(&self, offset: u64, size: usize) -> &[u8] {
        let Ok(offset) = usize::try_from(offset) else {
            return &[];
        };
        if offset >= self.content.len() {
            return &[];
        }
        let end = offset.saturating_add(size).min(self.content.len());
        &self.content[offset..end]
    }

    /// Truncates or zero-extends to `size`. Returns false, leaving the
    /// buffer as is, when `size` is not addressable.
    pub fn truncate(&mut self, size: u64) -> bool {
        let Ok(size) = usize::try_from(size) else {
            return false;
        };
        if size != self.content.len() {
            self.content.resize(size, 0);
            self.dirty = true;
        }
        true
    }

    /// Buffered length.
    #[inline]
    pub fn len(&self) -> u64 {
        self.content.len() as u64
    }

    /// True if the buffer holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// True once anything was written or truncated.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Target file.
    #[inline]
    pub fn file(&self) -> FileId {
        self.file
    }

    /// Buffered bytes.
    #[inline]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Hands the buffer over for commit.
    pub(crate) fn finish(mut self) -> (FileId, Vec<u8>) {
        self.finished = true;
        (self.file, std::mem::take(&mut self.content))
    }
}

impl Drop for ContentWriter {
    fn drop(&mut self) {
        if !self.finished && self.dirty {
            debug!(file = %self.file, len = self.content.len(), "discarding uncommitted writer");
        }
    }
}
