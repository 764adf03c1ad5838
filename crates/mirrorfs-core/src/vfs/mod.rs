//! The [`PersistentFs`] context object.
//!
//! One `PersistentFs` owns every component of a mirror: the name table, the
//! record store, the content store, the root registry, the node cache, the
//! delegate registry and the listener bus. There is no global instance. A
//! host opens one, passes it (usually behind an `Arc`) to whoever needs it,
//! and closes it when done.
//!
//! # Locking
//!
//! | Lock | Guards | Held across delegate I/O |
//! |------|--------|--------------------------|
//! | record store `RwLock` | record arena, root table | no |
//! | root registry `RwLock` | URL/id maps | no |
//! | `root_lock` | root creation | yes (one probe) |
//! | `reconcile_lock` | child-list reconciliation | yes |
//! | `content_lock` | content reload and commit | yes |
//!
//! Mutations additionally require the host's [`WritePermit`].

mod apply;
mod children;
mod content;
mod operations;
mod roots;

pub use children::{ChildEntry, ChildInfo};

use crate::cache::{DirectoryEntryCache, VirtualFile};
use crate::config::VfsConfig;
use crate::content::{ContentStats, ContentStore};
use crate::delegate::DelegateFs;
use crate::error::{VfsError, VfsResult};
use crate::names::NameTable;
use crate::notify::{ListenerBus, SubscriptionId, VfsListener};
use crate::permit::WritePermit;
use crate::record::{FileFlags, FileId, FileRecord};
use crate::roots::RootRegistry;
use crate::storage::{SNAPSHOT_FORMAT_VERSION, Snapshot, Storage};
use crate::store::{FileRecordStore, RecordStats};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

/// Counters across every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfsStats {
    /// Record table counters.
    pub records: RecordStats,
    /// Blob area counters.
    pub content: ContentStats,
    /// Interned names.
    pub names: usize,
    /// Live directory nodes.
    pub cached_nodes: usize,
    /// Roots registered in memory.
    pub registered_roots: usize,
}

/// Persistent virtual filesystem over one or more delegates.
pub struct PersistentFs {
    config: VfsConfig,
    storage: Arc<dyn Storage>,
    permit: Arc<dyn WritePermit>,
    names: NameTable,
    store: FileRecordStore,
    content: ContentStore,
    roots: RootRegistry,
    cache: DirectoryEntryCache,
    delegates: RwLock<HashMap<String, Arc<dyn DelegateFs>>>,
    bus: ListenerBus,
    root_lock: Mutex<()>,
    reconcile_lock: Mutex<()>,
    content_lock: Mutex<()>,
}

impl fmt::Debug for PersistentFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentFs")
            .field("config", &self.config)
            .field("protocols", &self.delegates.read().keys().collect::<Vec<_>>())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl PersistentFs {
    /// Opens the mirror persisted in `storage`.
    ///
    /// A fresh store starts empty. A corrupted snapshot is either rebuilt
    /// from scratch (with [`VfsConfig::rebuild_on_corruption`]) or reported
    /// as [`VfsError::Storage`].
    #[instrument(level = "debug", skip_all)]
    pub fn open(
        config: VfsConfig,
        storage: Arc<dyn Storage>,
        permit: Arc<dyn WritePermit>,
    ) -> VfsResult<Self> {
        let loaded = storage.load_snapshot().and_then(|snapshot| {
            if let Some(snapshot) = &snapshot {
                snapshot.validate()?;
            }
            Ok(snapshot)
        });
        let snapshot = match loaded {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("no persisted snapshot, starting empty");
                Snapshot::empty()
            }
            Err(e) if e.is_corruption() && config.rebuild_on_corruption => {
                warn!(error = %e, "persisted state is corrupted, rebuilding from scratch");
                storage.wipe()?;
                Snapshot::empty()
            }
            Err(e) => return Err(e.into()),
        };

        let Snapshot {
            next_file_id,
            next_content_id,
            names,
            records,
            roots,
            contents,
            ..
        } = snapshot;
        let record_count = records.len();
        let fs = Self {
            names: NameTable::from_names(names),
            store: FileRecordStore::restore(config.max_traversal_depth, next_file_id, records, roots),
            content: ContentStore::restore(
                Arc::clone(&storage),
                config.blob_cache_capacity,
                next_content_id,
                contents,
            ),
            roots: RootRegistry::new(),
            cache: DirectoryEntryCache::new(config.max_traversal_depth),
            delegates: RwLock::new(HashMap::new()),
            bus: ListenerBus::new(),
            root_lock: Mutex::new(()),
            reconcile_lock: Mutex::new(()),
            content_lock: Mutex::new(()),
            config,
            storage,
            permit,
        };
        info!(records = record_count, "opened mirror");
        Ok(fs)
    }

    /// Saves the record table, names and content bookkeeping if anything
    /// changed since the last save.
    #[instrument(level = "debug", skip(self))]
    pub fn flush(&self) -> VfsResult<()> {
        let records_changed = self.store.take_modified();
        let content_changed = self.content.take_modified();
        if !records_changed && !content_changed {
            trace!("nothing to flush");
            return Ok(());
        }
        let (next_file_id, records, roots) = self.store.snapshot_parts();
        let (next_content_id, contents) = self.content.snapshot_parts();
        let snapshot = Snapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            next_file_id,
            next_content_id,
            names: self.names.to_names(),
            records,
            roots,
            contents,
        };
        if let Err(e) = self.storage.save_snapshot(&snapshot) {
            self.store.mark_modified();
            return Err(e.into());
        }
        debug!(records = snapshot.records.len(), "flushed snapshot");
        Ok(())
    }

    /// Flushes (unless disabled by config) and releases the mirror.
    pub fn close(self) -> VfsResult<()> {
        if self.config.flush_on_close {
            self.flush()?;
        }
        info!("closed mirror");
        Ok(())
    }

    /// Active configuration.
    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    // ==================== Delegates ====================

    /// Registers the delegate for its protocol, replacing any previous one.
    pub fn register_filesystem(&self, fs: Arc<dyn DelegateFs>) {
        let protocol = fs.protocol().to_string();
        debug!(%protocol, "registered delegate filesystem");
        self.delegates.write().insert(protocol, fs);
    }

    /// Delegate serving `protocol`.
    pub fn filesystem(&self, protocol: &str) -> Option<Arc<dyn DelegateFs>> {
        self.delegates.read().get(protocol).cloned()
    }

    fn delegate(&self, protocol: &str) -> VfsResult<Arc<dyn DelegateFs>> {
        self.filesystem(protocol)
            .ok_or_else(|| VfsError::UnknownProtocol(protocol.to_string()))
    }

    fn require_permit(&self) -> VfsResult<()> {
        if self.permit.is_held() {
            Ok(())
        } else {
            Err(VfsError::WritePermitRequired)
        }
    }

    // ==================== Listeners ====================

    /// Subscribes to batch notifications.
    pub fn subscribe(&self, listener: Arc<dyn VfsListener>) -> SubscriptionId {
        self.bus.subscribe(listener)
    }

    /// Cancels a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    // ==================== Id queries ====================

    /// True if `id` names a live record.
    pub fn exists(&self, id: FileId) -> bool {
        self.store.is_valid(id)
    }

    /// True for live directories.
    pub fn is_directory(&self, id: FileId) -> bool {
        self.store.record(id).is_some_and(|r| r.is_directory())
    }

    /// True for live records without the read-only bit.
    pub fn is_writable(&self, id: FileId) -> bool {
        self.store
            .flags(id)
            .is_some_and(|f| !f.contains(FileFlags::READ_ONLY))
    }

    /// Stored length, `-1` for directories and unknown lengths.
    pub fn length(&self, id: FileId) -> Option<i64> {
        self.store.length(id)
    }

    /// Stored modification time (ms).
    pub fn timestamp(&self, id: FileId) -> Option<i64> {
        self.store.timestamp(id)
    }

    /// Raw flag bits, reserved ones included.
    pub fn attributes_bitmask(&self, id: FileId) -> Option<u32> {
        self.store.flags(id).map(|f| f.bits())
    }

    /// Copy of the record.
    pub fn record(&self, id: FileId) -> Option<FileRecord> {
        self.store.record(id)
    }

    /// Name of the file. Roots are named by their path.
    pub fn name(&self, id: FileId) -> Option<Arc<str>> {
        self.store.name_id(id).and_then(|n| self.names.name(n))
    }

    /// Parent directory, `None` for roots and invalid ids.
    pub fn parent(&self, id: FileId) -> Option<FileId> {
        self.store.parent(id).filter(|p| !p.is_none())
    }

    /// Resolves `id` to a live file, caching the directories above it.
    pub fn find_file_by_id(&self, id: FileId) -> Option<VirtualFile> {
        self.cache
            .find_file_by_id(&self.store, &self.names, id, |root| self.is_root_id(root))
    }

    /// Resolves `id` only if that needs no new cache nodes.
    pub fn find_file_by_id_if_cached(&self, id: FileId) -> Option<VirtualFile> {
        self.cache
            .find_file_by_id_if_cached(&self.store, &self.names, id)
    }

    fn is_root_id(&self, id: FileId) -> bool {
        self.roots.is_root(id) || self.store.is_root_entry(id)
    }

    // ==================== Maintenance ====================

    /// Drops the node cache. Records and content are untouched.
    pub fn on_low_memory(&self) {
        let dropped = self.cache.len();
        self.cache.clear();
        debug!(dropped, "dropped node cache on low memory");
    }

    /// Clears all derived state: node cache, blob cache and the in-memory
    /// root registry. Roots register again once `find_root` reconfirms them.
    pub fn reset_derived_state(&self) {
        self.cache.clear();
        self.content.clear_cache();
        self.roots.clear();
        debug!("reset derived state");
    }

    /// Counters across every component.
    pub fn stats(&self) -> VfsStats {
        VfsStats {
            records: self.store.stats(),
            content: self.content.stats(),
            names: self.names.len(),
            cached_nodes: self.cache.len(),
            registered_roots: self.roots.len(),
        }
    }
}
