//! Test harness: a mirror over an in-memory delegate and storage.

use mirrorfs_core::{
    AlwaysPermitted, DelegateFs, FileId, MemoryFs, MemoryStorage, PersistentFs, Snapshot, Storage,
    VfsConfig, WritePermit,
};
use std::ops::Deref;
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

/// Installs a test-writer subscriber once per process. `RUST_LOG` picks
/// the level.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A mirror wired to a fresh [`MemoryFs`] and [`MemoryStorage`].
pub struct TestVfs {
    pub vfs: PersistentFs,
    pub mem: Arc<MemoryFs>,
    pub storage: Arc<MemoryStorage>,
}

impl TestVfs {
    pub fn new() -> Self {
        Self::with_permit(Arc::new(AlwaysPermitted))
    }

    pub fn with_permit(permit: Arc<dyn WritePermit>) -> Self {
        init_tracing();
        let storage = Arc::new(MemoryStorage::new());
        let mem = Arc::new(MemoryFs::new());
        let vfs = Self::open_over(&storage, &mem, permit);
        Self { vfs, mem, storage }
    }

    /// Opens a second mirror over the same delegate and storage, as after a
    /// restart.
    pub fn reopen(self) -> Self {
        let Self { vfs, mem, storage } = self;
        vfs.close().expect("close failed");
        let vfs = Self::open_over(&storage, &mem, Arc::new(AlwaysPermitted));
        Self { vfs, mem, storage }
    }

    fn open_over(
        storage: &Arc<MemoryStorage>,
        mem: &Arc<MemoryFs>,
        permit: Arc<dyn WritePermit>,
    ) -> PersistentFs {
        let vfs = PersistentFs::open(
            VfsConfig::for_tests(),
            Arc::clone(storage) as Arc<dyn Storage>,
            permit,
        )
        .expect("open failed");
        vfs.register_filesystem(Arc::clone(mem) as Arc<dyn DelegateFs>);
        vfs
    }

    /// Creates `path` on the delegate and returns its root record.
    pub fn root(&self, path: &str) -> FileId {
        self.mem.mkdirs(path);
        self.vfs
            .find_root("mem", path)
            .expect("find_root failed")
            .expect("root not confirmed")
    }

    /// Record for `mem://<path>`.
    pub fn file(&self, path: &str) -> FileId {
        self.vfs
            .find_file_by_path(&format!("mem://{path}"))
            .expect("lookup failed")
            .unwrap_or_else(|| panic!("{path} not found"))
    }

    /// Child names of `dir`, in listing order.
    pub fn names(&self, dir: FileId) -> Vec<String> {
        self.vfs
            .list_children(dir)
            .expect("listing failed")
            .into_iter()
            .map(|c| c.name.to_string())
            .collect()
    }

    /// Flushes and returns the persisted snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.vfs.flush().expect("flush failed");
        self.storage
            .load_snapshot()
            .expect("load failed")
            .expect("nothing persisted")
    }
}

impl Deref for TestVfs {
    type Target = PersistentFs;

    fn deref(&self) -> &PersistentFs {
        &self.vfs
    }
}
