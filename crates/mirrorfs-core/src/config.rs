//! Runtime configuration for the mirror.
//!
//! Defaults suit an interactive host backed by local disk. Tests use
//! [`VfsConfig::for_tests()`] for small limits that are easy to hit.

use serde::Deserialize;

/// Default parent-chain depth after which id resolution gives up.
pub const DEFAULT_MAX_TRAVERSAL_DEPTH: usize = 512;

/// Default ceiling for content written back into the blob store (20 MiB).
pub const DEFAULT_MAX_CACHED_CONTENT_SIZE: u64 = 20 * 1024 * 1024;

/// Default in-memory blob cache budget (64 MiB).
pub const DEFAULT_BLOB_CACHE_CAPACITY: u64 = 64 * 1024 * 1024;

/// Configuration options for [`crate::PersistentFs`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Maximum parent-chain length walked by id resolution and subtree
    /// deletion. Longer chains are treated as corruption.
    pub max_traversal_depth: usize,

    /// Content larger than this is served from the delegate every time and
    /// never written into the blob store.
    pub max_cached_content_size: u64,

    /// Byte budget of the in-memory blob cache in front of the storage.
    pub blob_cache_capacity: u64,

    /// Start from an empty store when the persisted snapshot is unreadable,
    /// instead of failing `open`.
    pub rebuild_on_corruption: bool,

    /// Save the snapshot when the handle is closed.
    pub flush_on_close: bool,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            max_traversal_depth: DEFAULT_MAX_TRAVERSAL_DEPTH,
            max_cached_content_size: DEFAULT_MAX_CACHED_CONTENT_SIZE,
            blob_cache_capacity: DEFAULT_BLOB_CACHE_CAPACITY,
            rebuild_on_corruption: true,
            flush_on_close: true,
        }
    }
}

impl VfsConfig {
    /// Small limits for unit and integration tests.
    pub fn for_tests() -> Self {
        Self {
            max_traversal_depth: 64,
            max_cached_content_size: 64 * 1024,
            blob_cache_capacity: 1024 * 1024,
            ..Self::default()
        }
    }

    /// Sets the traversal depth limit.
    #[must_use]
    pub fn max_traversal_depth(mut self, depth: usize) -> Self {
        self.max_traversal_depth = depth;
        self
    }

    /// Sets the content caching ceiling.
    #[must_use]
    pub fn max_cached_content_size(mut self, size: u64) -> Self {
        self.max_cached_content_size = size;
        self
    }

    /// Sets the in-memory blob cache budget.
    #[must_use]
    pub fn blob_cache_capacity(mut self, bytes: u64) -> Self {
        self.blob_cache_capacity = bytes;
        self
    }

    /// Controls recovery from a corrupted snapshot.
    #[must_use]
    pub fn rebuild_on_corruption(mut self, rebuild: bool) -> Self {
        self.rebuild_on_corruption = rebuild;
        self
    }

    /// Controls saving on close.
    #[must_use]
    pub fn flush_on_close(mut self, flush: bool) -> Self {
        self.flush_on_close = flush;
        self
    }
}
