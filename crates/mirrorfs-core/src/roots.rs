//! In-memory registry of root records.
//!
//! Roots are indexed both by normalized URL and by id. Only roots confirmed
//! by a delegate probe in this session are registered. The registry has its
//! own `RwLock`, separate from the write permit and from the content lock,
//! and it is never held while a delegate is probed. Root resolution
//! (`PersistentFs::find_root`) can therefore recurse (an archive root first
//! resolves its host file on the local delegate) without deadlocking.
//!
//! The synthetic super-root is [`FileId::NONE`]. It is never stored here and
//! never returned from an id lookup.

use crate::record::FileId;
use crate::url::RootUrl;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A registered root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootInfo {
    /// Root record id.
    pub id: FileId,
    /// Normalized URL.
    pub url: RootUrl,
    /// For archive roots, the record of the archive file on the local
    /// delegate, when it could be resolved.
    pub host: Option<FileId>,
}

#[derive(Debug, Default)]
struct RootMaps {
    by_url: HashMap<String, Arc<RootInfo>>,
    by_id: HashMap<FileId, Arc<RootInfo>>,
}

/// URL and id index over root records.
#[derive(Debug, Default)]
pub struct RootRegistry {
    maps: RwLock<RootMaps>,
}

impl RootRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Root registered under a normalized URL.
    pub fn get_by_url(&self, url: &str) -> Option<Arc<RootInfo>> {
        self.maps.read().by_url.get(url).cloned()
    }

    /// Root by id. Never returns the super-root.
    pub fn root_by_id(&self, id: FileId) -> Option<Arc<RootInfo>> {
        if id.is_none() {
            return None;
        }
        self.maps.read().by_id.get(&id).cloned()
    }

    /// True if `id` is a registered root.
    pub fn is_root(&self, id: FileId) -> bool {
        !id.is_none() && self.maps.read().by_id.contains_key(&id)
    }

    /// Registers a root. If the URL is already taken, the existing entry
    /// wins and is returned.
    pub fn insert(&self, info: RootInfo) -> Arc<RootInfo> {
        let key = info.url.to_string();
        let mut maps = self.maps.write();
        if let Some(existing) = maps.by_url.get(&key) {
            return Arc::clone(existing);
        }
        let info = Arc::new(info);
        maps.by_id.insert(info.id, Arc::clone(&info));
        maps.by_url.insert(key, Arc::clone(&info));
        debug!(id = %info.id, url = %info.url, "registered root");
        info
    }

    /// Removes a root from both indexes.
    pub fn unregister(&self, id: FileId) -> Option<Arc<RootInfo>> {
        let mut maps = self.maps.write();
        let info = maps.by_id.remove(&id)?;
        maps.by_url.remove(&info.url.to_string());
        debug!(%id, url = %info.url, "unregistered root");
        Some(info)
    }

    /// All registered roots, ordered by URL.
    pub fn roots(&self) -> Vec<Arc<RootInfo>> {
        let mut roots: Vec<_> = self.maps.read().by_id.values().cloned().collect();
        roots.sort_by(|a, b| a.url.cmp(&b.url));
        roots
    }

    /// Forgets every registration. Roots register again on their next
    /// `PersistentFs::find_root`.
    pub fn clear(&self) {
        let mut maps = self.maps.write();
        maps.by_id.clear();
        maps.by_url.clear();
    }

    /// Number of registered roots.
    pub fn len(&self) -> usize {
        self.maps.read().by_id.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
