//! Root resolution and path/URL mapping.

use super::PersistentFs;
use crate::delegate::DelegateFs;
use crate::error::{VfsError, VfsResult};
use crate::record::{FileAttributes, FileFlags, FileId};
use crate::roots::RootInfo;
use crate::url::{self, ARCHIVE_SEPARATOR, RootUrl, split_archive_path};
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn covers(root: &str, path: &str) -> bool {
    path == root
        || (root == "/" && path.starts_with('/'))
        || (path.starts_with(root) && path.as_bytes().get(root.len()) == Some(&b'/'))
}

impl PersistentFs {
    /// Resolves (or creates) the root for `path` on the delegate serving
    /// `protocol`.
    ///
    /// Lookup order: roots already confirmed in this session, then the
    /// persisted root table, then a delegate probe. A new root is created only if the delegate
    /// confirms a directory at `path`. Archive roots first resolve their
    /// host file on the `file` delegate.
    ///
    /// Returns `Ok(None)` when the delegate does not confirm the root.
    #[instrument(level = "debug", skip(self))]
    pub fn find_root(&self, protocol: &str, path: &str) -> VfsResult<Option<FileId>> {
        let fs = self.delegate(protocol)?;
        let url = RootUrl::new(protocol, path, fs.is_case_sensitive());
        let key = url.to_string();

        if let Some(info) = self.roots.get_by_url(&key) {
            if self.store.is_valid(info.id) {
                trace!(url = %key, id = %info.id, "root registry hit");
                return Ok(Some(info.id));
            }
            warn!(url = %key, id = %info.id, "registered root lost its record");
            self.roots.unregister(info.id);
        }

        // Host resolution may recurse into find_root, so it runs before any
        // lock is taken.
        let host = if url.is_archive() {
            self.resolve_archive_host(url.path())?
        } else {
            None
        };
        let probe = fs
            .attributes(url.path())
            .map_err(|e| VfsError::delegate(url.path(), e))?;

        let _creating = self.root_lock.lock();
        if let Some(info) = self.roots.get_by_url(&key)
            && self.store.is_valid(info.id)
        {
            return Ok(Some(info.id));
        }
        if let Some(id) = self.store.root_id(&key).filter(|id| self.store.is_valid(*id)) {
            return Ok(self.revive_root(id, url, host, probe));
        }

        let Some(attrs) = probe.filter(|a| a.is_directory) else {
            debug!(url = %key, "delegate does not confirm a directory, no root");
            return Ok(None);
        };
        let id = self
            .store
            .allocate(FileId::NONE, self.names.intern(url.path()), &attrs);
        self.store.register_root(&key, id);
        let info = self.roots.insert(RootInfo { id, url, host });
        debug!(url = %key, id = %info.id, "created root");
        Ok(Some(info.id))
    }

    /// Re-registers a persisted root after checking it against a fresh
    /// probe.
    fn revive_root(
        &self,
        id: FileId,
        url: RootUrl,
        host: Option<FileId>,
        probe: Option<FileAttributes>,
    ) -> Option<FileId> {
        let Some(attrs) = probe.filter(|a| a.is_directory) else {
            warn!(url = %url, %id, "persisted root is gone from its delegate, dropping it");
            self.free_subtree(id);
            return None;
        };
        if self.store.timestamp(id) != Some(attrs.last_modified) {
            self.store.set_flags(id, FileFlags::DIRTY, true);
            self.store.set_flags(id, FileFlags::CHILDREN_CACHED, false);
            debug!(url = %url, %id, "root changed while not mirrored, marked dirty");
        }
        self.store.update_attributes(id, &attrs);
        Some(self.roots.insert(RootInfo { id, url, host }).id)
    }

    fn resolve_archive_host(&self, archive_path: &str) -> VfsResult<Option<FileId>> {
        let Some((local, _)) = split_archive_path(archive_path) else {
            return Ok(None);
        };
        if self.filesystem("file").is_none() {
            return Ok(None);
        }
        let host = self.find_file_by_path(&format!("file://{local}"))?;
        Ok(host.filter(|h| !self.is_directory(*h)))
    }

    /// Resolves a full URL (`protocol://path`) to a record, creating
    /// records along the way after delegate probes.
    ///
    /// The root is the longest persisted root covering the path, or the
    /// delegate's top directory when none does. Archive URLs are rooted at
    /// their `!/`.
    #[instrument(level = "debug", skip(self))]
    pub fn find_file_by_path(&self, url: &str) -> VfsResult<Option<FileId>> {
        let (protocol, path) =
            RootUrl::split(url).ok_or_else(|| VfsError::NoSuchRoot(url.to_string()))?;
        let fs = self.delegate(protocol)?;
        let spelled = url::normalize_path(path, true);

        let (root_path, rest): (String, Vec<&str>) = match split_archive_path(&spelled) {
            Some((local, entry)) => (format!("{local}{ARCHIVE_SEPARATOR}"), segments(entry).collect()),
            None => {
                let root = self.covering_root(protocol, fs.as_ref(), &spelled);
                let skip = segments(&root).count();
                (root, segments(&spelled).skip(skip).collect())
            }
        };

        let Some(mut current) = self.find_root(protocol, &root_path)? else {
            return Ok(None);
        };
        for name in rest {
            match self.find_child(current, name)? {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    fn covering_root(&self, protocol: &str, fs: &dyn DelegateFs, spelled: &str) -> String {
        let folded = fs.normalize_path(spelled);
        let prefix = format!("{protocol}://");
        let best = self
            .store
            .root_urls()
            .into_iter()
            .filter_map(|(url, _)| url.strip_prefix(&prefix).map(str::to_string))
            .filter(|root| !root.ends_with(ARCHIVE_SEPARATOR) && covers(root, &folded))
            .max_by_key(String::len);
        match best {
            Some(root) => root,
            None if spelled.starts_with('/') || spelled.is_empty() => "/".to_string(),
            None => segments(spelled).next().unwrap_or_default().to_string(),
        }
    }

    /// Root info for a root id.
    ///
    /// Roots not yet confirmed in this session are rebuilt from the
    /// persisted root table without being registered: only `find_root`
    /// registers, and only after a delegate probe.
    pub(super) fn root_info(&self, id: FileId) -> Option<Arc<RootInfo>> {
        if let Some(info) = self.roots.root_by_id(id) {
            return Some(info);
        }
        let (url, _) = self
            .store
            .root_urls()
            .into_iter()
            .find(|(_, root)| *root == id)?;
        let (protocol, path) = RootUrl::split(&url)?;
        let case_sensitive = self
            .filesystem(protocol)
            .is_none_or(|fs| fs.is_case_sensitive());
        Some(Arc::new(RootInfo {
            id,
            url: RootUrl::new(protocol, path, case_sensitive),
            host: None,
        }))
    }

    /// Every root, persisted ones included, ordered by URL.
    pub fn roots(&self) -> Vec<Arc<RootInfo>> {
        let mut roots = self.roots.roots();
        for (_, id) in self.store.root_urls() {
            if !self.roots.is_root(id)
                && let Some(info) = self.root_info(id)
            {
                roots.push(info);
            }
        }
        roots.sort_by(|a, b| a.url.cmp(&b.url));
        roots
    }

    /// Ids of the super-root's children.
    pub fn super_root_children(&self) -> Vec<FileId> {
        self.roots().iter().map(|r| r.id).collect()
    }

    /// True if `id` is a root record.
    pub fn is_root(&self, id: FileId) -> bool {
        self.is_root_id(id)
    }

    /// Root record above `id` (itself for roots).
    pub fn root_of(&self, id: FileId) -> Option<FileId> {
        let mut current = id;
        for _ in 0..=self.config.max_traversal_depth {
            let record = self.store.record(current)?;
            if record.is_root() {
                return Some(current);
            }
            current = record.parent_id;
        }
        warn!(%id, "parent chain exceeds traversal limit");
        None
    }

    fn root_path(&self, info: &RootInfo) -> String {
        if let Some(host) = info.host
            && let Some(host_path) = self.path_of(host)
        {
            return format!("{host_path}{ARCHIVE_SEPARATOR}");
        }
        info.url.path().to_string()
    }

    /// Delegate serving `id` and the path of `id` on it.
    pub(super) fn delegate_path(&self, id: FileId) -> VfsResult<(Arc<dyn DelegateFs>, String)> {
        let mut names: Vec<Arc<str>> = Vec::new();
        let mut current = id;
        for _ in 0..=self.config.max_traversal_depth {
            let record = self.store.record(current).ok_or(VfsError::InvalidFile(current))?;
            if record.is_root() {
                let info = self.root_info(current).ok_or_else(|| {
                    warn!(%id, root = %current, "parent chain ends at an unregistered root");
                    VfsError::Inconsistent(format!("{current} is not a registered root"))
                })?;
                let fs = self.delegate(info.url.protocol())?;
                let mut path = self.root_path(&info);
                for name in names.iter().rev() {
                    path = fs.join(&path, name);
                }
                return Ok((fs, path));
            }
            names.push(
                self.names
                    .name(record.name_id)
                    .ok_or_else(|| VfsError::Inconsistent(format!("{current} has no name")))?,
            );
            current = record.parent_id;
        }
        warn!(%id, "parent chain exceeds traversal limit");
        Err(VfsError::Inconsistent(format!(
            "parent chain of {id} exceeds the traversal limit"
        )))
    }

    /// Delegate path of `id`.
    pub fn path_of(&self, id: FileId) -> Option<String> {
        self.delegate_path(id).ok().map(|(_, path)| path)
    }

    /// Full URL of `id`.
    pub fn url_of(&self, id: FileId) -> Option<String> {
        let (fs, path) = self.delegate_path(id).ok()?;
        Some(format!("{}://{path}", fs.protocol()))
    }

    /// Delegate serving `id`.
    pub fn file_system_of(&self, id: FileId) -> Option<Arc<dyn DelegateFs>> {
        let root = self.root_of(id)?;
        let info = self.root_info(root)?;
        self.filesystem(info.url.protocol())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::open_mem;
    use super::*;

    #[test]
    fn test_root_requires_confirmed_directory() {
        let (vfs, mem, _) = open_mem();
        assert_eq!(vfs.find_root("mem", "/proj").unwrap(), None);
        mem.add_file("/file.txt", b"x");
        assert_eq!(vfs.find_root("mem", "/file.txt").unwrap(), None);

        mem.mkdirs("/proj");
        let root = vfs.find_root("mem", "/proj/").unwrap().unwrap();
        assert_eq!(vfs.find_root("mem", "/proj//").unwrap(), Some(root));
        assert!(vfs.is_root(root));
        assert_eq!(vfs.name(root).as_deref(), Some("/proj"));
        assert_eq!(vfs.url_of(root).unwrap(), "mem:///proj");
        assert_eq!(vfs.super_root_children(), vec![root]);
    }

    #[test]
    fn test_unknown_protocol() {
        let (vfs, _, _) = open_mem();
        assert!(matches!(
            vfs.find_root("ftp", "/x"),
            Err(VfsError::UnknownProtocol(_))
        ));
    }

    #[test]
    fn test_find_file_by_path_uses_covering_root() {
        let (vfs, mem, _) = open_mem();
        mem.add_file("/proj/src/A.java", b"class A {}");
        let root = vfs.find_root("mem", "/proj").unwrap().unwrap();

        let file = vfs.find_file_by_path("mem:///proj/src/A.java").unwrap().unwrap();
        assert_eq!(vfs.root_of(file), Some(root));
        assert_eq!(vfs.path_of(file).unwrap(), "/proj/src/A.java");
        assert_eq!(vfs.name(file).as_deref(), Some("A.java"));
        assert!(vfs.find_file_by_path("mem:///proj/src/B.java").unwrap().is_none());
        assert_eq!(vfs.roots().len(), 1);
    }

    #[test]
    fn test_find_file_by_path_without_root_uses_top() {
        let (vfs, mem, _) = open_mem();
        mem.add_file("/a/b.txt", b"b");
        let file = vfs.find_file_by_path("mem:///a/b.txt").unwrap().unwrap();
        let root = vfs.root_of(file).unwrap();
        assert_eq!(vfs.url_of(root).unwrap(), "mem:///");
        assert_eq!(vfs.url_of(file).unwrap(), "mem:///a/b.txt");
    }
}
