//! In-memory delegate (`mem` protocol) for tests and scratch mirrors.
//!
//! Besides the normal delegate operations it offers "external" edits
//! ([`MemoryFs::add_file`], [`MemoryFs::remove`], ...) that change the tree
//! without going through the mirror, plus failure injection and a listing
//! counter.

use super::{DelegateFs, file_name, parent_path};
use crate::record::FileAttributes;
use crate::url::normalize_path;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use tracing::trace;

const EPOCH_START: i64 = 1_700_000_000_000;

#[derive(Debug, Clone)]
enum MemKind {
    Directory,
    File(Vec<u8>),
}

#[derive(Debug, Clone)]
struct MemEntry {
    /// Path as spelled at creation.
    path: String,
    kind: MemKind,
    writable: bool,
    modified: i64,
}

/// Thread-safe in-memory tree. `/` always exists.
#[derive(Debug)]
pub struct MemoryFs {
    /// Keyed by case-folded normalized path.
    entries: RwLock<BTreeMap<String, MemEntry>>,
    case_sensitive: bool,
    clock: AtomicI64,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    listings: AtomicUsize,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{path} not found"))
}

fn injected(path: &str) -> io::Error {
    io::Error::other(format!("injected failure on {path}"))
}

fn is_within(key: &str, base: &str) -> bool {
    key == base
        || (base == "/" && key.starts_with('/'))
        || (key.starts_with(base) && key.as_bytes().get(base.len()) == Some(&b'/'))
}

impl MemoryFs {
    /// Empty case-sensitive tree.
    pub fn new() -> Self {
        Self::with_case_sensitive(true)
    }

    /// Empty tree with the given case rule.
    pub fn with_case_sensitive(case_sensitive: bool) -> Self {
        let fs = Self {
            entries: RwLock::new(BTreeMap::new()),
            case_sensitive,
            clock: AtomicI64::new(EPOCH_START),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            listings: AtomicUsize::new(0),
        };
        fs.entries.write().insert(
            "/".to_string(),
            MemEntry {
                path: "/".to_string(),
                kind: MemKind::Directory,
                writable: true,
                modified: EPOCH_START,
            },
        );
        fs
    }

    fn key(&self, path: &str) -> String {
        normalize_path(path, self.case_sensitive)
    }

    fn tick(&self) -> i64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn check_writes(&self, path: &str) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected(path));
        }
        Ok(())
    }

    fn check_reads(&self, path: &str) -> io::Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(injected(path));
        }
        Ok(())
    }

    /// Makes every mutating delegate call fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes `read` and `list` fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of `list` calls served so far.
    pub fn list_count(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    /// Creates a directory and any missing ancestors.
    pub fn mkdirs(&self, path: &str) {
        let path = normalize_path(path, true);
        let mut entries = self.entries.write();
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            let key = self.key(&current);
            if !entries.contains_key(&key) {
                let modified = self.tick();
                entries.insert(
                    key,
                    MemEntry {
                        path: current.clone(),
                        kind: MemKind::Directory,
                        writable: true,
                        modified,
                    },
                );
            }
        }
    }

    /// Creates or replaces a file, creating missing ancestors.
    pub fn add_file(&self, path: &str, data: &[u8]) {
        let path = normalize_path(path, true);
        self.mkdirs(parent_path(&path));
        let modified = self.tick();
        self.entries.write().insert(
            self.key(&path),
            MemEntry {
                path,
                kind: MemKind::File(data.to_vec()),
                writable: true,
                modified,
            },
        );
    }

    /// Removes an entry and its descendants without failure injection.
    pub fn remove(&self, path: &str) -> bool {
        let key = self.key(path);
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|k, _| !is_within(k, &key) || k == "/");
        before != entries.len()
    }

    /// Overrides an entry's modification time.
    pub fn set_timestamp(&self, path: &str, millis: i64) -> bool {
        match self.entries.write().get_mut(&self.key(path)) {
            Some(entry) => {
                entry.modified = millis;
                true
            }
            None => false,
        }
    }

    fn relocate(&self, from: &str, to: &str) -> io::Result<()> {
        let from_key = self.key(from);
        let to_key = self.key(to);
        let to_display = normalize_path(to, true);
        let mut entries = self.entries.write();
        if !entries.contains_key(&from_key) {
            return Err(not_found(from));
        }
        if entries.contains_key(&to_key) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{to} already exists"),
            ));
        }
        if is_within(&to_key, &from_key) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot move {from} into itself"),
            ));
        }
        if !entries.contains_key(&self.key(parent_path(&to_display))) {
            return Err(not_found(parent_path(to)));
        }
        let moved: Vec<String> = entries
            .keys()
            .filter(|k| is_within(k, &from_key))
            .cloned()
            .collect();
        for key in moved {
            if let Some(mut entry) = entries.remove(&key) {
                let suffix = entry.path.get(from_key.len()..).unwrap_or_default();
                entry.path = format!("{to_display}{suffix}");
                entries.insert(format!("{to_key}{}", &key[from_key.len()..]), entry);
            }
        }
        Ok(())
    }
}

impl DelegateFs for MemoryFs {
    fn protocol(&self) -> &str {
        "mem"
    }

    fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    fn list(&self, path: &str) -> io::Result<Vec<String>> {
        self.check_reads(path)?;
        self.listings.fetch_add(1, Ordering::SeqCst);
        let key = self.key(path);
        let entries = self.entries.read();
        match entries.get(&key) {
            Some(MemEntry {
                kind: MemKind::Directory,
                ..
            }) => {}
            Some(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("{path} is not a directory"),
                ));
            }
            None => return Err(not_found(path)),
        }
        let names: Vec<String> = entries
            .iter()
            .filter(|(k, _)| k.as_str() != "/" && parent_path(k) == key)
            .map(|(_, e)| file_name(&e.path).to_string())
            .collect();
        trace!(dir = path, count = names.len(), "listed memory directory");
        Ok(names)
    }

    fn attributes(&self, path: &str) -> io::Result<Option<FileAttributes>> {
        let entries = self.entries.read();
        Ok(entries.get(&self.key(path)).map(|e| FileAttributes {
            is_directory: matches!(e.kind, MemKind::Directory),
            is_writable: e.writable,
            is_symlink: false,
            is_special: false,
            is_hidden: file_name(&e.path).starts_with('.'),
            length: match &e.kind {
                MemKind::File(data) => data.len() as u64,
                MemKind::Directory => 0,
            },
            last_modified: e.modified,
        }))
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        self.check_reads(path)?;
        match self.entries.read().get(&self.key(path)) {
            Some(MemEntry {
                kind: MemKind::File(data),
                ..
            }) => Ok(data.clone()),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("{path} is a directory"),
            )),
            None => Err(not_found(path)),
        }
    }

    fn write(&self, path: &str, data: &[u8]) -> io::Result<()> {
        self.check_writes(path)?;
        let modified = self.tick();
        match self.entries.write().get_mut(&self.key(path)) {
            Some(entry) if !entry.writable => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{path} is read-only"),
            )),
            Some(entry) => {
                entry.kind = MemKind::File(data.to_vec());
                entry.modified = modified;
                Ok(())
            }
            None => Err(not_found(path)),
        }
    }

    fn create_file(&self, path: &str) -> io::Result<()> {
        self.check_writes(path)?;
        self.insert_new(path, MemKind::File(Vec::new()))
    }

    fn create_directory(&self, path: &str) -> io::Result<()> {
        self.check_writes(path)?;
        self.insert_new(path, MemKind::Directory)
    }

    fn delete(&self, path: &str) -> io::Result<()> {
        self.check_writes(path)?;
        if self.remove(path) {
            Ok(())
        } else {
            Err(not_found(path))
        }
    }

    fn rename(&self, path: &str, new_name: &str) -> io::Result<()> {
        self.check_writes(path)?;
        let target = self.join(parent_path(path), new_name);
        self.relocate(path, &target)
    }

    fn move_to(&self, path: &str, new_parent: &str) -> io::Result<()> {
        self.check_writes(path)?;
        let target = self.join(new_parent, file_name(path));
        self.relocate(path, &target)
    }

    fn copy(&self, path: &str, new_parent: &str, new_name: &str) -> io::Result<()> {
        self.check_writes(path)?;
        let from_key = self.key(path);
        let target = normalize_path(&self.join(new_parent, new_name), true);
        let to_key = self.key(&target);
        let mut entries = self.entries.write();
        if !entries.contains_key(&from_key) {
            return Err(not_found(path));
        }
        if entries.contains_key(&to_key) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{target} already exists"),
            ));
        }
        if !entries.contains_key(&self.key(new_parent)) {
            return Err(not_found(new_parent));
        }
        let copies: Vec<(String, MemEntry)> = entries
            .iter()
            .filter(|(k, _)| is_within(k, &from_key))
            .map(|(k, e)| {
                let mut entry = e.clone();
                let suffix = &k[from_key.len()..];
                entry.path = format!("{target}{}", e.path.get(from_key.len()..).unwrap_or_default());
                entry.modified = self.tick();
                (format!("{to_key}{suffix}"), entry)
            })
            .collect();
        entries.extend(copies);
        Ok(())
    }

    fn set_writable(&self, path: &str, writable: bool) -> io::Result<()> {
        self.check_writes(path)?;
        match self.entries.write().get_mut(&self.key(path)) {
            Some(entry) => {
                entry.writable = writable;
                Ok(())
            }
            None => Err(not_found(path)),
        }
    }
}

impl MemoryFs {
    fn insert_new(&self, path: &str, kind: MemKind) -> io::Result<()> {
        let display = normalize_path(path, true);
        let key = self.key(&display);
        let modified = self.tick();
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{path} already exists"),
            ));
        }
        match entries.get(&self.key(parent_path(&display))) {
            Some(MemEntry {
                kind: MemKind::Directory,
                ..
            }) => {}
            _ => return Err(not_found(parent_path(path))),
        }
        entries.insert(
            key,
            MemEntry {
                path: display,
                kind,
                writable: true,
                modified,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_and_listing() {
        let fs = MemoryFs::new();
        fs.add_file("/proj/src/A.java", &[0u8; 120]);
        fs.mkdirs("/proj/lib");

        assert_eq!(fs.list("/proj").unwrap(), vec!["lib", "src"]);
        assert_eq!(fs.list("/proj/src").unwrap(), vec!["A.java"]);
        assert_eq!(fs.list_count(), 2);

        let attrs = fs.attributes("/proj/src/A.java").unwrap().unwrap();
        assert_eq!(attrs.length, 120);
        assert!(!attrs.is_directory);
        assert!(fs.attributes("/nope").unwrap().is_none());
        assert_eq!(fs.list("/").unwrap(), vec!["proj"]);
    }

    #[test]
    fn test_relocate_moves_subtree() {
        let fs = MemoryFs::new();
        fs.add_file("/proj/src/A.java", b"class A {}");
        fs.move_to("/proj/src/A.java", "/proj").unwrap();
        assert_eq!(fs.read("/proj/A.java").unwrap(), b"class A {}");

        fs.rename("/proj/src", "main").unwrap();
        assert!(fs.attributes("/proj/main").unwrap().unwrap().is_directory);
        assert!(fs.attributes("/proj/src").unwrap().is_none());
    }

    #[test]
    fn test_copy_subtree() {
        let fs = MemoryFs::new();
        fs.add_file("/a/x/1.txt", b"1");
        fs.mkdirs("/b");
        fs.copy("/a/x", "/b", "y").unwrap();
        assert_eq!(fs.read("/b/y/1.txt").unwrap(), b"1");
        assert_eq!(fs.read("/a/x/1.txt").unwrap(), b"1");
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let fs = MemoryFs::with_case_sensitive(false);
        fs.add_file("/Proj/ReadMe.md", b"#");
        assert!(fs.attributes("/proj/README.MD").unwrap().is_some());
        assert_eq!(fs.list("/PROJ").unwrap(), vec!["ReadMe.md"]);
    }

    #[test]
    fn test_failure_injection() {
        let fs = MemoryFs::new();
        fs.add_file("/f", b"x");
        fs.fail_writes(true);
        assert!(fs.write("/f", b"y").is_err());
        assert!(fs.create_directory("/d").is_err());
        fs.fail_writes(false);
        fs.fail_reads(true);
        assert!(fs.read("/f").is_err());
        assert!(fs.list("/").is_err());
    }

    #[test]
    fn test_create_requires_parent() {
        let fs = MemoryFs::new();
        let err = fs.create_file("/missing/f").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        fs.create_directory("/d").unwrap();
        fs.create_file("/d/f").unwrap();
        assert!(fs.create_file("/d/f").is_err());
    }

    #[test]
    fn test_remove_root_keeps_root() {
        let fs = MemoryFs::new();
        fs.add_file("/a", b"");
        assert!(fs.remove("/"));
        assert!(fs.attributes("/").unwrap().is_some());
        assert!(fs.list("/").unwrap().is_empty());
    }
}
