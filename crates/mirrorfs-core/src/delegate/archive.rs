//! Zip archive delegate (`zip` protocol).
//!
//! Paths look like `/lib/deps.zip!/com/example/A.class`: the local archive
//! file, the `!/` separator, then the entry path. The archive root itself is
//! `/lib/deps.zip!/`. Archives are read-only and their content is never
//! written back into the blob store, since the archive already is a local
//! copy.
//!
//! The central directory of each archive is indexed once and kept until the
//! archive file's length or modification time changes.

use super::{DelegateFs, read_only_error};
use crate::record::FileAttributes;
use crate::url::split_archive_path;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::debug;
use zip::ZipArchive;

#[derive(Debug, Clone, Copy)]
struct ArchiveEntry {
    is_directory: bool,
    length: u64,
}

#[derive(Debug)]
struct ArchiveIndex {
    archive_len: u64,
    modified: i64,
    /// Entry path (no leading or trailing slash) to entry. `""` is the root.
    entries: BTreeMap<String, ArchiveEntry>,
}

/// Read-only delegate over zip files on local disk.
#[derive(Debug, Default)]
pub struct ArchiveFs {
    indexes: DashMap<String, Arc<ArchiveIndex>>,
}

fn split(path: &str) -> io::Result<(&str, &str)> {
    split_archive_path(path)
        .map(|(local, entry)| (local, entry.trim_matches('/')))
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{path} is not an archive path"),
            )
        })
}

fn entry_parent(entry: &str) -> &str {
    entry.rsplit_once('/').map_or("", |(parent, _)| parent)
}

fn entry_name(entry: &str) -> &str {
    entry.rsplit_once('/').map_or(entry, |(_, name)| name)
}

fn zip_error(e: zip::result::ZipError) -> io::Error {
    io::Error::other(e)
}

impl ArchiveFs {
    /// Creates a delegate with an empty index cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index for `local`, `None` if the archive file does not exist.
    fn index(&self, local: &str) -> io::Result<Option<Arc<ArchiveIndex>>> {
        let metadata = match fs::metadata(local) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .and_then(|d| i64::try_from(d.as_millis()).ok())
            .unwrap_or(0);

        if let Some(index) = self.indexes.get(local)
            && index.archive_len == metadata.len()
            && index.modified == modified
        {
            return Ok(Some(Arc::clone(&index)));
        }

        let mut archive = ZipArchive::new(File::open(local)?).map_err(zip_error)?;
        let mut entries = BTreeMap::new();
        entries.insert(
            String::new(),
            ArchiveEntry {
                is_directory: true,
                length: 0,
            },
        );
        for i in 0..archive.len() {
            let file = archive.by_index(i).map_err(zip_error)?;
            let name = file.name().trim_matches('/').to_string();
            if name.is_empty() {
                continue;
            }
            // Implied parent directories.
            let mut parent = entry_parent(&name);
            while !parent.is_empty() {
                entries.entry(parent.to_string()).or_insert(ArchiveEntry {
                    is_directory: true,
                    length: 0,
                });
                parent = entry_parent(parent);
            }
            entries.insert(
                name,
                ArchiveEntry {
                    is_directory: file.is_dir(),
                    length: if file.is_dir() { 0 } else { file.size() },
                },
            );
        }
        debug!(archive = local, entries = entries.len(), "indexed archive");

        let index = Arc::new(ArchiveIndex {
            archive_len: metadata.len(),
            modified,
            entries,
        });
        self.indexes.insert(local.to_string(), Arc::clone(&index));
        Ok(Some(index))
    }
}

impl DelegateFs for ArchiveFs {
    fn protocol(&self) -> &str {
        "zip"
    }

    fn is_case_sensitive(&self) -> bool {
        true
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn caches_content(&self) -> bool {
        false
    }

    fn list(&self, path: &str) -> io::Result<Vec<String>> {
        let (local, entry) = split(path)?;
        let index = self.index(local)?.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{local} not found"))
        })?;
        match index.entries.get(entry) {
            Some(e) if e.is_directory => {}
            Some(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("{path} is not a directory"),
                ));
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{path} not found"),
                ));
            }
        }
        Ok(index
            .entries
            .keys()
            .filter(|k| !k.is_empty() && entry_parent(k) == entry)
            .map(|k| entry_name(k).to_string())
            .collect())
    }

    fn attributes(&self, path: &str) -> io::Result<Option<FileAttributes>> {
        let (local, entry) = split(path)?;
        let Some(index) = self.index(local)? else {
            return Ok(None);
        };
        Ok(index.entries.get(entry).map(|e| FileAttributes {
            is_directory: e.is_directory,
            is_writable: false,
            length: e.length,
            last_modified: index.modified,
            ..FileAttributes::default()
        }))
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let (local, entry) = split(path)?;
        let mut archive = ZipArchive::new(File::open(local)?).map_err(zip_error)?;
        let mut file = archive.by_name(entry).map_err(zip_error)?;
        let mut bytes = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn write(&self, path: &str, _data: &[u8]) -> io::Result<()> {
        Err(read_only_error(path))
    }

    fn create_file(&self, path: &str) -> io::Result<()> {
        Err(read_only_error(path))
    }

    fn create_directory(&self, path: &str) -> io::Result<()> {
        Err(read_only_error(path))
    }

    fn delete(&self, path: &str) -> io::Result<()> {
        Err(read_only_error(path))
    }

    fn rename(&self, path: &str, _new_name: &str) -> io::Result<()> {
        Err(read_only_error(path))
    }

    fn move_to(&self, path: &str, _new_parent: &str) -> io::Result<()> {
        Err(read_only_error(path))
    }

    fn copy(&self, path: &str, _new_parent: &str, _new_name: &str) -> io::Result<()> {
        Err(read_only_error(path))
    }

    fn set_writable(&self, path: &str, _writable: bool) -> io::Result<()> {
        Err(read_only_error(path))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    /// Writes a small archive: `readme.txt`, `com/example/A.class`, `empty/`.
    pub(crate) fn write_sample_zip(path: &Path) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        zip.start_file("readme.txt", options).unwrap();
        zip.write_all(b"read me").unwrap();
        zip.start_file("com/example/A.class", options).unwrap();
        zip.write_all(b"\xCA\xFE\xBA\xBE").unwrap();
        zip.add_directory("empty/", options).unwrap();
        zip.finish().unwrap();
    }

    fn sample() -> (TempDir, String) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deps.zip");
        write_sample_zip(&path);
        let local = path.to_string_lossy().replace('\\', "/");
        (dir, local)
    }

    #[test]
    fn test_root_and_listing() {
        let (_dir, local) = sample();
        let fs = ArchiveFs::new();
        let root = format!("{local}!/");

        let attrs = fs.attributes(&root).unwrap().unwrap();
        assert!(attrs.is_directory);
        assert!(!attrs.is_writable);

        assert_eq!(fs.list(&root).unwrap(), vec!["com", "empty", "readme.txt"]);
        assert_eq!(fs.list(&fs.join(&root, "com")).unwrap(), vec!["example"]);
        assert_eq!(fs.list(&format!("{local}!/com/example")).unwrap(), vec!["A.class"]);
    }

    #[test]
    fn test_read_entry() {
        let (_dir, local) = sample();
        let fs = ArchiveFs::new();
        assert_eq!(fs.read(&format!("{local}!/readme.txt")).unwrap(), b"read me");
        let attrs = fs
            .attributes(&format!("{local}!/com/example/A.class"))
            .unwrap()
            .unwrap();
        assert_eq!(attrs.length, 4);
    }

    #[test]
    fn test_missing_archive_and_entry() {
        let (_dir, local) = sample();
        let fs = ArchiveFs::new();
        assert!(fs.attributes("/no/such.zip!/").unwrap().is_none());
        assert!(fs.attributes(&format!("{local}!/nope")).unwrap().is_none());
        assert!(fs.attributes("/not/an/archive").is_err());
    }

    #[test]
    fn test_is_read_only() {
        let (_dir, local) = sample();
        let fs = ArchiveFs::new();
        let err = fs.write(&format!("{local}!/readme.txt"), b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ReadOnlyFilesystem);
        assert!(!fs.caches_content());
    }
}
