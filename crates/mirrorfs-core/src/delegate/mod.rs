//! Delegate filesystems.
//!
//! A delegate is the real filesystem behind one protocol. The mirror never
//! assumes existence: every record is created only after a successful
//! [`DelegateFs::attributes`] probe.
//!
//! Delegate paths are plain strings in the delegate's own syntax (for
//! archives, `<archive>!/<entry>`). All operations are synchronous and may
//! block on real I/O.

mod archive;
mod local;
mod memory;

pub use archive::ArchiveFs;
pub use local::LocalFs;
pub use memory::MemoryFs;

use crate::record::FileAttributes;
use crate::url;
use std::io;

/// Capability interface of a real filesystem.
pub trait DelegateFs: Send + Sync {
    /// URL scheme this delegate serves (`file`, `zip`, `mem`).
    fn protocol(&self) -> &str;

    /// Whether names differing only by case are distinct.
    fn is_case_sensitive(&self) -> bool;

    /// Whether every mutating call fails.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Whether fetched content may be written back into the blob store.
    fn caches_content(&self) -> bool {
        true
    }

    /// Canonical form of a path for root keys.
    fn normalize_path(&self, path: &str) -> String {
        url::normalize_path(path, self.is_case_sensitive())
    }

    /// Path of child `name` under directory `parent`.
    fn join(&self, parent: &str, name: &str) -> String {
        if parent.ends_with('/') {
            format!("{parent}{name}")
        } else {
            format!("{parent}/{name}")
        }
    }

    /// Names of the entries in a directory.
    fn list(&self, path: &str) -> io::Result<Vec<String>>;

    /// Attributes, or `None` if nothing exists at `path`.
    fn attributes(&self, path: &str) -> io::Result<Option<FileAttributes>>;

    /// Whole-file read.
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;

    /// Whole-file replace.
    fn write(&self, path: &str, data: &[u8]) -> io::Result<()>;

    /// Creates an empty file. Fails if something already exists.
    fn create_file(&self, path: &str) -> io::Result<()>;

    /// Creates a directory. Fails if something already exists.
    fn create_directory(&self, path: &str) -> io::Result<()>;

    /// Deletes a file or a whole directory tree.
    fn delete(&self, path: &str) -> io::Result<()>;

    /// Renames in place.
    fn rename(&self, path: &str, new_name: &str) -> io::Result<()>;

    /// Moves under another directory, keeping the name.
    fn move_to(&self, path: &str, new_parent: &str) -> io::Result<()>;

    /// Copies (recursively for directories) to `new_parent/new_name`.
    fn copy(&self, path: &str, new_parent: &str, new_name: &str) -> io::Result<()>;

    /// Flips the writable bit.
    fn set_writable(&self, path: &str, writable: bool) -> io::Result<()>;
}

/// Last path segment.
pub(crate) fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit_once('/').map_or(trimmed, |(_, name)| name)
}

/// Everything before the last segment, `/` for top-level entries.
pub(crate) fn parent_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => "",
    }
}

/// Error for mutations attempted on a read-only delegate.
pub(crate) fn read_only_error(path: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::ReadOnlyFilesystem,
        format!("{path} is on a read-only filesystem"),
    )
}
