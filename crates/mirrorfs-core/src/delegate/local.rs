//! Local disk delegate (`file` protocol).

use super::{DelegateFs, file_name, parent_path};
use crate::record::FileAttributes;
use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::{trace, warn};

/// Delegate over `std::fs`.
#[derive(Debug, Clone)]
pub struct LocalFs {
    case_sensitive: bool,
}

impl Default for LocalFs {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFs {
    /// Delegate with the platform's case rule.
    pub fn new() -> Self {
        Self {
            case_sensitive: !cfg!(any(target_os = "macos", windows)),
        }
    }

    /// Overrides the case rule.
    #[must_use]
    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }
}

fn millis(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| i64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

fn copy_recursive(from: &Path, to: &Path) -> io::Result<()> {
    if fs::symlink_metadata(from)?.is_dir() {
        fs::create_dir(to)?;
        for entry in fs::read_dir(from)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        fs::copy(from, to).map(|_| ())
    }
}

fn refuse_existing(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path).is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", path.display()),
        ));
    }
    Ok(())
}

impl DelegateFs for LocalFs {
    fn protocol(&self) -> &str {
        "file"
    }

    fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    fn list(&self, path: &str) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => warn!(dir = path, name = ?raw, "skipping non-UTF-8 file name"),
            }
        }
        names.sort();
        trace!(dir = path, count = names.len(), "listed local directory");
        Ok(names)
    }

    fn attributes(&self, path: &str) -> io::Result<Option<FileAttributes>> {
        let link = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let is_symlink = link.file_type().is_symlink();
        // Symlinks report their target's kind when it resolves.
        let metadata = if is_symlink {
            fs::metadata(path).unwrap_or(link)
        } else {
            link
        };
        let file_type = metadata.file_type();
        Ok(Some(FileAttributes {
            is_directory: file_type.is_dir(),
            is_writable: !metadata.permissions().readonly(),
            is_symlink,
            is_special: !file_type.is_dir() && !file_type.is_file() && !file_type.is_symlink(),
            is_hidden: file_name(path).starts_with('.'),
            length: if file_type.is_dir() { 0 } else { metadata.len() },
            last_modified: millis(&metadata),
        }))
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &str, data: &[u8]) -> io::Result<()> {
        fs::write(path, data)
    }

    fn create_file(&self, path: &str) -> io::Result<()> {
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map(|_| ())
    }

    fn create_directory(&self, path: &str) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn delete(&self, path: &str) -> io::Result<()> {
        if fs::symlink_metadata(path)?.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn rename(&self, path: &str, new_name: &str) -> io::Result<()> {
        let target = Path::new(parent_path(path)).join(new_name);
        refuse_existing(&target)?;
        fs::rename(path, target)
    }

    fn move_to(&self, path: &str, new_parent: &str) -> io::Result<()> {
        let target = Path::new(new_parent).join(file_name(path));
        refuse_existing(&target)?;
        fs::rename(path, target)
    }

    fn copy(&self, path: &str, new_parent: &str, new_name: &str) -> io::Result<()> {
        let target = Path::new(new_parent).join(new_name);
        refuse_existing(&target)?;
        copy_recursive(Path::new(path), &target)
    }

    fn set_writable(&self, path: &str, writable: bool) -> io::Result<()> {
        let mut permissions = fs::metadata(path)?.permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(!writable);
        fs::set_permissions(path, permissions)
    }
}
