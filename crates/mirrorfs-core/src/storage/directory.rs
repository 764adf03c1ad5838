//! Directory-backed storage.
//!
//! Layout:
//!
//! ```text
//! <root>/
//! ├── records.json      record table snapshot
//! └── blobs/
//!     └── <id>.bin      one file per content blob
//! ```
//!
//! Every write goes to a temporary file in the same directory and is then
//! persisted over the target, so a crash leaves either the old or the new
//! version, never a torn one.

use super::{Snapshot, Storage};
use crate::error::StorageError;
use crate::record::ContentId;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

const SNAPSHOT_FILE: &str = "records.json";
const BLOB_DIR: &str = "blobs";

/// Storage rooted at a directory on local disk.
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    root: PathBuf,
}

impl DirectoryStorage {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(root.join(BLOB_DIR))
            .map_err(|e| StorageError::io(format!("creating {}", root.display()), e))?;
        debug!(root = %root.display(), "opened directory storage");
        Ok(Self { root })
    }

    /// Store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot_path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    fn blob_path(&self, id: ContentId) -> PathBuf {
        self.root.join(BLOB_DIR).join(format!("{}.bin", id.as_u32()))
    }

    fn write_atomic(&self, target: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let dir = target.parent().unwrap_or(&self.root);
        let context = || format!("writing {}", target.display());
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StorageError::io(context(), e))?;
        tmp.write_all(bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| StorageError::io(context(), e))?;
        tmp.persist(target)
            .map_err(|e| StorageError::io(context(), e.error))?;
        Ok(())
    }
}

impl Storage for DirectoryStorage {
    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
        let path = self.snapshot_path();
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(format!("reading {}", path.display()), e)),
        }
    }

    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(snapshot)?;
        self.write_atomic(&self.snapshot_path(), &bytes)?;
        debug!(records = snapshot.records.len(), "saved snapshot");
        Ok(())
    }

    fn load_blob(&self, id: ContentId) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.blob_path(id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(format!("reading {}", path.display()), e)),
        }
    }

    fn save_blob(&self, id: ContentId, bytes: &[u8]) -> Result<(), StorageError> {
        trace!(%id, len = bytes.len(), "saving blob");
        self.write_atomic(&self.blob_path(id), bytes)
    }

    fn delete_blob(&self, id: ContentId) -> Result<(), StorageError> {
        let path = self.blob_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(format!("removing {}", path.display()), e)),
        }
    }

    fn wipe(&self) -> Result<(), StorageError> {
        let blobs = self.root.join(BLOB_DIR);
        if blobs.exists() {
            fs::remove_dir_all(&blobs)
                .map_err(|e| StorageError::io(format!("removing {}", blobs.display()), e))?;
        }
        fs::create_dir_all(&blobs)
            .map_err(|e| StorageError::io(format!("creating {}", blobs.display()), e))?;
        match fs::remove_file(self.snapshot_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io("removing snapshot", e)),
        }
    }
}
