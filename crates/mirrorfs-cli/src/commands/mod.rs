pub mod cat;
pub mod info;
pub mod ls;
pub mod roots;
pub mod scan;
pub mod stat;

use std::path::{self, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use mirrorfs_core::url::ARCHIVE_SEPARATOR;
use mirrorfs_core::{
    AlwaysPermitted, ArchiveFs, DirectoryStorage, FileId, LocalFs, PersistentFs, VfsConfig,
};

/// An open store with the local and zip delegates registered.
pub struct Session {
    pub vfs: PersistentFs,
    pub store: PathBuf,
}

impl Session {
    pub fn open(store: &Path, config: VfsConfig) -> Result<Self> {
        let storage = DirectoryStorage::open(store)
            .with_context(|| format!("Failed to open store: {}", store.display()))?;
        let vfs = PersistentFs::open(config, Arc::new(storage), Arc::new(AlwaysPermitted))
            .with_context(|| format!("Failed to load store: {}", store.display()))?;
        vfs.register_filesystem(Arc::new(LocalFs::new()));
        vfs.register_filesystem(Arc::new(ArchiveFs::new()));
        debug!(store = %store.display(), "session opened");
        Ok(Self {
            vfs,
            store: store.to_path_buf(),
        })
    }

    pub fn close(self) -> Result<()> {
        self.vfs.close().context("Failed to save store")
    }
}

/// Turns a command-line path into a mirror URL.
///
/// Full URLs (`zip:///a.zip!/x`) pass through. Local paths are made
/// absolute; a `!/` inside one selects an entry of a zip archive.
pub fn to_url(arg: &str) -> Result<String> {
    if arg.contains("://") {
        return Ok(arg.to_string());
    }
    let (local, entry) = match arg.split_once(ARCHIVE_SEPARATOR) {
        Some((local, entry)) => (local, Some(entry)),
        None => (arg, None),
    };
    let absolute = path::absolute(local)
        .with_context(|| format!("Cannot resolve path: {local}"))?;
    let absolute = absolute.to_string_lossy().replace('\\', "/");
    Ok(match entry {
        Some(entry) => format!("zip://{absolute}{ARCHIVE_SEPARATOR}{entry}"),
        None => format!("file://{absolute}"),
    })
}

/// Resolves a command-line path to a mirrored record.
pub fn resolve(vfs: &PersistentFs, arg: &str) -> Result<(FileId, String)> {
    let url = to_url(arg)?;
    let id = vfs
        .find_file_by_path(&url)
        .with_context(|| format!("Failed to resolve {url}"))?
        .ok_or_else(|| anyhow!("No such file: {arg}"))?;
    Ok((id, url))
}
