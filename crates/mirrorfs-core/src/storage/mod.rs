//! Abstract persistence for records and content blobs.
//!
//! The record table is persisted as one [`Snapshot`]. The binary layout is
//! opaque: the core only needs "load the last saved state" and
//! "save this state". Content blobs live in a separate area addressed by
//! [`ContentId`], so large payloads never travel with the record table.

mod directory;
mod memory;

pub use directory::DirectoryStorage;
pub use memory::MemoryStorage;

use crate::error::StorageError;
use crate::record::{ContentId, FileId, FileRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot format written by this version.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// One persisted record with its child-id list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    /// The record tuple.
    pub record: FileRecord,
    /// Child ids, empty for files and for directories never listed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileId>,
}

/// Persisted bookkeeping for one content blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedContent {
    /// Blob id.
    pub id: ContentId,
    /// Hex SHA-256 of the bytes.
    pub digest: String,
    /// Reference count (owning records plus pins).
    pub refs: u32,
    /// Byte length.
    pub length: u64,
}

/// Everything needed to restore a mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Format version, checked on load.
    pub format_version: u32,
    /// Next file id to hand out (ids are never reused).
    pub next_file_id: u32,
    /// Next content id to hand out.
    pub next_content_id: u32,
    /// Interned names, index = name id.
    pub names: Vec<String>,
    /// Live records.
    pub records: Vec<PersistedRecord>,
    /// Root URL to root record id.
    pub roots: BTreeMap<String, FileId>,
    /// Content bookkeeping.
    pub contents: Vec<PersistedContent>,
}

impl Snapshot {
    /// An empty mirror.
    pub fn empty() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            next_file_id: 1,
            next_content_id: 1,
            names: vec![String::new()],
            records: Vec::new(),
            roots: BTreeMap::new(),
            contents: Vec::new(),
        }
    }

    /// Structural checks run before a snapshot is trusted.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(StorageError::Corrupted(format!(
                "unsupported snapshot format {} (expected {SNAPSHOT_FORMAT_VERSION})",
                self.format_version
            )));
        }
        for persisted in &self.records {
            let id = persisted.record.id;
            if id.is_none() || id.as_u32() >= self.next_file_id {
                return Err(StorageError::Corrupted(format!(
                    "record id {id} outside allocated range"
                )));
            }
            if persisted.record.name_id.as_u32() as usize >= self.names.len() {
                return Err(StorageError::Corrupted(format!(
                    "record {id} references unknown name id {}",
                    persisted.record.name_id.as_u32()
                )));
            }
        }
        Ok(())
    }
}

/// Abstract key-value store behind the record table and blob area.
pub trait Storage: Send + Sync {
    /// Loads the last saved snapshot, `None` for a fresh store.
    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError>;

    /// Replaces the saved snapshot.
    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError>;

    /// Loads blob bytes.
    fn load_blob(&self, id: ContentId) -> Result<Option<Vec<u8>>, StorageError>;

    /// Stores blob bytes under `id`.
    fn save_blob(&self, id: ContentId, bytes: &[u8]) -> Result<(), StorageError>;

    /// Removes a blob. Missing blobs are not an error.
    fn delete_blob(&self, id: ContentId) -> Result<(), StorageError>;

    /// Drops everything (used when rebuilding after corruption).
    fn wipe(&self) -> Result<(), StorageError>;
}
