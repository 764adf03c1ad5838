//! In-memory storage for tests and throwaway mirrors.

use super::{Snapshot, Storage};
use crate::error::StorageError;
use crate::record::ContentId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Storage that keeps everything in process memory.
///
/// Snapshots are kept serialized so that a save/load cycle exercises the
/// same serde path as [`super::DirectoryStorage`]. Writes can be made to
/// fail on demand for error-path tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    snapshot: Mutex<Option<String>>,
    blobs: DashMap<ContentId, Vec<u8>>,
    fail_writes: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with an I/O error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of snapshots saved so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Number of stored blobs.
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    /// Overwrites the raw snapshot text (for corruption tests).
    pub fn set_raw_snapshot(&self, raw: impl Into<String>) {
        *self.snapshot.lock() = Some(raw.into());
    }

    fn check_writable(&self, context: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::io(
                context,
                std::io::Error::other("injected storage failure"),
            ));
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
        match self.snapshot.lock().as_deref() {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        self.check_writable("saving snapshot")?;
        let raw = serde_json::to_string(snapshot)?;
        *self.snapshot.lock() = Some(raw);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_blob(&self, id: ContentId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blobs.get(&id).map(|b| b.clone()))
    }

    fn save_blob(&self, id: ContentId, bytes: &[u8]) -> Result<(), StorageError> {
        self.check_writable("saving blob")?;
        self.blobs.insert(id, bytes.to_vec());
        Ok(())
    }

    fn delete_blob(&self, id: ContentId) -> Result<(), StorageError> {
        self.blobs.remove(&id);
        Ok(())
    }

    fn wipe(&self) -> Result<(), StorageError> {
        *self.snapshot.lock() = None;
        self.blobs.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_roundtrip() {
        let storage = MemoryStorage::new();
        assert!(storage.load_snapshot().unwrap().is_none());

        let snapshot = Snapshot::empty();
        storage.save_snapshot(&snapshot).unwrap();
        assert_eq!(storage.load_snapshot().unwrap(), Some(snapshot));
        assert_eq!(storage.save_count(), 1);
    }

    #[test]
    fn test_injected_failure() {
        let storage = MemoryStorage::new();
        storage.fail_writes(true);
        let err = storage
            .save_blob(ContentId::from_raw(1), b"x")
            .unwrap_err();
        assert!(err.io_cause().is_some());
        assert_eq!(storage.blob_count(), 0);
    }

    #[test]
    fn test_garbage_snapshot_is_serialization_error() {
        let storage = MemoryStorage::new();
        storage.set_raw_snapshot("{ not json");
        let err = storage.load_snapshot().unwrap_err();
        assert!(err.is_corruption());
    }
}
