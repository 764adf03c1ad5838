//! Content reads through the blob cache, and write-back commits.

use super::PersistentFs;
use crate::content::ContentWriter;
use crate::delegate::DelegateFs;
use crate::error::{VfsError, VfsResult};
use crate::events::VfsEvent;
use crate::record::{ContentId, FileFlags, FileId, FileRecord, UNKNOWN_LENGTH};
use std::io;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

impl PersistentFs {
    fn file_record(&self, id: FileId) -> VfsResult<FileRecord> {
        let record = self.store.record(id).ok_or(VfsError::InvalidFile(id))?;
        if record.is_directory() {
            return Err(VfsError::ContentUnavailable(id));
        }
        Ok(record)
    }

    fn cacheable(&self, fs: &dyn DelegateFs, len: usize) -> bool {
        fs.caches_content() && len as u64 <= self.config.max_cached_content_size
    }

    /// Bytes of `id`.
    ///
    /// The stored blob is returned unless the file is marked
    /// `MUST_RELOAD_CONTENT`, its length is unknown, or it has no blob. In
    /// those cases the delegate is read and the stored length refreshed.
    /// The bytes are kept as a blob when the delegate allows caching and
    /// they fit [`crate::VfsConfig::max_cached_content_size`].
    #[instrument(level = "debug", skip(self))]
    pub fn read_content(&self, id: FileId) -> VfsResult<Arc<[u8]>> {
        self.file_record(id)?;
        let _content = self.content_lock.lock();
        let record = self.file_record(id)?;

        let stale = record.flags.contains(FileFlags::MUST_RELOAD_CONTENT)
            || record.length == UNKNOWN_LENGTH
            || record.content_id.is_none();
        if !stale {
            if let Some(bytes) = self.content.load(record.content_id)? {
                trace!(%id, "content served from blob");
                return Ok(bytes);
            }
            debug!(%id, content = %record.content_id, "blob is gone, reading delegate");
        }

        let (fs, path) = self.delegate_path(id)?;
        let bytes = fs.read(&path).map_err(|e| VfsError::delegate(&path, e))?;
        self.store
            .set_length(id, i64::try_from(bytes.len()).unwrap_or(i64::MAX));

        let new_content = if self.cacheable(fs.as_ref(), bytes.len()) {
            self.content.store(&bytes)?
        } else {
            ContentId::NONE
        };
        if let Some(old) = self.store.set_content_id(id, new_content) {
            self.content.release(old)?;
        }
        if !new_content.is_none() {
            self.store.set_flags(id, FileFlags::MUST_RELOAD_CONTENT, false);
        }
        debug!(%id, len = bytes.len(), cached = !new_content.is_none(), "read content from delegate");
        Ok(Arc::from(bytes))
    }

    /// Opens a writer seeded with the current bytes of `id`.
    pub fn open_writer(&self, id: FileId) -> VfsResult<ContentWriter> {
        let existing = self.read_content(id)?;
        Ok(ContentWriter::new(id, existing.to_vec()))
    }

    /// Writes the writer's bytes back to the delegate and the blob store.
    ///
    /// The file is marked `MUST_RELOAD_CONTENT` first and the mark is only
    /// cleared once the new blob is attached, so a failure at any step
    /// leaves the next read going to the delegate. Ends by raising
    /// `ContentChange` through [`PersistentFs::process_events`].
    #[instrument(level = "debug", skip_all, fields(file = %writer.file()))]
    pub fn commit(&self, writer: ContentWriter) -> VfsResult<()> {
        self.require_permit()?;
        let (id, bytes) = writer.finish();
        self.file_record(id)?;
        let (fs, path) = self.delegate_path(id)?;
        if fs.is_read_only() {
            return Err(VfsError::ReadOnly(path));
        }

        {
            let _content = self.content_lock.lock();
            self.store.set_flags(id, FileFlags::MUST_RELOAD_CONTENT, true);
            fs.write(&path, &bytes)
                .map_err(|e| VfsError::delegate(&path, e))?;

            let new_content = if self.cacheable(fs.as_ref(), bytes.len()) {
                self.content.store(&bytes)?
            } else {
                ContentId::NONE
            };
            let refreshed = fs
                .attributes(&path)
                .map_err(|e| VfsError::delegate(&path, e))
                .and_then(|attrs| {
                    attrs.ok_or_else(|| {
                        VfsError::delegate(&path, io::Error::from(io::ErrorKind::NotFound))
                    })
                });
            let attrs = match refreshed {
                Ok(attrs) => attrs,
                Err(e) => {
                    self.content.release(new_content)?;
                    return Err(e);
                }
            };
            self.store.set_length(id, attrs.record_length());
            self.store.set_timestamp(id, attrs.last_modified);

            if let Some(old) = self.store.set_content_id(id, new_content) {
                self.content.release(old)?;
            }
            if !new_content.is_none() {
                self.store.set_flags(id, FileFlags::MUST_RELOAD_CONTENT, false);
            }
            debug!(%id, len = bytes.len(), "committed content");
        }

        let report = self.process_events(vec![VfsEvent::ContentChange {
            file: id,
            reload_from_delegate: false,
        }])?;
        match report.failures.into_iter().next() {
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }

    /// Pins a blob. Returns false for unknown content ids.
    pub fn acquire_content(&self, content: ContentId) -> bool {
        self.content.acquire(content)
    }

    /// Drops a pin taken with [`PersistentFs::acquire_content`].
    pub fn release_content(&self, content: ContentId) -> VfsResult<()> {
        Ok(self.content.release(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::open_mem;
    use super::*;

    #[test]
    fn test_second_read_hits_blob() {
        let (vfs, mem, _) = open_mem();
        mem.add_file("/proj/a.txt", b"hello");
        let file = vfs.find_file_by_path("mem:///proj/a.txt").unwrap().unwrap();

        assert_eq!(&*vfs.read_content(file).unwrap(), b"hello");
        let content = vfs.record(file).unwrap().content_id;
        assert!(!content.is_none());

        // Delegate changes are invisible until the file is marked stale.
        mem.add_file("/proj/a.txt", b"changed");
        assert_eq!(&*vfs.read_content(file).unwrap(), b"hello");
        vfs.store.set_flags(file, FileFlags::MUST_RELOAD_CONTENT, true);
        assert_eq!(&*vfs.read_content(file).unwrap(), b"changed");
        assert_eq!(vfs.length(file), Some(7));
        assert_eq!(vfs.content.ref_count(content), 0);
    }

    #[test]
    fn test_large_content_is_not_cached() {
        let (vfs, mem, _) = open_mem();
        let big = vec![7u8; (vfs.config().max_cached_content_size + 1) as usize];
        mem.add_file("/proj/big.bin", &big);
        let file = vfs.find_file_by_path("mem:///proj/big.bin").unwrap().unwrap();
        assert_eq!(vfs.read_content(file).unwrap().len(), big.len());
        assert!(vfs.record(file).unwrap().content_id.is_none());
    }

    #[test]
    fn test_directory_has_no_content() {
        let (vfs, mem, _) = open_mem();
        mem.mkdirs("/proj");
        let root = vfs.find_root("mem", "/proj").unwrap().unwrap();
        assert!(matches!(
            vfs.read_content(root),
            Err(VfsError::ContentUnavailable(_))
        ));
    }

    #[test]
    fn test_commit_writes_through() {
        let (vfs, mem, _) = open_mem();
        mem.add_file("/proj/a.txt", b"hello");
        let file = vfs.find_file_by_path("mem:///proj/a.txt").unwrap().unwrap();

        let mut writer = vfs.open_writer(file).unwrap();
        writer.write(5, b", world");
        vfs.commit(writer).unwrap();

        assert_eq!(mem.read("/proj/a.txt").unwrap(), b"hello, world");
        assert_eq!(&*vfs.read_content(file).unwrap(), b"hello, world");
        assert_eq!(vfs.length(file), Some(12));
        let flags = vfs.record(file).unwrap().flags;
        assert!(!flags.contains(FileFlags::MUST_RELOAD_CONTENT));
    }

    #[test]
    fn test_failed_commit_leaves_file_stale() {
        let (vfs, mem, _) = open_mem();
        mem.add_file("/proj/a.txt", b"old");
        let file = vfs.find_file_by_path("mem:///proj/a.txt").unwrap().unwrap();
        vfs.read_content(file).unwrap();

        let mut writer = vfs.open_writer(file).unwrap();
        writer.write(0, b"new");
        mem.fail_writes(true);
        let err = vfs.commit(writer).unwrap_err();
        assert!(err.is_delegate());
        mem.fail_writes(false);

        let flags = vfs.record(file).unwrap().flags;
        assert!(flags.contains(FileFlags::MUST_RELOAD_CONTENT));
        assert_eq!(&*vfs.read_content(file).unwrap(), b"old");
    }

    #[test]
    fn test_pinned_blob_survives_release_by_record() {
        let (vfs, mem, _) = open_mem();
        mem.add_file("/proj/a.txt", b"pinned");
        let file = vfs.find_file_by_path("mem:///proj/a.txt").unwrap().unwrap();
        vfs.read_content(file).unwrap();
        let content = vfs.record(file).unwrap().content_id;

        assert!(vfs.acquire_content(content));
        vfs.process_events(vec![VfsEvent::Delete { file }]).unwrap();
        assert_eq!(vfs.content.ref_count(content), 1);
        vfs.release_content(content).unwrap();
        assert_eq!(vfs.content.ref_count(content), 0);
    }
}
