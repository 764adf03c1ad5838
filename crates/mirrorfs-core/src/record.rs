//! Record-level types shared by every component.
//!
//! A [`FileRecord`] is the persisted metadata tuple for one file or
//! directory. Records refer to each other only through integer ids
//! ([`FileId`]), never through pointers, so the parent/child graph is an
//! arena that can be walked in either direction by repeated lookups.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a file record.
///
/// Ids are positive and never reused (see `FileRecordStore::allocate`).
/// [`FileId::NONE`] marks "no parent" on roots and doubles as the
/// synthetic super-root sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(u32);

impl FileId {
    /// "No parent" / super-root sentinel.
    pub const NONE: FileId = FileId(0);

    /// Wraps a raw id.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// True for the sentinel id.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Interned file name id (see [`crate::names::NameTable`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameId(pub(crate) u32);

impl NameId {
    /// Returns the raw id.
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Key into the content blob area.
///
/// `ContentId::NONE` means the record has no cached content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(u32);

impl ContentId {
    /// No cached content.
    pub const NONE: ContentId = ContentId(0);

    /// Wraps a raw id.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// True when no content is attached.
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

bitflags! {
    /// Per-record flag bits.
    ///
    /// Bits outside the named set are reserved. They are retained through
    /// every flag update (`from_bits_retain`), never silently cleared.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(from = "u32", into = "u32")]
    pub struct FileFlags: u32 {
        const DIRECTORY = 1 << 0;
        const READ_ONLY = 1 << 1;
        const SYMLINK = 1 << 2;
        const SPECIAL = 1 << 3;
        const HIDDEN = 1 << 4;
        /// The persisted child list is authoritative.
        const CHILDREN_CACHED = 1 << 5;
        /// Cached content is stale and must be re-fetched from the delegate.
        const MUST_RELOAD_CONTENT = 1 << 6;
        /// Delegate changed behind our back; a refresh should recheck it.
        const DIRTY = 1 << 7;
    }
}

impl From<u32> for FileFlags {
    fn from(bits: u32) -> Self {
        FileFlags::from_bits_retain(bits)
    }
}

impl From<FileFlags> for u32 {
    fn from(flags: FileFlags) -> Self {
        flags.bits()
    }
}

impl FileFlags {
    /// Flags that describe the delegate file itself (as opposed to
    /// cache bookkeeping). These are what an attributes probe refreshes.
    pub const ATTRIBUTE_MASK: FileFlags = FileFlags::DIRECTORY
        .union(FileFlags::READ_ONLY)
        .union(FileFlags::SYMLINK)
        .union(FileFlags::SPECIAL)
        .union(FileFlags::HIDDEN);
}

/// Length sentinel: directory, or not known yet.
pub const UNKNOWN_LENGTH: i64 = -1;

/// Persisted metadata tuple for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// This record's id.
    pub id: FileId,
    /// Parent id, or [`FileId::NONE`] for roots.
    pub parent_id: FileId,
    /// Interned name.
    pub name_id: NameId,
    /// Flag bits, including reserved ones.
    pub flags: FileFlags,
    /// Byte length, or [`UNKNOWN_LENGTH`].
    pub length: i64,
    /// Last modification time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Attached content blob, or [`ContentId::NONE`].
    pub content_id: ContentId,
}

impl FileRecord {
    /// True if the record describes a directory.
    #[inline]
    pub fn is_directory(&self) -> bool {
        self.flags.contains(FileFlags::DIRECTORY)
    }

    /// True if the record is a root (no parent).
    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Attributes reported by a delegate filesystem probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileAttributes {
    /// Entry is a directory.
    pub is_directory: bool,
    /// Entry can be written.
    pub is_writable: bool,
    /// Entry is a symbolic link.
    pub is_symlink: bool,
    /// Entry is a device, pipe or socket.
    pub is_special: bool,
    /// Entry is hidden by the delegate's convention.
    pub is_hidden: bool,
    /// Byte length (0 for directories).
    pub length: u64,
    /// Last modification time, milliseconds since the Unix epoch.
    pub last_modified: i64,
}

impl FileAttributes {
    /// Attributes for a plain writable directory.
    pub fn directory(last_modified: i64) -> Self {
        Self {
            is_directory: true,
            is_writable: true,
            last_modified,
            ..Self::default()
        }
    }

    /// Attributes for a plain writable file.
    pub fn file(length: u64, last_modified: i64) -> Self {
        Self {
            is_writable: true,
            length,
            last_modified,
            ..Self::default()
        }
    }

    /// Converts to the attribute part of the record flags.
    pub fn to_flags(&self) -> FileFlags {
        let mut flags = FileFlags::empty();
        flags.set(FileFlags::DIRECTORY, self.is_directory);
        flags.set(FileFlags::READ_ONLY, !self.is_writable);
        flags.set(FileFlags::SYMLINK, self.is_symlink);
        flags.set(FileFlags::SPECIAL, self.is_special);
        flags.set(FileFlags::HIDDEN, self.is_hidden);
        flags
    }

    /// Length as stored in a record (directories store [`UNKNOWN_LENGTH`]).
    pub fn record_length(&self) -> i64 {
        if self.is_directory {
            UNKNOWN_LENGTH
        } else {
            i64::try_from(self.length).unwrap_or(i64::MAX)
        }
    }
}
