//! Error types for the mirror.
//!
//! Three failure kinds are kept apart:
//!
//! - **External I/O** (a delegate filesystem is unreachable or denies access)
//!   surfaces as [`VfsError::Delegate`] to the direct caller.
//! - **Internal inconsistency** (cyclic parent chain, missing child, damaged
//!   store) is logged and turned into an empty/`None` result by the query
//!   that found it. [`VfsError::Inconsistent`] only appears inside batch
//!   reports.
//! - **Storage failures** are wrapped into a single [`StorageError`] at the
//!   API boundary. [`StorageError::io_cause`] tells an I/O cause apart from a
//!   semantic storage error.

use crate::record::FileId;
use std::io;
use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O failed.
    #[error("storage I/O failed while {context}: {source}")]
    Io {
        /// What the store was doing.
        context: String,
        /// The wrapped cause.
        #[source]
        source: io::Error,
    },

    /// Snapshot could not be (de)serialized.
    #[error("storage serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Snapshot is structurally invalid (bad version, dangling ids, ...).
    #[error("storage is corrupted: {0}")]
    Corrupted(String),
}

impl StorageError {
    /// Wraps an I/O error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        StorageError::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns the wrapped I/O cause, if this error has one.
    pub fn io_cause(&self) -> Option<&io::Error> {
        match self {
            StorageError::Io { source, .. } => Some(source),
            _ => None,
        }
    }

    /// True for errors that mean the persisted state is unusable.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StorageError::Corrupted(_) | StorageError::Serialization(_)
        )
    }
}

/// Errors surfaced by [`crate::PersistentFs`] operations.
#[derive(Debug, Error)]
pub enum VfsError {
    /// A delegate filesystem call failed.
    #[error("delegate I/O failed for {path}: {source}")]
    Delegate {
        /// Delegate path of the file involved.
        path: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Persistence failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The id does not name a valid (live) record.
    #[error("invalid file: {0}")]
    InvalidFile(FileId),

    /// The operation needs a directory.
    #[error("not a directory: {0}")]
    NotADirectory(FileId),

    /// A child with this name is already linked.
    #[error("{parent} already has a child named {name:?}")]
    AlreadyExists {
        /// Parent directory.
        parent: FileId,
        /// Conflicting name.
        name: String,
    },

    /// The delegate does not confirm a root at this URL.
    #[error("no such root: {0}")]
    NoSuchRoot(String),

    /// No delegate filesystem is registered for the protocol.
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    /// A mutating entry point was called without the exclusive write permit.
    #[error("write permit is not held by the calling thread")]
    WritePermitRequired,

    /// The delegate is read-only.
    #[error("read-only filesystem: {0}")]
    ReadOnly(String),

    /// Detected structural damage (cycle, dangling child, ...).
    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    /// Source and destination are served by different delegates.
    #[error("{0} and {1} are on different filesystems")]
    CrossFilesystem(FileId, FileId),

    /// The request is malformed: bad name, root rename or move, or a move
    /// into the file's own subtree.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Content could be neither served from cache nor fetched.
    #[error("content unavailable for {0}")]
    ContentUnavailable(FileId),
}

impl VfsError {
    /// Wraps a delegate I/O error with the path it concerned.
    pub fn delegate(path: impl Into<String>, source: io::Error) -> Self {
        VfsError::Delegate {
            path: path.into(),
            source,
        }
    }

    /// True if the error came from a delegate filesystem.
    pub fn is_delegate(&self) -> bool {
        matches!(self, VfsError::Delegate { .. })
    }
}

/// Result type for mirror operations.
pub type VfsResult<T> = Result<T, VfsError>;
