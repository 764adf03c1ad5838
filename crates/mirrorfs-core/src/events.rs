//! Structural change events.
//!
//! An event batch is the only way the mirror's structure changes. Each
//! event carries just the fields its kind needs. Batches are validated,
//! have their redundant deletes collapsed, and are applied in order by
//! `PersistentFs::process_events`.

use crate::error::VfsError;
use crate::record::FileId;

/// A property that can be flipped by [`VfsEvent::PropertyChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileProperty {
    /// New writable state.
    Writable(bool),
    /// New hidden state.
    Hidden(bool),
}

/// One structural change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VfsEvent {
    /// A child appeared under `parent`.
    Create {
        /// Directory receiving the child.
        parent: FileId,
        /// Child name.
        name: String,
        /// Expected kind (the delegate probe decides).
        is_directory: bool,
    },
    /// A file or directory tree went away.
    Delete {
        /// Deleted file.
        file: FileId,
    },
    /// A file was copied to `new_parent/new_name`.
    Copy {
        /// Source.
        file: FileId,
        /// Destination directory.
        new_parent: FileId,
        /// Name of the copy.
        new_name: String,
    },
    /// A file moved under another directory, keeping its name.
    Move {
        /// Moved file.
        file: FileId,
        /// Destination directory.
        new_parent: FileId,
    },
    /// A file was renamed in place.
    Rename {
        /// Renamed file.
        file: FileId,
        /// New name.
        new_name: String,
    },
    /// A file's bytes changed.
    ContentChange {
        /// Changed file.
        file: FileId,
        /// Cached content is stale and must be fetched again.
        reload_from_delegate: bool,
    },
    /// A property flipped.
    PropertyChange {
        /// Changed file.
        file: FileId,
        /// New value.
        property: FileProperty,
    },
}

impl VfsEvent {
    /// The file the event is about. For `Create` this is the parent.
    pub fn target(&self) -> FileId {
        match self {
            VfsEvent::Create { parent, .. } => *parent,
            VfsEvent::Delete { file }
            | VfsEvent::Copy { file, .. }
            | VfsEvent::Move { file, .. }
            | VfsEvent::Rename { file, .. }
            | VfsEvent::ContentChange { file, .. }
            | VfsEvent::PropertyChange { file, .. } => *file,
        }
    }

    /// True for `Delete`.
    pub fn is_delete(&self) -> bool {
        matches!(self, VfsEvent::Delete { .. })
    }

    /// Short kind name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            VfsEvent::Create { .. } => "create",
            VfsEvent::Delete { .. } => "delete",
            VfsEvent::Copy { .. } => "copy",
            VfsEvent::Move { .. } => "move",
            VfsEvent::Rename { .. } => "rename",
            VfsEvent::ContentChange { .. } => "content-change",
            VfsEvent::PropertyChange { .. } => "property-change",
        }
    }
}

/// Outcome of one `process_events` call.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Events applied without error.
    pub applied: usize,
    /// Events dropped by validation.
    pub dropped_invalid: usize,
    /// Deletes dropped because an ancestor is deleted in the same batch.
    pub collapsed: usize,
    /// Failed events, by index in the submitted batch.
    pub failures: Vec<(usize, VfsError)>,
}

impl BatchReport {
    /// True if nothing was dropped and nothing failed.
    pub fn is_clean(&self) -> bool {
        self.dropped_invalid == 0 && self.failures.is_empty()
    }
}

/// Marks deletes made redundant by a shallower delete in the same batch.
///
/// Deletes are visited by ascending `depth`. A delete is dropped when one
/// of the already surviving deletes targets an ancestor of it (or the same
/// file). Returns a keep-mask parallel to `events`. Non-delete events are
/// always kept.
pub fn collapse_redundant_deletes(
    events: &[VfsEvent],
    depth: impl Fn(FileId) -> Option<usize>,
    is_ancestor: impl Fn(FileId, FileId) -> bool,
) -> Vec<bool> {
    let mut keep = vec![true; events.len()];
    let mut deletes: Vec<(usize, usize, FileId)> = events
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            VfsEvent::Delete { file } => Some((depth(*file).unwrap_or(usize::MAX), i, *file)),
            _ => None,
        })
        .collect();
    deletes.sort_unstable();

    let mut surviving: Vec<FileId> = Vec::new();
    for (_, index, file) in deletes {
        if surviving.iter().any(|kept| is_ancestor(*kept, file)) {
            keep[index] = false;
        } else {
            surviving.push(file);
        }
    }
    keep
}
