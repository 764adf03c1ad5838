//! Operations that change the delegate first and then mirror the change
//! through an event.

use super::PersistentFs;
use super::apply::is_valid_name;
use crate::delegate::DelegateFs;
use crate::error::{VfsError, VfsResult};
use crate::events::{FileProperty, VfsEvent};
use crate::record::FileId;
use std::sync::Arc;
use tracing::{debug, instrument};

impl PersistentFs {
    fn writable_delegate(&self, id: FileId) -> VfsResult<(Arc<dyn DelegateFs>, String)> {
        self.require_permit()?;
        let (fs, path) = self.delegate_path(id)?;
        if fs.is_read_only() {
            return Err(VfsError::ReadOnly(path));
        }
        Ok((fs, path))
    }

    fn check_name(name: &str) -> VfsResult<()> {
        if is_valid_name(name) {
            Ok(())
        } else {
            Err(VfsError::InvalidOperation(format!("invalid name {name:?}")))
        }
    }

    fn check_not_root(&self, id: FileId) -> VfsResult<()> {
        if self.parent(id).is_none() {
            return Err(VfsError::InvalidOperation(format!(
                "{id} is a root and cannot be moved or renamed"
            )));
        }
        Ok(())
    }

    fn check_same_filesystem(
        a: &dyn DelegateFs,
        b: &dyn DelegateFs,
        ids: (FileId, FileId),
    ) -> VfsResult<()> {
        if a.protocol() != b.protocol() {
            return Err(VfsError::CrossFilesystem(ids.0, ids.1));
        }
        Ok(())
    }

    /// Runs a single mirrored event, turning a drop or failure into an
    /// error.
    fn mirror(&self, event: VfsEvent) -> VfsResult<()> {
        let kind = event.kind();
        let target = event.target();
        let report = self.process_events(vec![event])?;
        if let Some((_, e)) = report.failures.into_iter().next() {
            return Err(e);
        }
        if report.applied == 0 && report.collapsed == 0 {
            return Err(VfsError::Inconsistent(format!(
                "{kind} event for {target} was rejected"
            )));
        }
        Ok(())
    }

    fn created_child(&self, parent: FileId, name: &str, fs: &dyn DelegateFs) -> VfsResult<FileId> {
        self.child_named(parent, name, fs).ok_or_else(|| {
            VfsError::Inconsistent(format!("{name:?} is not linked under {parent}"))
        })
    }

    fn create_child(&self, parent: FileId, name: &str, is_directory: bool) -> VfsResult<FileId> {
        Self::check_name(name)?;
        self.directory_record(parent)?;
        let (fs, path) = self.writable_delegate(parent)?;
        if self.child_named(parent, name, fs.as_ref()).is_some() {
            return Err(VfsError::AlreadyExists {
                parent,
                name: name.to_string(),
            });
        }
        let child_path = fs.join(&path, name);
        let created = if is_directory {
            fs.create_directory(&child_path)
        } else {
            fs.create_file(&child_path)
        };
        created.map_err(|e| VfsError::delegate(&child_path, e))?;
        self.mirror(VfsEvent::Create {
            parent,
            name: name.to_string(),
            is_directory,
        })?;
        debug!(path = %child_path, is_directory, "created child");
        self.created_child(parent, name, fs.as_ref())
    }

    /// Creates a directory on the delegate and links it.
    #[instrument(level = "debug", skip(self))]
    pub fn create_child_directory(&self, parent: FileId, name: &str) -> VfsResult<FileId> {
        self.create_child(parent, name, true)
    }

    /// Creates an empty file on the delegate and links it.
    #[instrument(level = "debug", skip(self))]
    pub fn create_child_file(&self, parent: FileId, name: &str) -> VfsResult<FileId> {
        self.create_child(parent, name, false)
    }

    /// Deletes a file or directory tree on the delegate and frees it.
    #[instrument(level = "debug", skip(self))]
    pub fn delete_file(&self, id: FileId) -> VfsResult<()> {
        let (fs, path) = self.writable_delegate(id)?;
        fs.delete(&path).map_err(|e| VfsError::delegate(&path, e))?;
        self.mirror(VfsEvent::Delete { file: id })
    }

    /// Renames a file in place. The id is kept.
    #[instrument(level = "debug", skip(self))]
    pub fn rename_file(&self, id: FileId, new_name: &str) -> VfsResult<()> {
        Self::check_name(new_name)?;
        self.check_not_root(id)?;
        let (fs, path) = self.writable_delegate(id)?;
        if let Some(parent) = self.parent(id)
            && let Some(other) = self.child_named(parent, new_name, fs.as_ref())
            && other != id
        {
            return Err(VfsError::AlreadyExists {
                parent,
                name: new_name.to_string(),
            });
        }
        fs.rename(&path, new_name)
            .map_err(|e| VfsError::delegate(&path, e))?;
        self.mirror(VfsEvent::Rename {
            file: id,
            new_name: new_name.to_string(),
        })
    }

    /// Moves a file under `new_parent`. The id is kept.
    #[instrument(level = "debug", skip(self))]
    pub fn move_file(&self, id: FileId, new_parent: FileId) -> VfsResult<()> {
        self.check_not_root(id)?;
        self.directory_record(new_parent)?;
        if self.store.is_ancestor(id, new_parent) {
            return Err(VfsError::InvalidOperation(format!(
                "cannot move {id} into its own subtree"
            )));
        }
        let (fs, path) = self.writable_delegate(id)?;
        let (target_fs, target_path) = self.writable_delegate(new_parent)?;
        Self::check_same_filesystem(fs.as_ref(), target_fs.as_ref(), (id, new_parent))?;
        let name = self.name(id).ok_or(VfsError::InvalidFile(id))?;
        if self.child_named(new_parent, &name, fs.as_ref()).is_some() {
            return Err(VfsError::AlreadyExists {
                parent: new_parent,
                name: name.to_string(),
            });
        }
        fs.move_to(&path, &target_path)
            .map_err(|e| VfsError::delegate(&path, e))?;
        self.mirror(VfsEvent::Move {
            file: id,
            new_parent,
        })
    }

    /// Copies a file or tree to `new_parent/new_name` and links the copy.
    #[instrument(level = "debug", skip(self))]
    pub fn copy_file(&self, id: FileId, new_parent: FileId, new_name: &str) -> VfsResult<FileId> {
        Self::check_name(new_name)?;
        self.directory_record(new_parent)?;
        self.require_permit()?;
        let (fs, path) = self.delegate_path(id)?;
        let (target_fs, target_path) = self.writable_delegate(new_parent)?;
        Self::check_same_filesystem(fs.as_ref(), target_fs.as_ref(), (id, new_parent))?;
        if self.child_named(new_parent, new_name, target_fs.as_ref()).is_some() {
            return Err(VfsError::AlreadyExists {
                parent: new_parent,
                name: new_name.to_string(),
            });
        }
        fs.copy(&path, &target_path, new_name)
            .map_err(|e| VfsError::delegate(&path, e))?;
        self.mirror(VfsEvent::Copy {
            file: id,
            new_parent,
            new_name: new_name.to_string(),
        })?;
        self.created_child(new_parent, new_name, target_fs.as_ref())
    }

    /// Flips the writable bit on the delegate and in the record.
    #[instrument(level = "debug", skip(self))]
    pub fn set_writable(&self, id: FileId, writable: bool) -> VfsResult<()> {
        let (fs, path) = self.writable_delegate(id)?;
        fs.set_writable(&path, writable)
            .map_err(|e| VfsError::delegate(&path, e))?;
        self.mirror(VfsEvent::PropertyChange {
            file: id,
            property: FileProperty::Writable(writable),
        })
    }
}
