//! Persistent, id-indexed mirror of real filesystem metadata and content.
//!
//! `mirrorfs-core` keeps a compact record for every file and directory it
//! has seen on one or more delegate filesystems (local disk, zip archives,
//! an in-memory test filesystem). Records are addressed by stable integer
//! [`FileId`]s that survive restarts, so hosts can key their own indexes by
//! id instead of by path.
//!
//! # Components
//!
//! ## Persistent state
//!
//! - [`NameTable`](names::NameTable) - interned file names
//! - [`FileRecordStore`](store::FileRecordStore) - record arena with parent
//!   and child links, and the persisted root table
//! - [`ContentStore`] - ref-counted, deduplicated content blobs
//! - [`Storage`] - where snapshots and blobs live ([`DirectoryStorage`] on
//!   disk, [`MemoryStorage`] for tests)
//!
//! ## Derived state
//!
//! - [`RootRegistry`](roots::RootRegistry) - roots keyed by normalized URL
//! - [`DirectoryEntryCache`](cache::DirectoryEntryCache) - lazily built
//!   directory nodes, dropped on low memory
//!
//! ## Change flow
//!
//! Every structural change is a [`VfsEvent`] applied by
//! [`PersistentFs::process_events`]. Listeners see each batch twice, before
//! and after it is applied. Mutations require the host's [`WritePermit`].
//!
//! # Example
//!
//! ```
//! use mirrorfs_core::{AlwaysPermitted, MemoryFs, MemoryStorage, PersistentFs, VfsConfig};
//! use std::sync::Arc;
//!
//! let vfs = PersistentFs::open(
//!     VfsConfig::default(),
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(AlwaysPermitted),
//! )?;
//! let mem = Arc::new(MemoryFs::new());
//! mem.add_file("/proj/src/A.java", b"class A {}");
//! vfs.register_filesystem(mem);
//!
//! let file = vfs.find_file_by_path("mem:///proj/src/A.java")?.expect("file exists");
//! assert_eq!(vfs.length(file), Some(10));
//! assert_eq!(&*vfs.read_content(file)?, b"class A {}");
//! vfs.close()?;
//! # Ok::<(), mirrorfs_core::VfsError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod content;
pub mod delegate;
pub mod error;
pub mod events;
pub mod names;
pub mod notify;
pub mod permit;
pub mod record;
pub mod roots;
pub mod storage;
pub mod store;
pub mod url;
pub mod vfs;

pub use cache::{DirectoryNode, VirtualFile};
pub use config::VfsConfig;
pub use content::{ContentStore, ContentWriter};
pub use delegate::{ArchiveFs, DelegateFs, LocalFs, MemoryFs};
pub use error::{StorageError, VfsError, VfsResult};
pub use events::{BatchReport, FileProperty, VfsEvent};
pub use notify::{ListenerBus, Notification, RecordingListener, SubscriptionId, VfsListener};
pub use permit::{AlwaysPermitted, ExclusivePermit, PermitGuard, WritePermit};
pub use record::{ContentId, FileAttributes, FileFlags, FileId, FileRecord, NameId, UNKNOWN_LENGTH};
pub use roots::RootInfo;
pub use storage::{DirectoryStorage, MemoryStorage, Snapshot, Storage};
pub use url::RootUrl;
pub use vfs::{ChildEntry, ChildInfo, PersistentFs, VfsStats};
