//! Exclusive write permit.
//!
//! The mirror follows a single-writer / many-reader discipline. Acquiring
//! the application-wide write permit is the host's job. The core only asks
//! [`WritePermit::is_held`] at every mutating entry point and refuses with
//! [`crate::VfsError::WritePermitRequired`] otherwise.
//!
//! [`ExclusivePermit`] is a ready-made host implementation for embedders
//! that have no permit of their own. [`AlwaysPermitted`] suits
//! single-threaded tools.

use parking_lot::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};

/// Host-provided write permit.
pub trait WritePermit: Send + Sync {
    /// True if the calling thread currently holds the permit.
    fn is_held(&self) -> bool;
}

/// Permit that is always considered held.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysPermitted;

impl WritePermit for AlwaysPermitted {
    fn is_held(&self) -> bool {
        true
    }
}

/// Mutex-backed permit that remembers the owning thread.
#[derive(Debug, Default)]
pub struct ExclusivePermit {
    lock: Mutex<()>,
    owner: Mutex<Option<ThreadId>>,
}

impl ExclusivePermit {
    /// Creates a free permit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the permit is free and takes it.
    pub fn acquire(&self) -> PermitGuard<'_> {
        let guard = self.lock.lock();
        *self.owner.lock() = Some(thread::current().id());
        PermitGuard {
            permit: self,
            _guard: guard,
        }
    }

    /// Takes the permit if it is free.
    pub fn try_acquire(&self) -> Option<PermitGuard<'_>> {
        let guard = self.lock.try_lock()?;
        *self.owner.lock() = Some(thread::current().id());
        Some(PermitGuard {
            permit: self,
            _guard: guard,
        })
    }
}

impl WritePermit for ExclusivePermit {
    fn is_held(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }
}

/// Holds an [`ExclusivePermit`] until dropped.
#[derive(Debug)]
pub struct PermitGuard<'a> {
    permit: &'a ExclusivePermit,
    _guard: MutexGuard<'a, ()>,
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        // Owner is cleared before the lock guard field drops.
        *self.permit.owner.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_held_only_by_owner_thread() {
        let permit = Arc::new(ExclusivePermit::new());
        assert!(!permit.is_held());

        let guard = permit.acquire();
        assert!(permit.is_held());

        let other = Arc::clone(&permit);
        let seen = thread::spawn(move || other.is_held()).join().unwrap();
        assert!(!seen);

        drop(guard);
        assert!(!permit.is_held());
    }

    #[test]
    fn test_try_acquire_fails_while_held() {
        let permit = Arc::new(ExclusivePermit::new());
        let _guard = permit.acquire();

        let other = Arc::clone(&permit);
        let got = thread::spawn(move || other.try_acquire().is_some())
            .join()
            .unwrap();
        assert!(!got);
    }

    #[test]
    fn test_always_permitted() {
        assert!(AlwaysPermitted.is_held());
    }
}
