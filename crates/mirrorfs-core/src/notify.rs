//! Two-phase change notification.
//!
//! Every applied batch is bracketed by [`VfsListener::before`] (record state
//! is still the old one, so listeners can snapshot it) and
//! [`VfsListener::after`]. Each applied property flip additionally produces
//! a [`VfsListener::property_changed`] call once the whole batch has been
//! applied, before the `after` phase.

use crate::events::{FileProperty, VfsEvent};
use crate::record::FileId;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Subscriber to batch notifications.
pub trait VfsListener: Send + Sync {
    /// Called before any event of the batch is applied.
    fn before(&self, events: &[VfsEvent]);

    /// Called after every event of the batch was attempted.
    fn after(&self, events: &[VfsEvent]);

    /// Called for each applied property flip, after the batch and before
    /// [`VfsListener::after`].
    fn property_changed(&self, _file: FileId, _property: &FileProperty) {}
}

/// Handle returned by [`ListenerBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Fan-out to subscribed listeners.
#[derive(Default)]
pub struct ListenerBus {
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn VfsListener>)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ListenerBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerBus")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl ListenerBus {
    /// Bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener.
    pub fn subscribe(&self, listener: Arc<dyn VfsListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Removes a listener. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(sub, _)| *sub != id);
        before != listeners.len()
    }

    // Listeners are cloned out so that a callback may subscribe or
    // unsubscribe without deadlocking.
    fn snapshot(&self) -> Vec<Arc<dyn VfsListener>> {
        self.listeners.read().iter().map(|(_, l)| Arc::clone(l)).collect()
    }

    /// Publishes the "before" phase.
    pub fn before(&self, events: &[VfsEvent]) {
        for listener in self.snapshot() {
            listener.before(events);
        }
    }

    /// Publishes the "after" phase.
    pub fn after(&self, events: &[VfsEvent]) {
        for listener in self.snapshot() {
            listener.after(events);
        }
    }

    /// Publishes a property change.
    pub fn property_changed(&self, file: FileId, property: &FileProperty) {
        for listener in self.snapshot() {
            listener.property_changed(file, property);
        }
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// True if nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One captured listener call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// `before(events)`.
    Before(Vec<VfsEvent>),
    /// `after(events)`.
    After(Vec<VfsEvent>),
    /// `property_changed(file, property)`.
    PropertyChanged(FileId, FileProperty),
}

/// Listener that records every call, in order.
#[derive(Debug, Default)]
pub struct RecordingListener {
    calls: Mutex<Vec<Notification>>,
}

impl RecordingListener {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls captured so far.
    pub fn calls(&self) -> Vec<Notification> {
        self.calls.lock().clone()
    }

    /// Returns the captured calls and forgets them.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.calls.lock())
    }
}

impl VfsListener for RecordingListener {
    fn before(&self, events: &[VfsEvent]) {
        self.calls.lock().push(Notification::Before(events.to_vec()));
    }

    fn after(&self, events: &[VfsEvent]) {
        self.calls.lock().push(Notification::After(events.to_vec()));
    }

    fn property_changed(&self, file: FileId, property: &FileProperty) {
        self.calls
            .lock()
            .push(Notification::PropertyChanged(file, *property));
    }
}
