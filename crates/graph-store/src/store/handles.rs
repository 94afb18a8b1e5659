use std::sync::Weak;

use super::StoreInner;
use crate::snapshot::Snapshot;

/// Notifications for one selector. Disposed on drop.
pub struct Subscription {
    store: Weak<StoreInner>,
    id: u64,
}

impl Subscription {
    pub(super) fn new(store: Weak<StoreInner>, id: u64) -> Self {
        Subscription { store, id }
    }

    /// The snapshot last delivered to the callback, or the initial one.
    pub fn snapshot(&self) -> Option<Snapshot> {
        let store = self.store.upgrade()?;
        let state = store.state.lock();
        state.subscriptions.get(&self.id).map(|entry| entry.snapshot.clone())
    }

    pub fn dispose(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.state.lock().subscriptions.shift_remove(&self.id);
            tracing::debug!(subscription = self.id, "unsubscribed");
        }
    }
}

/// Keeps an operation's data from being collected. Released on drop.
pub struct RetainHandle {
    store: Weak<StoreInner>,
    identifier: String,
}

impl RetainHandle {
    pub(super) fn new(store: Weak<StoreInner>, identifier: String) -> Self {
        RetainHandle { store, identifier }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn dispose(self) {}
}

impl Drop for RetainHandle {
    fn drop(&mut self) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let collect = store.state.lock().gc.release(&self.identifier);
        if collect {
            store.schedule_gc(Weak::clone(&self.store));
        }
    }
}

/// Pauses garbage collection. Collection requested meanwhile is scheduled when the last hold
/// is dropped.
pub struct GcHold {
    store: Weak<StoreInner>,
}

impl GcHold {
    pub(super) fn new(store: Weak<StoreInner>) -> Self {
        GcHold { store }
    }

    pub fn dispose(self) {}
}

impl Drop for GcHold {
    fn drop(&mut self) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let collect = store.state.lock().gc.unhold();
        if collect {
            store.schedule_gc(Weak::clone(&self.store));
        }
    }
}

/// A request in flight. Dropping it also forgets the placeholders its incremental payloads
/// were waiting for.
pub struct FetchHandle {
    store: Weak<StoreInner>,
    fetch: u64,
    request: String,
}

impl FetchHandle {
    pub(super) fn new(store: Weak<StoreInner>, fetch: u64, request: String) -> Self {
        FetchHandle { store, fetch, request }
    }

    pub fn complete(self) {}
}

impl Drop for FetchHandle {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            let mut state = store.state.lock();
            state.gc.untrack_fetch(self.fetch);
            state.incremental.clear(&self.request);
        }
    }
}
