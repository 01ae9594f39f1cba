//! Synchronous event plumbing shared by the cache, subscriptions and cursors.
//!
//! Listeners run on the emitting thread before `emit` returns. The listener
//! table is snapshotted before dispatch, so a listener may register or
//! deregister listeners (including itself) without deadlocking.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by [`Emitter::on`], used to deregister a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

/// Boxed listener callback.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Registry of listeners for one event type. Dispatch order is registration order.
pub struct Emitter<E> {
    listeners: Mutex<BTreeMap<ListenerId, Listener<E>>>,
    next_id: AtomicU64,
}

impl<E> Emitter<E> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener.
    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().insert(id, Arc::new(listener));
        id
    }

    /// Deregister a listener. Returns false if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        self.listeners.lock().remove(&id).is_some()
    }

    /// Deliver an event to every listener registered at the time of the call.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self.listeners.lock().values().cloned().collect();
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}
