//! Optional reactive-dependency tracking.
//!
//! Cursors declare reads through [`ReactiveDependency::depend`] and signal
//! mutation through [`ReactiveDependency::changed`]. Subscriptions use
//! [`ReactiveDependency::on_invalidate`] on their lifecycle context to stop
//! themselves when the context is torn down. Hosts without a reactive
//! framework use [`NoopDependency`].

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// One-shot callback run when a dependency is invalidated.
pub type InvalidateCallback = Box<dyn FnOnce() + Send>;

/// Dependency-tracking primitive consumed by cursors and subscriptions.
pub trait ReactiveDependency: Send + Sync {
    /// Register the current computation as a reader.
    fn depend(&self);

    /// Invalidate every reader.
    fn changed(&self);

    /// Run `callback` on the next invalidation.
    fn on_invalidate(&self, callback: InvalidateCallback);
}

/// Dependency that tracks nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDependency;

impl ReactiveDependency for NoopDependency {
    fn depend(&self) {}

    fn changed(&self) {}

    fn on_invalidate(&self, _callback: InvalidateCallback) {}
}

/// In-process dependency: counts reads and invalidations, and fires
/// registered callbacks once per invalidation.
#[derive(Default)]
pub struct Dependency {
    reads: AtomicU64,
    version: AtomicU64,
    callbacks: Mutex<Vec<InvalidateCallback>>,
}

impl Dependency {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `depend()` calls seen.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of invalidations so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Number of callbacks waiting for the next invalidation.
    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.lock().len()
    }
}

impl ReactiveDependency for Dependency {
    fn depend(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }

    fn changed(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            callback();
        }
    }

    fn on_invalidate(&self, callback: InvalidateCallback) {
        self.callbacks.lock().push(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_callbacks_fire_once() {
        let dep = Dependency::new();
        let hits = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&hits);
        dep.on_invalidate(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(dep.pending_callbacks(), 1);

        dep.changed();
        dep.changed();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(dep.version(), 2);
        assert_eq!(dep.pending_callbacks(), 0);
    }

    #[test]
    fn test_depend_counts_reads() {
        let dep = Dependency::new();
        dep.depend();
        dep.depend();
        assert_eq!(dep.reads(), 2);
    }
}
