//! Shared outcome of a subscription load.

use super::subscription::SubscriptionInner;
use super::types::LoadCallback;
use crate::error::{Result, ViewError};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Outcome slot shared by every caller of one load.
pub(crate) struct LoadSlot {
    outcome: Mutex<Option<Result<()>>>,
    callbacks: Mutex<Vec<LoadCallback>>,
}

impl LoadSlot {
    pub(crate) fn pending() -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(None),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn resolved(result: Result<()>) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(Some(result)),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    /// Settle the load. Only the first resolution counts.
    pub(crate) fn resolve(&self, result: Result<()>) {
        {
            let mut outcome = self.outcome.lock();
            if outcome.is_some() {
                return;
            }
            *outcome = Some(result.clone());
        }
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            callback(&result);
        }
    }

    fn outcome(&self) -> Option<Result<()>> {
        self.outcome.lock().clone()
    }

    fn on_resolve(&self, callback: LoadCallback) {
        let outcome = self.outcome.lock();
        match outcome.as_ref() {
            Some(result) => {
                let result = result.clone();
                drop(outcome);
                callback(&result);
            }
            // Registered while holding the outcome lock so `resolve` cannot
            // settle in between and miss it.
            None => self.callbacks.lock().push(callback),
        }
    }
}

/// Handle to a subscription load.
///
/// Every concurrent `load()` of one subscription returns a handle on the same
/// outcome. A load cancelled by `stop()` resolves `Ok(())`.
#[derive(Clone)]
pub struct LoadHandle {
    slot: Arc<LoadSlot>,
    owner: Weak<SubscriptionInner>,
}

impl LoadHandle {
    pub(crate) fn new(slot: Arc<LoadSlot>, owner: Weak<SubscriptionInner>) -> Self {
        Self { slot, owner }
    }

    /// The outcome, if settled. Does not drive the feed.
    pub fn outcome(&self) -> Option<Result<()>> {
        self.slot.outcome()
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome().is_some()
    }

    /// Process whatever the feed has delivered, then report the outcome.
    pub fn poll(&self) -> Option<Result<()>> {
        if !self.is_resolved() {
            if let Some(owner) = self.owner.upgrade() {
                owner.pump();
            }
        }
        self.outcome()
    }

    /// Drive the feed until the load settles or `timeout` elapses.
    ///
    /// A timeout too large to represent (such as `Duration::MAX`) waits
    /// without a deadline.
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if let Some(outcome) = self.poll() {
                return outcome;
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if remaining.is_zero() {
                return Err(ViewError::Timeout);
            }
            match self.owner.upgrade() {
                Some(owner) => {
                    let step = remaining.min(owner.poll_interval());
                    owner.pump_blocking(step);
                }
                None => return Err(ViewError::Timeout),
            }
        }
    }

    /// Run `callback` once the load settles (immediately if it already has).
    pub fn on_resolve<F>(&self, callback: F)
    where
        F: FnOnce(&Result<()>) + Send + 'static,
    {
        self.slot.on_resolve(Box::new(callback));
    }

    /// True if both handles observe the same load.
    pub fn same_load(&self, other: &LoadHandle) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl std::fmt::Debug for LoadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadHandle")
            .field("outcome", &self.outcome())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_first_resolution_wins() {
        let slot = LoadSlot::pending();
        slot.resolve(Ok(()));
        slot.resolve(Err(ViewError::Timeout));
        assert_eq!(slot.outcome(), Some(Ok(())));
    }

    #[test]
    fn test_callbacks_before_and_after_resolve() {
        let slot = LoadSlot::pending();
        let hits = Arc::new(AtomicUsize::new(0));

        let early = Arc::clone(&hits);
        slot.on_resolve(Box::new(move |r| {
            assert!(r.is_err());
            early.fetch_add(1, Ordering::SeqCst);
        }));
        slot.resolve(Err(ViewError::Stream("boom".into())));

        let late = Arc::clone(&hits);
        slot.on_resolve(Box::new(move |r| {
            assert!(r.is_err());
            late.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_orphaned_handle_times_out() {
        let handle = LoadHandle::new(LoadSlot::pending(), Weak::new());
        assert_eq!(handle.poll(), None);
        assert_eq!(handle.wait(Duration::from_millis(5)), Err(ViewError::Timeout));
    }

    #[test]
    fn test_unbounded_wait_does_not_overflow() {
        let settled = LoadHandle::new(LoadSlot::resolved(Ok(())), Weak::new());
        assert_eq!(settled.wait(Duration::MAX), Ok(()));

        let orphaned = LoadHandle::new(LoadSlot::pending(), Weak::new());
        assert_eq!(orphaned.wait(Duration::MAX), Err(ViewError::Timeout));
    }
}
