//! Subscription state machine.

use super::load::{LoadHandle, LoadSlot};
use super::types::{SubscriptionEvent, SubscriptionState};
use crate::cache::DocumentCache;
use crate::database::DatabaseConfig;
use crate::error::{Result, ViewError};
use crate::events::{Emitter, ListenerId};
use crate::feed::{ChangeStream, Feed, FeedEvent, FeedOptions};
use crate::types::{ChangeRecord, DocumentId, Sequence, SubscriptionId};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Which feed an event came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Replay,
    Live,
}

struct SubState {
    phase: SubscriptionState,
    replay: Option<Feed>,
    live: Option<Feed>,
    /// `stop()` arrived while the replay was still running.
    stop_requested: bool,
    /// Outcome of the in-flight load.
    load: Option<Arc<LoadSlot>>,
    last_sequence: Sequence,
}

pub(crate) struct SubscriptionInner {
    id: SubscriptionId,
    filter: String,
    /// Filter passed upstream; None for the wildcard.
    upstream_filter: Option<String>,
    cache: Arc<DocumentCache>,
    stream: Arc<dyn ChangeStream>,
    poll_interval: Duration,
    state: Mutex<SubState>,
    events: Emitter<SubscriptionEvent>,
}

impl SubscriptionInner {
    pub(crate) fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn active_feed(&self) -> Option<(Phase, Receiver<FeedEvent>)> {
        let state = self.state.lock();
        if let Some(feed) = &state.replay {
            return Some((Phase::Replay, feed.receiver().clone()));
        }
        state
            .live
            .as_ref()
            .map(|feed| (Phase::Live, feed.receiver().clone()))
    }

    /// Handle every event already delivered. Returns how many were handled.
    pub(crate) fn pump(&self) -> usize {
        let mut handled = 0;
        while let Some((phase, receiver)) = self.active_feed() {
            match receiver.try_recv() {
                Ok(event) => self.handle(phase, event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.handle(phase, disconnected()),
            }
            handled += 1;
        }
        handled
    }

    /// Block up to `timeout` for the next event, then drain the rest.
    pub(crate) fn pump_blocking(&self, timeout: Duration) -> usize {
        let Some((phase, receiver)) = self.active_feed() else {
            return 0;
        };
        match receiver.recv_timeout(timeout) {
            Ok(event) => self.handle(phase, event),
            Err(RecvTimeoutError::Timeout) => return 0,
            Err(RecvTimeoutError::Disconnected) => self.handle(phase, disconnected()),
        }
        1 + self.pump()
    }

    fn handle(&self, phase: Phase, event: FeedEvent) {
        match (phase, event) {
            (_, FeedEvent::Change(record)) => {
                self.apply_change(&record);
                if phase == Phase::Live {
                    self.events.emit(&SubscriptionEvent::Change(record));
                }
            }
            (Phase::Replay, FeedEvent::Complete { last_sequence }) => {
                self.finish_replay(last_sequence)
            }
            (Phase::Replay, FeedEvent::Error(cause)) => self.fail_load(ViewError::Stream(cause)),
            (Phase::Live, FeedEvent::Complete { last_sequence }) => {
                debug!(subscription = %self.id, sequence = ?last_sequence, "live feed completed");
                self.events.emit(&SubscriptionEvent::Complete { last_sequence });
                self.stop();
            }
            (Phase::Live, FeedEvent::Error(cause)) => {
                warn!(subscription = %self.id, cause = %cause, "live feed failed");
                self.events.emit(&SubscriptionEvent::Error(cause));
                self.stop();
            }
        }
    }

    /// Same rule for replayed and live changes.
    fn apply_change(&self, record: &ChangeRecord) {
        {
            let mut state = self.state.lock();
            state.last_sequence = state.last_sequence.max(record.sequence);
        }

        let id = &record.document.id;
        if record.deleted {
            // Gone for everyone: removal clears every holder, not just ours.
            if let Some(entry) = self.cache.remove(id) {
                trace!(subscription = %self.id, document = %id, holders = entry.holders.len(), "document deleted upstream");
            }
        } else {
            self.cache.upsert_held(record.document.clone(), self.id);
        }
    }

    fn finish_replay(&self, last_sequence: Sequence) {
        let (cancelled, slot) = {
            let mut state = self.state.lock();
            state.replay = None;
            state.last_sequence = state.last_sequence.max(last_sequence);
            let cancelled = state.stop_requested;
            if !cancelled {
                state.phase = SubscriptionState::Ready;
            }
            (cancelled, state.load.take())
        };

        if cancelled {
            debug!(subscription = %self.id, "replay finished after stop; discarding");
            self.clean();
            if let Some(slot) = slot {
                slot.resolve(Ok(()));
            }
            return;
        }

        debug!(subscription = %self.id, sequence = ?last_sequence, "subscription ready");
        self.events.emit(&SubscriptionEvent::Ready);
        if let Some(slot) = slot {
            slot.resolve(Ok(()));
        }

        match self
            .stream
            .open(FeedOptions::live(last_sequence, self.upstream_filter.clone()))
        {
            Ok(feed) => {
                let mut state = self.state.lock();
                // A Ready listener may have stopped us already; the feed then
                // cancels on drop.
                if state.phase == SubscriptionState::Ready {
                    state.live = Some(feed);
                }
            }
            Err(e) => {
                warn!(subscription = %self.id, error = %e, "could not open live feed");
                self.events.emit(&SubscriptionEvent::Error(e.to_string()));
                self.stop();
            }
        }
    }

    fn fail_load(&self, error: ViewError) {
        let (already_stopped, slot) = {
            let mut state = self.state.lock();
            state.replay = None;
            let already_stopped = state.phase == SubscriptionState::Stopped;
            state.phase = SubscriptionState::Stopped;
            (already_stopped, state.load.take())
        };

        warn!(subscription = %self.id, error = %error, "subscription load failed");
        self.clean();
        self.events.emit(&SubscriptionEvent::Error(error.to_string()));
        if !already_stopped {
            self.events.emit(&SubscriptionEvent::Stop);
        }
        if let Some(slot) = slot {
            slot.resolve(Err(error));
        }
    }

    /// Cancel the live feed and release every hold. Idempotent.
    fn clean(&self) {
        let live = self.state.lock().live.take();
        if let Some(mut feed) = live {
            feed.cancel();
        }

        let evicted = self.cache.release_all(self.id);
        if evicted > 0 {
            debug!(subscription = %self.id, evicted, "released cached documents");
        }
    }

    pub(crate) fn stop(&self) {
        let previous = {
            let mut state = self.state.lock();
            let previous = state.phase;
            match previous {
                SubscriptionState::Stopped => return,
                SubscriptionState::Loading => state.stop_requested = true,
                _ => {}
            }
            state.phase = SubscriptionState::Stopped;
            previous
        };

        self.clean();
        debug!(subscription = %self.id, from = ?previous, "subscription stopped");
        self.events.emit(&SubscriptionEvent::Stop);
    }
}

fn disconnected() -> FeedEvent {
    FeedEvent::Error("change feed disconnected".to_string())
}

/// Handle to a subscription. Clones share the same subscription.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        filter: Option<&str>,
        cache: Arc<DocumentCache>,
        stream: Arc<dyn ChangeStream>,
        config: &DatabaseConfig,
    ) -> Self {
        let filter = match filter {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => config.wildcard_filter.clone(),
        };
        let upstream_filter = (filter != config.wildcard_filter).then(|| filter.clone());

        Self {
            inner: Arc::new(SubscriptionInner {
                id,
                filter,
                upstream_filter,
                cache,
                stream,
                poll_interval: config.poll_interval,
                state: Mutex::new(SubState {
                    phase: SubscriptionState::Idle,
                    replay: None,
                    live: None,
                    stop_requested: false,
                    load: None,
                    last_sequence: Sequence::default(),
                }),
                events: Emitter::new(),
            }),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.inner.id
    }

    /// Filter name (the wildcard when none was given).
    pub fn filter(&self) -> &str {
        &self.inner.filter
    }

    pub fn state(&self) -> SubscriptionState {
        self.inner.state.lock().phase
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SubscriptionState::Ready
    }

    /// True while a replay is in flight, including one cancelled by `stop()`.
    pub fn is_loading(&self) -> bool {
        let state = self.inner.state.lock();
        state.phase == SubscriptionState::Loading || state.replay.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == SubscriptionState::Stopped
    }

    /// Highest sequence number seen so far.
    pub fn last_sequence(&self) -> Sequence {
        self.inner.state.lock().last_sequence
    }

    /// Documents this subscription currently keeps in the cache.
    pub fn held_documents(&self) -> Vec<DocumentId> {
        self.inner.cache.held_by(self.inner.id)
    }

    /// Start replaying history.
    ///
    /// Resolves immediately when already ready; returns the in-flight load
    /// when one is running. A stopped subscription is never reloaded.
    pub fn load(&self) -> LoadHandle {
        let owner = Arc::downgrade(&self.inner);
        let mut state = self.inner.state.lock();

        if let Some(slot) = &state.load {
            return LoadHandle::new(Arc::clone(slot), owner);
        }
        match state.phase {
            SubscriptionState::Ready => {
                return LoadHandle::new(LoadSlot::resolved(Ok(())), owner);
            }
            SubscriptionState::Stopped => {
                let stopped = Err(ViewError::SubscriptionStopped(self.inner.id));
                return LoadHandle::new(LoadSlot::resolved(stopped), owner);
            }
            SubscriptionState::Idle | SubscriptionState::Loading => {}
        }

        let slot = LoadSlot::pending();
        state.phase = SubscriptionState::Loading;
        state.load = Some(Arc::clone(&slot));

        let options = FeedOptions::replay(Sequence(0), self.inner.upstream_filter.clone());
        match self.inner.stream.open(options) {
            Ok(feed) => {
                debug!(subscription = %self.inner.id, filter = %self.inner.filter, "replaying history");
                state.replay = Some(feed);
            }
            Err(e) => {
                drop(state);
                self.inner.fail_load(e);
            }
        }

        LoadHandle::new(slot, owner)
    }

    /// Handle every feed event delivered so far. Returns the number handled.
    pub fn pump(&self) -> usize {
        self.inner.pump()
    }

    /// Stop, release held documents and emit `Stop`. Idempotent.
    ///
    /// During a replay the replay keeps draining and is discarded once it
    /// completes; `Ready` is never emitted.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SubscriptionEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<SubscriptionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<SubscriptionInner>) -> Self {
        Self { inner }
    }

    /// Wait for the current load, driving the feed meanwhile.
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        self.load().wait(timeout)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("filter", &self.inner.filter)
            .field("state", &self.state())
            .finish()
    }
}
