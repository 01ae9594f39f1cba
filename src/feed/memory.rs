//! In-process document store with a sequence-numbered change log.

use super::types::{ChangeStream, Feed, FeedEvent, FeedOptions};
use crate::error::{Result, ViewError};
use crate::types::{ChangeRecord, Document, DocumentId, Sequence};
use crossbeam_channel::{bounded, unbounded, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Named upstream filter.
pub type FilterFn = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

/// Configuration for a [`MemoryStore`].
#[derive(Clone, Debug)]
pub struct MemoryStoreConfig {
    /// Max buffered events per live feed before the feed is dropped.
    /// Default: 1000
    pub live_buffer_size: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            live_buffer_size: 1000,
        }
    }
}

#[derive(Default)]
struct LogState {
    log: Vec<ChangeRecord>,
    /// Current, non-deleted documents.
    docs: HashMap<DocumentId, Document>,
    head: Sequence,
    filters: HashMap<String, FilterFn>,
}

impl LogState {
    fn resolve_filter(&self, name: Option<&str>) -> Result<Option<FilterFn>> {
        match name {
            None => Ok(None),
            Some(name) => self
                .filters
                .get(name)
                .cloned()
                .map(Some)
                .ok_or_else(|| ViewError::UnknownFilter(name.to_string())),
        }
    }
}

struct LiveFeed {
    filter: Option<FilterFn>,
    sender: Sender<FeedEvent>,
}

impl LiveFeed {
    fn matches(&self, record: &ChangeRecord) -> bool {
        self.filter.as_ref().map_or(true, |f| f(&record.document))
    }

    /// Returns false if the buffer is full or the consumer is gone.
    fn try_send(&self, event: FeedEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

type LiveFeeds = Arc<Mutex<HashMap<u64, LiveFeed>>>;

/// Document store whose change log can be replayed and tailed.
pub struct MemoryStore {
    config: MemoryStoreConfig,
    state: RwLock<LogState>,
    live: LiveFeeds,
    next_feed: AtomicU64,
    /// Orders log appends against live feed registration.
    write_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            state: RwLock::new(LogState::default()),
            live: Arc::new(Mutex::new(HashMap::new())),
            next_feed: AtomicU64::new(1),
            write_lock: Mutex::new(()),
        }
    }

    // --- Writes ---

    /// Insert or replace a document. Returns the sequence of the change.
    pub fn put(&self, document: Document) -> Sequence {
        let _lock = self.write_lock.lock();

        let mut document = document;
        document.deleted = false;

        let record = {
            let mut state = self.state.write();
            let sequence = state.head.next();
            state.head = sequence;
            state.docs.insert(document.id.clone(), document.clone());
            let record = ChangeRecord::upsert(sequence, document);
            state.log.push(record.clone());
            record
        };

        let sequence = record.sequence;
        self.broadcast(record);
        sequence
    }

    /// Delete a document. Fails if it does not exist.
    pub fn delete(&self, id: &DocumentId) -> Result<Sequence> {
        let _lock = self.write_lock.lock();

        let record = {
            let mut state = self.state.write();
            let document = state
                .docs
                .remove(id)
                .ok_or_else(|| ViewError::DocumentNotFound(id.clone()))?;
            let sequence = state.head.next();
            state.head = sequence;
            let record = ChangeRecord::deletion(sequence, document);
            state.log.push(record.clone());
            record
        };

        let sequence = record.sequence;
        self.broadcast(record);
        Ok(sequence)
    }

    /// Register a named filter usable in [`FeedOptions::filter`].
    pub fn register_filter<F>(&self, name: impl Into<String>, filter: F)
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        self.state.write().filters.insert(name.into(), Arc::new(filter));
    }

    // --- Reads ---

    pub fn get(&self, id: &DocumentId) -> Option<Document> {
        self.state.read().docs.get(id).cloned()
    }

    pub fn head(&self) -> Sequence {
        self.state.read().head
    }

    pub fn document_count(&self) -> usize {
        self.state.read().docs.len()
    }

    pub fn live_feed_count(&self) -> usize {
        self.live.lock().len()
    }

    // --- Live feed control ---

    /// Fail every live feed with `cause`.
    pub fn fail_live(&self, cause: impl Into<String>) {
        let cause = cause.into();
        let feeds: Vec<LiveFeed> = self.live.lock().drain().map(|(_, feed)| feed).collect();
        warn!(feeds = feeds.len(), cause = %cause, "failing live feeds");
        for feed in feeds {
            let _ = feed.sender.try_send(FeedEvent::Error(cause.clone()));
        }
    }

    /// End every live feed normally.
    pub fn complete_live(&self) {
        let head = self.head();
        let feeds: Vec<LiveFeed> = self.live.lock().drain().map(|(_, feed)| feed).collect();
        debug!(feeds = feeds.len(), "completing live feeds");
        for feed in feeds {
            let _ = feed.sender.try_send(FeedEvent::Complete {
                last_sequence: head,
            });
        }
    }

    /// Deliver a change to matching live feeds. Drops feeds that fail to receive.
    fn broadcast(&self, record: ChangeRecord) {
        let mut live = self.live.lock();
        let mut to_remove = Vec::new();

        for (id, feed) in live.iter() {
            if feed.matches(&record) && !feed.try_send(FeedEvent::Change(record.clone())) {
                to_remove.push(*id);
            }
        }

        // Dropping the sender disconnects the consumer once it drains.
        for id in to_remove {
            warn!(feed = id, "dropping live feed that cannot keep up");
            live.remove(&id);
        }
    }

    fn open_replay(&self, options: &FeedOptions) -> Result<Feed> {
        let state = self.state.read();
        let filter = state.resolve_filter(options.filter.as_deref())?;

        // Latest change per document, in sequence order.
        let mut seen = HashSet::new();
        let mut changes: Vec<&ChangeRecord> = state
            .log
            .iter()
            .rev()
            .take_while(|record| record.sequence > options.since)
            .filter(|record| seen.insert(record.document.id.clone()))
            .filter(|record| filter.as_ref().map_or(true, |f| f(&record.document)))
            .collect();
        changes.reverse();

        let (sender, receiver) = unbounded();
        for record in changes {
            let _ = sender.send(FeedEvent::Change(record.clone()));
        }
        let _ = sender.send(FeedEvent::Complete {
            last_sequence: state.head,
        });

        Ok(Feed::detached(receiver))
    }

    fn open_live(&self, options: &FeedOptions) -> Result<Feed> {
        let _lock = self.write_lock.lock();
        let state = self.state.read();
        let filter = state.resolve_filter(options.filter.as_deref())?;

        let backlog: Vec<&ChangeRecord> = state
            .log
            .iter()
            .filter(|record| record.sequence > options.since)
            .filter(|record| filter.as_ref().map_or(true, |f| f(&record.document)))
            .collect();

        let (sender, receiver) = bounded(self.config.live_buffer_size + backlog.len());
        for record in backlog {
            let _ = sender.try_send(FeedEvent::Change(record.clone()));
        }

        let id = self.next_feed.fetch_add(1, Ordering::SeqCst);
        self.live.lock().insert(id, LiveFeed { filter, sender });
        debug!(feed = id, since = ?options.since, "opened live feed");

        let registry = Arc::downgrade(&self.live);
        Ok(Feed::new(receiver, move || {
            if let Some(live) = registry.upgrade() {
                live.lock().remove(&id);
            }
        }))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryStoreConfig::default())
    }
}

impl ChangeStream for MemoryStore {
    fn open(&self, options: FeedOptions) -> Result<Feed> {
        if options.live {
            self.open_live(&options)
        } else {
            self.open_replay(&options)
        }
    }
}
