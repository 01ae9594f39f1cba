//! Live materialized view over the document cache.

use super::options::{CursorOptions, Sort, Transform};
use super::subset::{Subset, Upsert};
use crate::cache::{CacheEvent, DocumentCache};
use crate::events::{Emitter, ListenerId};
use crate::query::Predicate;
use crate::reactive::{NoopDependency, ReactiveDependency};
use crate::types::{Document, DocumentId, SortKey};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Events emitted by a cursor. Document payloads are transformed.
#[derive(Clone, Debug, PartialEq)]
pub enum CursorEvent {
    Added(Document),
    Removed(Document),
    Changed {
        document: Document,
        previous: Document,
    },
    Refresh,
    Attach,
    Close,
}

struct CursorState {
    subset: Subset,
    /// Cache listener while attached.
    listener: Option<ListenerId>,
    closed: bool,
}

struct CursorInner {
    cache: Arc<DocumentCache>,
    predicate: Arc<dyn Predicate>,
    sort: Option<Sort>,
    transform: Option<Transform>,
    dependency: Arc<dyn ReactiveDependency>,
    state: Mutex<CursorState>,
    events: Emitter<CursorEvent>,
}

impl CursorInner {
    fn output(&self, document: Document) -> Document {
        match &self.transform {
            Some(transform) => transform(document),
            None => document,
        }
    }

    /// Sort key of the document as it leaves the cursor.
    fn sort_key(&self, document: &Document) -> Option<SortKey> {
        let sort = self.sort.as_ref()?;
        Some(match &self.transform {
            Some(transform) => sort.key_of(&transform(document.clone())),
            None => sort.key_of(document),
        })
    }

    fn upsert(&self, document: Document) {
        let key = self.sort_key(&document);
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.subset.upsert(document.clone(), key)
        };

        let event = match outcome {
            Upsert::Inserted => CursorEvent::Added(self.output(document)),
            Upsert::Updated { previous } => CursorEvent::Changed {
                document: self.output(document),
                previous: self.output(previous),
            },
            Upsert::Unchanged => return,
        };
        self.events.emit(&event);
        self.dependency.changed();
    }

    fn remove(&self, id: &DocumentId) {
        let removed = self.state.lock().subset.remove(id);
        if let Some(document) = removed {
            self.events.emit(&CursorEvent::Removed(self.output(document)));
            self.dependency.changed();
        }
    }

    fn on_cache_event(&self, event: &CacheEvent) {
        match event {
            CacheEvent::Added(document) => {
                if self.predicate.test(document) {
                    self.upsert(document.clone());
                }
            }
            // Absent from the cache means absent from every cursor.
            CacheEvent::Removed(document) => self.remove(&document.id),
            CacheEvent::Changed { document, .. } => {
                if self.predicate.test(document) {
                    self.upsert(document.clone());
                } else {
                    self.remove(&document.id);
                }
            }
        }
    }

    /// Recompute the subset from the cache and emit the differences.
    /// Returns false when the cursor is closed.
    fn sync(&self) -> bool {
        let matching = self.cache.filter(self.predicate.as_ref());

        let mut next = Subset::default();
        for document in matching {
            let key = self.sort_key(&document);
            next.upsert(document, key);
        }

        let previous = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            std::mem::replace(&mut state.subset, next)
        };

        let mut events = Vec::new();
        let state = self.state.lock();
        for old in previous.documents() {
            if state.subset.get(&old.id).is_none() {
                events.push(CursorEvent::Removed(self.output(old.clone())));
            }
        }
        for current in state.subset.documents() {
            match previous.get(&current.id) {
                None => events.push(CursorEvent::Added(self.output(current.clone()))),
                Some(old) if old != current => events.push(CursorEvent::Changed {
                    document: self.output(current.clone()),
                    previous: self.output(old.clone()),
                }),
                Some(_) => {}
            }
        }
        drop(state);

        if !events.is_empty() {
            for event in &events {
                self.events.emit(event);
            }
            self.dependency.changed();
        }
        true
    }
}

impl Drop for CursorInner {
    fn drop(&mut self) {
        if let Some(id) = self.state.get_mut().listener.take() {
            self.cache.off(id);
        }
    }
}

/// A live, filtered and sorted view over a [`DocumentCache`].
///
/// Dropping the cursor detaches it from the cache.
pub struct Cursor {
    inner: Arc<CursorInner>,
}

impl Cursor {
    /// Build a cursor, take the initial snapshot, and attach if `keepalive`.
    pub fn new(
        cache: Arc<DocumentCache>,
        predicate: Arc<dyn Predicate>,
        options: CursorOptions,
    ) -> Self {
        let CursorOptions {
            sort,
            transform,
            keepalive,
            dependency,
        } = options;

        let cursor = Self {
            inner: Arc::new(CursorInner {
                cache,
                predicate,
                sort,
                transform,
                dependency: dependency
                    .unwrap_or_else(|| Arc::new(NoopDependency) as Arc<dyn ReactiveDependency>),
                state: Mutex::new(CursorState {
                    subset: Subset::default(),
                    listener: None,
                    closed: false,
                }),
                events: Emitter::new(),
            }),
        };

        cursor.refresh();
        if keepalive {
            cursor.attach();
        }
        cursor
    }

    /// Recompute the subset from the cache. A no-op once closed.
    pub fn refresh(&self) -> &Self {
        if self.inner.sync() {
            self.inner.events.emit(&CursorEvent::Refresh);
        }
        self
    }

    /// Follow cache mutations live. A no-op when attached or closed.
    ///
    /// Resynchronizes with the cache, so mutations made while detached
    /// are not missed.
    pub fn attach(&self) -> &Self {
        {
            let mut state = self.inner.state.lock();
            if state.closed || state.listener.is_some() {
                return self;
            }
            let weak = Arc::downgrade(&self.inner);
            let id = self.inner.cache.on(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_cache_event(event);
                }
            });
            state.listener = Some(id);
        }

        self.inner.sync();
        debug!(documents = self.len_untracked(), "cursor attached");
        self.inner.events.emit(&CursorEvent::Attach);
        self
    }

    /// Detach, empty the subset and emit `Close`. Idempotent.
    pub fn close(&self) -> &Self {
        let (listener, cleared) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return self;
            }
            state.closed = true;
            (state.listener.take(), state.subset.clear())
        };

        if let Some(id) = listener {
            self.inner.cache.off(id);
        }
        trace!(cleared, "cursor closed");
        self.inner.events.emit(&CursorEvent::Close);
        if cleared > 0 {
            self.inner.dependency.changed();
        }
        self
    }

    pub fn is_attached(&self) -> bool {
        self.inner.state.lock().listener.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Transformed documents in sort order. Declares a read dependency.
    pub fn fetch(&self) -> Vec<Document> {
        self.inner.dependency.depend();
        let documents: Vec<Document> = self
            .inner
            .state
            .lock()
            .subset
            .documents()
            .cloned()
            .collect();
        documents
            .into_iter()
            .map(|document| self.inner.output(document))
            .collect()
    }

    /// Number of documents in the subset. Declares a read dependency.
    pub fn count(&self) -> usize {
        self.inner.dependency.depend();
        self.len_untracked()
    }

    fn len_untracked(&self) -> usize {
        self.inner.state.lock().subset.len()
    }

    pub fn for_each<F>(&self, f: F)
    where
        F: FnMut(Document),
    {
        self.fetch().into_iter().for_each(f);
    }

    pub fn map<T, F>(&self, f: F) -> Vec<T>
    where
        F: FnMut(Document) -> T,
    {
        self.fetch().into_iter().map(f).collect()
    }

    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&CursorEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Cursor")
            .field("documents", &state.subset.len())
            .field("attached", &state.listener.is_some())
            .field("closed", &state.closed)
            .field("sort", &self.inner.sort)
            .finish()
    }
}
