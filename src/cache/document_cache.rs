//! Keyed document container with holder accounting and change events.

use crate::events::{Emitter, ListenerId};
use crate::query::Predicate;
use crate::types::{Document, DocumentId, SubscriptionId};
use parking_lot::{ReentrantMutex, RwLock};
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

/// Options for [`DocumentCache::add`].
#[derive(Clone, Copy, Debug, Default)]
pub struct AddOptions {
    /// Replace the stored document when the key already exists.
    /// Without it, adding an existing key leaves the entry untouched.
    pub merge: bool,
}

impl AddOptions {
    pub fn merge() -> Self {
        Self { merge: true }
    }
}

/// Point-in-time view of a cache entry.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub document: Document,
    pub holders: BTreeSet<SubscriptionId>,
}

/// Mutation events emitted by the cache.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheEvent {
    Added(Document),
    /// Carries the last known version of the removed document.
    Removed(Document),
    Changed {
        document: Document,
        previous: Document,
    },
}

impl CacheEvent {
    /// The document the event is about (current version for changes).
    pub fn document(&self) -> &Document {
        match self {
            CacheEvent::Added(doc) | CacheEvent::Removed(doc) => doc,
            CacheEvent::Changed { document, .. } => document,
        }
    }
}

struct Slot {
    document: Document,
    holders: BTreeSet<SubscriptionId>,
    /// Insertion order, used for unsorted iteration.
    order: u64,
}

impl Slot {
    fn snapshot(&self) -> CacheEntry {
        CacheEntry {
            document: self.document.clone(),
            holders: self.holders.clone(),
        }
    }
}

#[derive(Default)]
struct Entries {
    slots: HashMap<DocumentId, Slot>,
    /// Reverse holder index: subscription -> documents it keeps alive.
    held_by: HashMap<SubscriptionId, BTreeSet<DocumentId>>,
    next_order: u64,
}

impl Entries {
    fn unlink_holder(&mut self, holder: SubscriptionId, id: &DocumentId) {
        if let Some(held) = self.held_by.get_mut(&holder) {
            held.remove(id);
            if held.is_empty() {
                self.held_by.remove(&holder);
            }
        }
    }

    fn take_slot(&mut self, id: &DocumentId) -> Option<Slot> {
        let slot = self.slots.remove(id)?;
        for holder in &slot.holders {
            self.unlink_holder(*holder, id);
        }
        Some(slot)
    }
}

/// Process-wide cache of documents held by subscriptions.
pub struct DocumentCache {
    entries: RwLock<Entries>,
    events: Emitter<CacheEvent>,
    /// Serializes mutate-then-notify so listeners observe mutations in order.
    /// Reentrant: a listener may itself mutate the cache.
    write_lock: ReentrantMutex<()>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            events: Emitter::new(),
            write_lock: ReentrantMutex::new(()),
        }
    }

    // --- Mutation ---

    /// Insert a document, or replace it wholesale when `merge` is set.
    ///
    /// Emits `Added` for a new key and `Changed` when a merge altered the
    /// stored document.
    ///
    /// This is the raw keyed-container insert: a new entry starts with no
    /// holders and is never evicted by [`release`](Self::release). Callers
    /// that own such an entry must [`hold`](Self::hold) it or
    /// [`remove`](Self::remove) it themselves. Subscriptions write through
    /// [`upsert_held`](Self::upsert_held), which keeps every entry held.
    pub fn add(&self, document: Document, options: AddOptions) -> CacheEntry {
        self.write(document, options.merge, None)
    }

    /// Merge a document in and register `holder` on its entry in one step.
    pub fn upsert_held(&self, document: Document, holder: SubscriptionId) -> CacheEntry {
        self.write(document, true, Some(holder))
    }

    fn write(&self, document: Document, merge: bool, holder: Option<SubscriptionId>) -> CacheEntry {
        let _guard = self.write_lock.lock();

        let (entry, event) = {
            let mut guard = self.entries.write();
            let entries = &mut *guard;
            let id = document.id.clone();

            let (slot, event) = match entries.slots.entry(id.clone()) {
                Entry::Occupied(occupied) => {
                    let slot = occupied.into_mut();
                    let event = if merge && slot.document != document {
                        let previous = std::mem::replace(&mut slot.document, document);
                        Some(CacheEvent::Changed {
                            document: slot.document.clone(),
                            previous,
                        })
                    } else {
                        None
                    };
                    (slot, event)
                }
                Entry::Vacant(vacant) => {
                    let order = entries.next_order;
                    entries.next_order += 1;
                    let added = CacheEvent::Added(document.clone());
                    let slot = vacant.insert(Slot {
                        document,
                        holders: BTreeSet::new(),
                        order,
                    });
                    (slot, Some(added))
                }
            };

            if let Some(holder) = holder {
                slot.holders.insert(holder);
                entries.held_by.entry(holder).or_default().insert(id);
            }

            (slot.snapshot(), event)
        };

        if let Some(event) = event {
            trace!(document = %entry.document.id, "cache write");
            self.events.emit(&event);
        }
        entry
    }

    /// Remove a document regardless of its holders.
    ///
    /// Every holder loses its hold at once. Returns the removed entry, with
    /// the holder set it had, or `None` when absent.
    pub fn remove(&self, id: &DocumentId) -> Option<CacheEntry> {
        let _guard = self.write_lock.lock();

        let slot = self.entries.write().take_slot(id)?;
        trace!(document = %id, holders = slot.holders.len(), "cache remove");
        self.events.emit(&CacheEvent::Removed(slot.document.clone()));
        Some(CacheEntry {
            document: slot.document,
            holders: slot.holders,
        })
    }

    /// Register `holder` on an existing entry. Returns false if absent.
    pub fn hold(&self, id: &DocumentId, holder: SubscriptionId) -> bool {
        let _guard = self.write_lock.lock();
        let mut guard = self.entries.write();
        let entries = &mut *guard;
        match entries.slots.get_mut(id) {
            Some(slot) => {
                slot.holders.insert(holder);
                entries.held_by.entry(holder).or_default().insert(id.clone());
                true
            }
            None => false,
        }
    }

    /// Drop `holder`'s hold on one entry, evicting it if no holders remain.
    /// Returns true if the entry was evicted.
    pub fn release(&self, id: &DocumentId, holder: SubscriptionId) -> bool {
        let _guard = self.write_lock.lock();

        let evicted = {
            let mut entries = self.entries.write();
            entries.unlink_holder(holder, id);
            let empty = match entries.slots.get_mut(id) {
                Some(slot) => slot.holders.remove(&holder) && slot.holders.is_empty(),
                None => false,
            };
            if empty {
                entries.slots.remove(id).map(|slot| slot.document)
            } else {
                None
            }
        };

        match evicted {
            Some(document) => {
                trace!(document = %id, "cache evict");
                self.events.emit(&CacheEvent::Removed(document));
                true
            }
            None => false,
        }
    }

    /// Drop every hold of `holder`. Returns the number of evicted entries.
    pub fn release_all(&self, holder: SubscriptionId) -> usize {
        let _guard = self.write_lock.lock();

        let held = self
            .entries
            .write()
            .held_by
            .remove(&holder)
            .unwrap_or_default();

        held.iter()
            .filter(|id| self.release(id, holder))
            .count()
    }

    // --- Reads ---

    pub fn get(&self, id: &DocumentId) -> Option<CacheEntry> {
        self.entries.read().slots.get(id).map(Slot::snapshot)
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.entries.read().slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().slots.is_empty()
    }

    /// Subscriptions currently keeping `id` alive.
    pub fn holders(&self, id: &DocumentId) -> Option<BTreeSet<SubscriptionId>> {
        self.entries.read().slots.get(id).map(|slot| slot.holders.clone())
    }

    /// Documents currently held by `holder`.
    pub fn held_by(&self, holder: SubscriptionId) -> Vec<DocumentId> {
        self.entries
            .read()
            .held_by
            .get(&holder)
            .map(|held| held.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All documents in insertion order.
    pub fn documents(&self) -> Vec<Document> {
        let entries = self.entries.read();
        let mut slots: Vec<&Slot> = entries.slots.values().collect();
        slots.sort_by_key(|slot| slot.order);
        slots.into_iter().map(|slot| slot.document.clone()).collect()
    }

    /// Documents satisfying `predicate`, in insertion order.
    pub fn filter<P>(&self, predicate: &P) -> Vec<Document>
    where
        P: Predicate + ?Sized,
    {
        self.documents()
            .into_iter()
            .filter(|doc| predicate.test(doc))
            .collect()
    }

    /// Visit every document in insertion order.
    pub fn each<F>(&self, mut f: F)
    where
        F: FnMut(&Document),
    {
        for doc in self.documents() {
            f(&doc);
        }
    }

    // --- Events ---

    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.events.on(listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.events.off(id)
    }

    pub fn listener_count(&self) -> usize {
        self.events.listener_count()
    }
}

impl Default for DocumentCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn record_events(cache: &DocumentCache) -> Arc<Mutex<Vec<CacheEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        cache.on(move |event| sink.lock().push(event.clone()));
        seen
    }

    #[test]
    fn test_add_then_merge() {
        let cache = DocumentCache::new();
        let events = record_events(&cache);

        cache.add(Document::new("a").with("v", 1), AddOptions::merge());
        cache.add(Document::new("a").with("v", 2), AddOptions::merge());

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], CacheEvent::Added(d) if d.fields["v"] == 1));
        match &events[1] {
            CacheEvent::Changed { document, previous } => {
                assert_eq!(document.fields["v"], 2);
                assert_eq!(previous.fields["v"], 1);
            }
            other => panic!("Expected Changed, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_replaces_wholesale() {
        let cache = DocumentCache::new();
        cache.add(Document::new("a").with("x", 1).with("y", 2), AddOptions::merge());
        let entry = cache.add(Document::new("a").with("x", 5), AddOptions::merge());

        assert_eq!(entry.document.fields["x"], 5);
        assert!(!entry.document.fields.contains_key("y"));
    }

    #[test]
    fn test_add_without_merge_keeps_existing() {
        let cache = DocumentCache::new();
        let events = record_events(&cache);

        cache.add(Document::new("a").with("v", 1), AddOptions::default());
        let entry = cache.add(Document::new("a").with("v", 2), AddOptions::default());

        assert_eq!(entry.document.fields["v"], 1);
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn test_identical_merge_is_silent() {
        let cache = DocumentCache::new();
        let events = record_events(&cache);

        cache.add(Document::new("a").with("v", 1), AddOptions::merge());
        cache.add(Document::new("a").with("v", 1), AddOptions::merge());

        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn test_remove_returns_entry_with_holders() {
        let cache = DocumentCache::new();
        cache.upsert_held(Document::new("a"), SubscriptionId(1));
        cache.upsert_held(Document::new("a"), SubscriptionId(2));

        let removed = cache.remove(&"a".into()).unwrap();
        assert_eq!(removed.holders.len(), 2);
        assert!(cache.is_empty());
        assert!(cache.held_by(SubscriptionId(1)).is_empty());
        assert!(cache.held_by(SubscriptionId(2)).is_empty());
        assert!(cache.remove(&"a".into()).is_none());
    }

    #[test]
    fn test_release_evicts_last_holder_only() {
        let cache = DocumentCache::new();
        let events = record_events(&cache);
        cache.upsert_held(Document::new("a"), SubscriptionId(1));
        cache.upsert_held(Document::new("a"), SubscriptionId(2));

        assert!(!cache.release(&"a".into(), SubscriptionId(1)));
        assert!(cache.contains(&"a".into()));
        assert!(cache.release(&"a".into(), SubscriptionId(2)));
        assert!(!cache.contains(&"a".into()));

        assert!(matches!(events.lock().last(), Some(CacheEvent::Removed(d)) if d.id.0 == "a"));
    }

    #[test]
    fn test_release_by_non_holder_is_noop() {
        let cache = DocumentCache::new();
        cache.upsert_held(Document::new("a"), SubscriptionId(1));
        assert!(!cache.release(&"a".into(), SubscriptionId(9)));
        assert!(cache.contains(&"a".into()));
    }

    #[test]
    fn test_release_all() {
        let cache = DocumentCache::new();
        cache.upsert_held(Document::new("a"), SubscriptionId(1));
        cache.upsert_held(Document::new("b"), SubscriptionId(1));
        cache.upsert_held(Document::new("b"), SubscriptionId(2));

        assert_eq!(cache.release_all(SubscriptionId(1)), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.holders(&"b".into()).unwrap().len(), 1);
        assert_eq!(cache.release_all(SubscriptionId(1)), 0);
    }

    #[test]
    fn test_listeners_see_mutated_cache() {
        let cache = Arc::new(DocumentCache::new());
        let observed = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&cache);
        let sink = Arc::clone(&observed);
        cache.on(move |event| {
            if let Some(cache) = weak.upgrade() {
                sink.lock().push(cache.contains(&event.document().id));
            }
        });

        cache.upsert_held(Document::new("a"), SubscriptionId(1));
        cache.release_all(SubscriptionId(1));

        assert_eq!(*observed.lock(), vec![true, false]);
    }

    #[test]
    fn test_unheld_add_stays_until_held_and_released() {
        let cache = DocumentCache::new();
        let id: DocumentId = "raw".into();
        let entry = cache.add(Document::new("raw"), AddOptions::default());
        assert!(entry.holders.is_empty());

        assert!(!cache.release(&id, SubscriptionId(1)));
        assert_eq!(cache.release_all(SubscriptionId(1)), 0);
        assert!(cache.contains(&id));

        assert!(cache.hold(&id, SubscriptionId(1)));
        assert!(cache.release(&id, SubscriptionId(1)));
        assert!(!cache.contains(&id));
    }

    #[test]
    fn test_filter_in_insertion_order() {
        let cache = DocumentCache::new();
        for (id, n) in [("c", 1), ("a", 2), ("b", 3)] {
            cache.add(Document::new(id).with("n", n), AddOptions::merge());
        }
        let odd: Vec<String> = cache
            .filter(&|d: &Document| d.fields["n"].as_i64().unwrap_or(0) % 2 == 1)
            .into_iter()
            .map(|d| d.id.0)
            .collect();
        assert_eq!(odd, vec!["c", "b"]);

        let mut all = Vec::new();
        cache.each(|d| all.push(d.id.0.clone()));
        assert_eq!(all, vec!["c", "a", "b"]);
    }
}
