//! Database facade tying the cache, subscriptions and cursors together.

use crate::cache::DocumentCache;
use crate::cursor::{Cursor, CursorOptions};
use crate::error::Result;
use crate::feed::ChangeStream;
use crate::query::{Predicate, Query};
use crate::subscriptions::{SubscribeOptions, Subscription, SubscriptionEvent};
use crate::types::{Document, SubscriptionId};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

/// Database configuration.
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    /// Filter name meaning "every document". Default: `*`
    pub wildcard_filter: String,

    /// Longest single blocking step while waiting on a load.
    /// Default: 10ms
    pub poll_interval: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            wildcard_filter: "*".to_string(),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Subscriptions kept alive until they stop.
type Registry = Mutex<BTreeMap<SubscriptionId, Subscription>>;

/// Drop `id` from the registry once it is stopped and no replay is still
/// draining into the cache.
fn forget_if_finished(registry: &Weak<Registry>, id: SubscriptionId) {
    let Some(registry) = registry.upgrade() else {
        return;
    };
    let forgotten = {
        let mut subscriptions = registry.lock();
        let finished = subscriptions
            .get(&id)
            .map_or(false, |sub| sub.is_stopped() && !sub.is_loading());
        if finished {
            subscriptions.remove(&id)
        } else {
            None
        }
    };
    if forgotten.is_some() {
        debug!(subscription = %id, "subscription forgotten");
    }
}

/// Live views over an upstream change stream.
///
/// Owns the shared document cache. Subscriptions fill it from the change
/// stream; cursors read it.
pub struct Database {
    config: DatabaseConfig,
    cache: Arc<DocumentCache>,
    stream: Arc<dyn ChangeStream>,
    subscriptions: Arc<Registry>,
    next_id: AtomicU64,
}

impl Database {
    pub fn new(stream: Arc<dyn ChangeStream>, config: DatabaseConfig) -> Self {
        Self {
            config,
            cache: Arc::new(DocumentCache::new()),
            stream,
            subscriptions: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_stream(stream: Arc<dyn ChangeStream>) -> Self {
        Self::new(stream, DatabaseConfig::default())
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The shared document cache.
    pub fn cache(&self) -> &Arc<DocumentCache> {
        &self.cache
    }

    // --- Subscriptions ---

    /// Subscribe to a named filter (None = everything) and start loading.
    pub fn subscribe(&self, filter: Option<&str>) -> Subscription {
        self.subscribe_with(SubscribeOptions {
            filter: filter.map(str::to_string),
            ..Default::default()
        })
    }

    /// Subscribe with a load callback and/or a lifecycle context.
    ///
    /// Always creates a new subscription, even for a filter that already has
    /// one. When `context` is invalidated the subscription stops. The
    /// database lets go of the subscription as soon as it has stopped and
    /// any cancelled replay has drained.
    pub fn subscribe_with(&self, options: SubscribeOptions) -> Subscription {
        let SubscribeOptions {
            filter,
            on_load,
            context,
        } = options;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let subscription = Subscription::new(
            id,
            filter.as_deref(),
            Arc::clone(&self.cache),
            Arc::clone(&self.stream),
            &self.config,
        );
        self.subscriptions.lock().insert(id, subscription.clone());

        let registry = Arc::downgrade(&self.subscriptions);
        subscription.on(move |event| {
            if *event == SubscriptionEvent::Stop {
                forget_if_finished(&registry, id);
            }
        });

        if let Some(context) = context {
            let weak = subscription.downgrade();
            context.on_invalidate(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Subscription::from_inner(inner).stop();
                }
            }));
        }

        debug!(subscription = %id, filter = %subscription.filter(), "subscribed");
        let load = subscription.load();
        if let Some(callback) = on_load {
            load.on_resolve(callback);
        }
        // A replay cancelled by `stop()` finishes draining here.
        let registry = Arc::downgrade(&self.subscriptions);
        load.on_resolve(move |_| forget_if_finished(&registry, id));
        subscription
    }

    /// Drive every active subscription. Returns the number of feed events
    /// handled.
    pub fn pump(&self) -> usize {
        let active: Vec<Subscription> = self.subscriptions.lock().values().cloned().collect();
        active.iter().map(Subscription::pump).sum()
    }

    /// Number of subscriptions not yet stopped, counting stopped ones whose
    /// cancelled replay is still draining.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    // --- Cursors ---

    /// Open a cursor over documents matching a selector.
    pub fn find(&self, query: &Value, options: CursorOptions) -> Result<Cursor> {
        let query = Query::compile(query)?;
        Ok(self.find_by(Arc::new(query), options))
    }

    /// Open a cursor over documents matching an arbitrary predicate.
    pub fn find_by(&self, predicate: Arc<dyn Predicate>, options: CursorOptions) -> Cursor {
        Cursor::new(Arc::clone(&self.cache), predicate, options)
    }

    /// First matching document in cursor order.
    pub fn find_one(&self, query: &Value, options: CursorOptions) -> Result<Option<Document>> {
        let cursor = self.find(query, options)?;
        let first = cursor.fetch().into_iter().next();
        cursor.close();
        Ok(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ViewError;
    use crate::feed::MemoryStore;
    use crate::reactive::{Dependency, ReactiveDependency};
    use crate::subscriptions::SubscriptionState;
    use serde_json::json;

    fn setup() -> (Arc<MemoryStore>, Database) {
        let store = Arc::new(MemoryStore::default());
        let stream: Arc<dyn ChangeStream> = store.clone();
        (store, Database::with_stream(stream))
    }

    #[test]
    fn test_subscribe_autoloads() {
        let (store, db) = setup();
        store.put(Document::new("a").with("status", "open"));

        let sub = db.subscribe(None);
        assert_eq!(sub.state(), SubscriptionState::Loading);
        db.pump();
        assert!(sub.is_ready());
        assert_eq!(db.cache().len(), 1);
    }

    #[test]
    fn test_subscribe_always_creates_new() {
        let (_store, db) = setup();
        let a = db.subscribe(Some("*"));
        let b = db.subscribe(Some("*"));
        assert_ne!(a.id(), b.id());
        assert_eq!(db.subscription_count(), 2);
    }

    #[test]
    fn test_stop_forgets_subscription() {
        let (_store, db) = setup();
        let sub = db.subscribe(None);
        db.pump();
        sub.stop();
        assert_eq!(db.subscription_count(), 0);
    }

    #[test]
    fn test_stopped_subscriptions_released_without_pump() {
        let (store, db) = setup();
        store.put(Document::new("a"));

        for _ in 0..100 {
            let sub = db.subscribe(None);
            sub.load().wait(Duration::from_secs(1)).unwrap();
            sub.stop();
        }
        assert_eq!(db.subscription_count(), 0);
        assert!(db.cache().is_empty());
        assert_eq!(store.live_feed_count(), 0);
    }

    #[test]
    fn test_cancelled_replay_kept_until_drained() {
        let (store, db) = setup();
        store.put(Document::new("a"));

        let sub = db.subscribe(None);
        sub.stop();
        assert_eq!(db.subscription_count(), 1);

        assert_eq!(sub.load().wait(Duration::from_secs(1)), Ok(()));
        assert_eq!(db.subscription_count(), 0);
        assert!(db.cache().is_empty());
    }

    #[test]
    fn test_failed_load_is_forgotten() {
        let (_store, db) = setup();
        let sub = db.subscribe(Some("missing"));
        assert!(sub.is_stopped());
        assert_eq!(db.subscription_count(), 0);
    }

    #[test]
    fn test_on_load_callback() {
        let (_store, db) = setup();
        let loaded = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&loaded);
        db.subscribe_with(
            SubscribeOptions::default().with_on_load(move |r| *sink.lock() = Some(r.clone())),
        );
        assert!(loaded.lock().is_none());
        db.pump();
        assert_eq!(*loaded.lock(), Some(Ok(())));
    }

    #[test]
    fn test_context_invalidation_stops() {
        let (store, db) = setup();
        store.put(Document::new("a"));
        let context = Arc::new(Dependency::new());

        let sub = db.subscribe_with(SubscribeOptions::default().with_context(context.clone()));
        db.pump();
        assert_eq!(db.cache().len(), 1);

        context.changed();
        assert!(sub.is_stopped());
        assert!(db.cache().is_empty());
    }

    #[test]
    fn test_find_and_find_one() {
        let (store, db) = setup();
        store.put(Document::new("a").with("n", 2));
        store.put(Document::new("b").with("n", 1));
        db.subscribe(None);
        db.pump();

        let cursor = db
            .find(&json!({"n": {"$gte": 1}}), CursorOptions::default().sorted_by("n"))
            .unwrap();
        assert_eq!(cursor.map(|d| d.id.0), vec!["b", "a"]);

        let first = db
            .find_one(&json!({}), CursorOptions::default().sorted_by("n"))
            .unwrap();
        assert_eq!(first.map(|d| d.id.0), Some("b".to_string()));
        assert_eq!(db.find_one(&json!({"n": 9}), CursorOptions::default()).unwrap(), None);
        assert_eq!(db.cache().listener_count(), 0);
    }

    #[test]
    fn test_find_rejects_bad_query() {
        let (_store, db) = setup();
        let result = db.find(&json!({"n": {"$bogus": 1}}), CursorOptions::default());
        assert!(matches!(result, Err(ViewError::PredicateCompile(_))));
    }
}
