//! # docview
//!
//! Live, filtered views over a replicated document set.
//!
//! ## Core Concepts
//!
//! - **Change stream**: upstream source of ordered document changes, replayed
//!   from a sequence number and then tailed live
//! - **Cache**: one shared copy of every document some subscription holds
//! - **Subscriptions**: reference-counted interest in a filtered stream
//! - **Cursors**: live, sorted projections of the cache
//!
//! ## Example
//!
//! ```ignore
//! use docview::{CursorOptions, Database, Document, MemoryStore};
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let store = Arc::new(MemoryStore::default());
//! store.put(Document::new("t1").with("status", "open").with("rank", 2));
//!
//! let db = Database::with_stream(store.clone());
//! let sub = db.subscribe(None);
//! sub.load().wait(Duration::from_secs(1))?;
//!
//! let open = db.find(
//!     &json!({"status": "open"}),
//!     CursorOptions::default().sorted_by("rank").keepalive(),
//! )?;
//! open.on(|event| println!("{event:?}"));
//!
//! store.put(Document::new("t2").with("status", "open").with("rank", 1));
//! db.pump();
//! assert_eq!(open.count(), 2);
//! ```

pub mod cache;
pub mod cursor;
pub mod database;
pub mod error;
pub mod events;
pub mod feed;
pub mod query;
pub mod reactive;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use cache::{AddOptions, CacheEntry, CacheEvent, DocumentCache};
pub use cursor::{Cursor, CursorEvent, CursorOptions, Sort};
pub use database::{Database, DatabaseConfig};
pub use error::{Result, ViewError};
pub use events::{Emitter, ListenerId};
pub use feed::{ChangeStream, Feed, FeedEvent, FeedOptions, MemoryStore, MemoryStoreConfig};
pub use query::{Predicate, Query};
pub use reactive::{Dependency, NoopDependency, ReactiveDependency};
pub use subscriptions::{
    LoadHandle, SubscribeOptions, Subscription, SubscriptionEvent, SubscriptionState,
};
pub use types::{ChangeRecord, Document, DocumentId, Sequence, SubscriptionId};
