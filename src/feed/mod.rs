//! Upstream change streams.
//!
//! A [`ChangeStream`] opens resumable feeds over a document store's change
//! log. A replay feed (`live = false`) delivers the changes after `since` and
//! finishes with [`FeedEvent::Complete`] carrying the head sequence. A live
//! feed keeps delivering changes until it is cancelled, and may end on its
//! own with `Error` or `Complete`.
//!
//! [`MemoryStore`] is an in-process store implementing the contract.
//!
//! # Example
//!
//! ```ignore
//! let store = MemoryStore::new(MemoryStoreConfig::default());
//! store.put(Document::new("a").with("status", "open"));
//!
//! let feed = store.open(FeedOptions::replay(Sequence(0), None))?;
//! while let Ok(event) = feed.receiver().recv() {
//!     match event {
//!         FeedEvent::Change(record) => println!("{:?}", record),
//!         FeedEvent::Complete { last_sequence } => break,
//!         FeedEvent::Error(cause) => return Err(ViewError::Stream(cause)),
//!     }
//! }
//! ```

mod memory;
mod types;

pub use memory::{FilterFn, MemoryStore, MemoryStoreConfig};
pub use types::{ChangeStream, Feed, FeedEvent, FeedOptions};
