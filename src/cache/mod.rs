//! Shared, reference-counted document cache.
//!
//! The cache holds the latest known version of every document some active
//! subscription is interested in. Each entry records which subscriptions
//! keep it alive; an entry is evicted as soon as its last holder lets go.
//! Cursors observe the cache through its events but never hold entries.
//!
//! Mutation is synchronous: listeners run before the mutating call returns
//! and always see the cache already mutated.

mod document_cache;

pub use document_cache::{AddOptions, CacheEntry, CacheEvent, DocumentCache};
