//! Subscriptions: reference-counted interest in a filtered change stream.
//!
//! A subscription replays the change stream's history into the shared
//! [`DocumentCache`](crate::cache::DocumentCache), becomes ready, then tails
//! the stream live. Every document it writes is held in the cache on its
//! behalf; stopping releases those holds and evicts documents nobody else
//! holds.
//!
//! Lifecycle:
//!
//! ```text
//! Idle --load()--> Loading --(history caught up)--> Ready --stop()--> Stopped
//! Loading --stop()--> Stopped      (replay drains, then is discarded; no Ready)
//! Ready --upstream error/complete--> Stopped
//! ```
//!
//! # Example
//!
//! ```ignore
//! let sub = db.subscribe(Some("open-tickets"));
//! sub.on(|event| {
//!     if let SubscriptionEvent::Ready = event {
//!         println!("caught up");
//!     }
//! });
//! sub.load().wait(Duration::from_secs(1))?;
//! // ... later
//! sub.stop();
//! ```

mod load;
mod subscription;
mod types;

pub use load::LoadHandle;
pub use subscription::Subscription;
pub use types::{LoadCallback, SubscribeOptions, SubscriptionEvent, SubscriptionState};
