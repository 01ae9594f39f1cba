//! Change stream contract.

use crate::error::Result;
use crate::types::{ChangeRecord, Sequence};
use crossbeam_channel::Receiver;

/// Options for opening a feed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeedOptions {
    /// Deliver changes with a sequence strictly greater than this.
    pub since: Sequence,

    /// Named upstream filter (None = every document).
    pub filter: Option<String>,

    /// Keep tailing after the head is reached.
    pub live: bool,
}

impl FeedOptions {
    /// Bounded replay up to the current head.
    pub fn replay(since: Sequence, filter: Option<String>) -> Self {
        Self {
            since,
            filter,
            live: false,
        }
    }

    /// Unbounded tail from `since`.
    pub fn live(since: Sequence, filter: Option<String>) -> Self {
        Self {
            since,
            filter,
            live: true,
        }
    }
}

/// Events delivered by a feed.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedEvent {
    Change(ChangeRecord),

    /// The feed finished. For replays, `last_sequence` is the head reached.
    Complete { last_sequence: Sequence },

    /// The feed failed and will deliver nothing more.
    Error(String),
}

/// An open feed: a channel of events plus a way to cancel it.
///
/// Dropping the feed cancels it.
pub struct Feed {
    receiver: Receiver<FeedEvent>,
    canceller: Option<Box<dyn FnOnce() + Send>>,
    cancelled: bool,
}

impl Feed {
    /// A feed whose producer is told about cancellation through `canceller`.
    pub fn new<F>(receiver: Receiver<FeedEvent>, canceller: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            receiver,
            canceller: Some(Box::new(canceller)),
            cancelled: false,
        }
    }

    /// A feed with nothing to cancel (its producer is already done).
    pub fn detached(receiver: Receiver<FeedEvent>) -> Self {
        Self {
            receiver,
            canceller: None,
            cancelled: false,
        }
    }

    pub fn receiver(&self) -> &Receiver<FeedEvent> {
        &self.receiver
    }

    /// Stop the producer. Idempotent.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        if let Some(canceller) = self.canceller.take() {
            canceller();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Drop for Feed {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("pending", &self.receiver.len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Source of resumable change feeds.
pub trait ChangeStream: Send + Sync {
    fn open(&self, options: FeedOptions) -> Result<Feed>;
}
