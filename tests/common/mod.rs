//! Shared helpers for integration tests.

#![allow(dead_code)]

use crossbeam_channel::{unbounded, Sender};
use docview::{
    ChangeRecord, ChangeStream, Document, Feed, FeedEvent, FeedOptions, Result, Sequence,
    ViewError,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

struct OpenedFeed {
    options: FeedOptions,
    sender: Sender<FeedEvent>,
    closed: Arc<AtomicBool>,
}

/// Change stream driven by hand: every `open` hands back a fresh feed whose
/// events the test pushes explicitly.
#[derive(Default)]
pub struct ScriptedStream {
    feeds: Mutex<Vec<OpenedFeed>>,
    fail_next: Mutex<Option<ViewError>>,
}

impl ScriptedStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` fail with `error`.
    pub fn fail_next_open(&self, error: ViewError) {
        *self.fail_next.lock() = Some(error);
    }

    pub fn open_count(&self) -> usize {
        self.feeds.lock().len()
    }

    pub fn options(&self, feed: usize) -> FeedOptions {
        self.feeds.lock()[feed].options.clone()
    }

    /// Push an event into the `feed`-th opened feed. Ignored if the consumer
    /// already dropped it.
    pub fn send(&self, feed: usize, event: FeedEvent) {
        let sender = self.feeds.lock()[feed].sender.clone();
        let _ = sender.send(event);
    }

    pub fn change(&self, feed: usize, sequence: u64, document: Document) {
        self.send(
            feed,
            FeedEvent::Change(ChangeRecord::upsert(Sequence(sequence), document)),
        );
    }

    pub fn delete(&self, feed: usize, sequence: u64, document: Document) {
        self.send(
            feed,
            FeedEvent::Change(ChangeRecord::deletion(Sequence(sequence), document)),
        );
    }

    pub fn complete(&self, feed: usize, last_sequence: u64) {
        self.send(
            feed,
            FeedEvent::Complete {
                last_sequence: Sequence(last_sequence),
            },
        );
    }

    /// True once the consumer dropped or cancelled the feed.
    pub fn is_closed(&self, feed: usize) -> bool {
        self.feeds.lock()[feed].closed.load(Ordering::SeqCst)
    }
}

impl ChangeStream for ScriptedStream {
    fn open(&self, options: FeedOptions) -> Result<Feed> {
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }
        let (sender, receiver) = unbounded();
        let closed = Arc::new(AtomicBool::new(false));
        self.feeds.lock().push(OpenedFeed {
            options,
            sender,
            closed: Arc::clone(&closed),
        });
        Ok(Feed::new(receiver, move || closed.store(true, Ordering::SeqCst)))
    }
}
