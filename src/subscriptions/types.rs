//! Subscription types.

use crate::error::Result;
use crate::reactive::ReactiveDependency;
use crate::types::{ChangeRecord, Sequence};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Loading,
    Ready,
    Stopped,
}

/// Events emitted by a subscription.
#[derive(Clone, Debug, PartialEq)]
pub enum SubscriptionEvent {
    /// History replayed; now tailing live.
    Ready,

    /// A live change was applied to the cache.
    Change(ChangeRecord),

    /// The live feed ended on its own. The subscription stops right after.
    Complete { last_sequence: Sequence },

    /// The change stream failed.
    Error(String),

    /// The subscription stopped and released its documents.
    Stop,
}

/// Callback invoked once with the outcome of a load.
pub type LoadCallback = Box<dyn FnOnce(&Result<()>) + Send>;

/// Options for [`Database::subscribe_with`](crate::Database::subscribe_with).
#[derive(Default)]
pub struct SubscribeOptions {
    /// Upstream filter name. None, empty, or the wildcard means every document.
    pub filter: Option<String>,

    /// Called once the initial load resolves.
    pub on_load: Option<LoadCallback>,

    /// Lifecycle context; invalidating it stops the subscription.
    pub context: Option<Arc<dyn ReactiveDependency>>,
}

impl SubscribeOptions {
    pub fn filter(name: impl Into<String>) -> Self {
        Self {
            filter: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_on_load<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Result<()>) + Send + 'static,
    {
        self.on_load = Some(Box::new(callback));
        self
    }

    pub fn with_context(mut self, context: Arc<dyn ReactiveDependency>) -> Self {
        self.context = Some(context);
        self
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("filter", &self.filter)
            .field("on_load", &self.on_load.is_some())
            .field("context", &self.context.is_some())
            .finish()
    }
}
