//! Error types for live views and subscriptions.

use crate::types::{DocumentId, SubscriptionId};
use thiserror::Error;

/// Main error type for view and subscription operations.
///
/// Cloneable so that one load outcome can be handed to every waiter of an
/// in-flight load.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ViewError {
    #[error("Change stream error: {0}")]
    Stream(String),

    #[error("Unknown change filter: {0}")]
    UnknownFilter(String),

    #[error("Invalid query: {0}")]
    PredicateCompile(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Subscription is stopped: {0}")]
    SubscriptionStopped(SubscriptionId),

    #[error("Timed out waiting for subscription load")]
    Timeout,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ViewError {
    fn from(e: serde_json::Error) -> Self {
        ViewError::Serialization(e.to_string())
    }
}

/// Result type for view operations.
pub type Result<T> = std::result::Result<T, ViewError>;
