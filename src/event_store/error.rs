//! Event Store Errors
//!
//! Error types for event repository operations.

use crate::relations::StorageError;

/// Errors that can occur in the event repository
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// Record rejected before reaching storage
    #[error("Invalid event record: {field} {reason}")]
    InvalidEventRecord { field: &'static str, reason: String },

    /// Optimistic concurrency conflict
    #[error("Wrong expected version for stream {stream}")]
    WrongExpectedVersion { stream: String },

    /// Event id already present in the target stream
    #[error("Event already exists in stream {stream}")]
    EventDuplicatedInStream { stream: String },

    /// Event id already stored through another stream
    #[error("Event id already exists in the store")]
    EventDuplicatedGlobally,

    /// Event not found
    #[error("Event not found: {0}")]
    EventNotFound(String),

    /// Append issued from inside a running unit of work
    #[error("A unit of work is already active in this task")]
    UnitOfWorkAlreadyActive,

    /// Storage failure that could not be classified
    #[error("Unknown storage error: {0}")]
    UnknownStorageError(#[from] StorageError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// Check if this error is a concurrency conflict
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, EventStoreError::WrongExpectedVersion { .. })
    }

    /// Check if re-reading the stream and retrying may succeed
    pub fn is_retryable(&self) -> bool {
        self.is_concurrency_conflict()
    }
}
