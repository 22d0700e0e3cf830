//! Index Violation Detector
//!
//! Maps the constraint named by a storage failure to a domain error.

use crate::relations::{
    StorageError, EVENTS_PKEY, STREAM_EVENT_INDEX, STREAM_POSITION_INDEX,
};

use super::EventStoreError;

/// The unique indexes the repository relies on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexViolation {
    /// `(stream_name, position)`: another writer advanced the stream
    StreamPosition,
    /// `(stream_name, event_id)`
    StreamEventId,
    /// `event_id` across the whole store
    EventId,
}

/// Classifies uniqueness failures by constraint name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexViolationDetector {
    stream_position_index: String,
    stream_event_index: String,
    event_id_index: String,
}

impl Default for IndexViolationDetector {
    fn default() -> Self {
        Self::new(STREAM_POSITION_INDEX, STREAM_EVENT_INDEX, EVENTS_PKEY)
    }
}

impl IndexViolationDetector {
    /// Create a detector for a schema with custom index names
    pub fn new(
        stream_position_index: impl Into<String>,
        stream_event_index: impl Into<String>,
        event_id_index: impl Into<String>,
    ) -> Self {
        Self {
            stream_position_index: stream_position_index.into(),
            stream_event_index: stream_event_index.into(),
            event_id_index: event_id_index.into(),
        }
    }

    /// Which known unique index, if any, the error reports
    pub fn detect(&self, error: &StorageError) -> Option<IndexViolation> {
        let StorageError::UniqueViolation { constraint } = error else {
            return None;
        };

        if *constraint == self.stream_position_index {
            Some(IndexViolation::StreamPosition)
        } else if *constraint == self.stream_event_index {
            Some(IndexViolation::StreamEventId)
        } else if *constraint == self.event_id_index {
            Some(IndexViolation::EventId)
        } else {
            None
        }
    }

    /// Turn a storage failure during a write to `stream` into a domain error
    pub fn classify(&self, error: StorageError, stream: &str) -> EventStoreError {
        match self.detect(&error) {
            Some(IndexViolation::StreamPosition) => {
                tracing::warn!(
                    "Concurrent append to stream {} claimed the same position",
                    stream
                );
                EventStoreError::WrongExpectedVersion {
                    stream: stream.to_string(),
                }
            }
            Some(IndexViolation::StreamEventId) => EventStoreError::EventDuplicatedInStream {
                stream: stream.to_string(),
            },
            Some(IndexViolation::EventId) => EventStoreError::EventDuplicatedGlobally,
            None => {
                tracing::error!("Unclassified storage error on stream {}: {:?}", stream, error);
                EventStoreError::UnknownStorageError(error)
            }
        }
    }
}
