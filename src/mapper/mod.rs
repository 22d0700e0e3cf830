//! Mapper module
//!
//! Translates domain events to and from their serialized storage form.

mod json;

pub use json::JsonMapper;

use chrono::{DateTime, Utc};

use crate::domain::{Event, RecordedEvent};
use crate::event_store::EventStoreError;
use crate::relations::{EventRow, StoredEvent};

/// Event with its payloads in serialized (JSON text) form
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedRecord {
    pub event_id: String,
    pub event_type: String,
    pub data: String,
    pub metadata: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<EventRow> for SerializedRecord {
    fn from(row: EventRow) -> Self {
        Self {
            event_id: row.event_id,
            event_type: row.event_type,
            data: row.data,
            metadata: row.metadata,
            created_at: Some(row.created_at),
        }
    }
}

/// Bidirectional transform between domain events and serialized records
pub trait EventMapper: Send + Sync + 'static {
    fn event_to_record(&self, event: &Event) -> Result<SerializedRecord, EventStoreError>;

    fn record_to_event(&self, record: SerializedRecord) -> Result<Event, EventStoreError>;

    /// Map a stream entry joined with its event to a recorded event
    fn stored_to_recorded(&self, stored: StoredEvent) -> Result<RecordedEvent, EventStoreError> {
        let StoredEvent { entry, event } = stored;
        Ok(RecordedEvent {
            event: self.record_to_event(event.into())?,
            stream_name: entry.stream_name,
            position: entry.position,
            global_position: entry.global_position,
            is_link: entry.is_link,
        })
    }
}
