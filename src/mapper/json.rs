//! JSON Mapper
//!
//! Stores `data` and `metadata` as JSON text. The text written is the
//! text read back, so payloads round-trip byte-for-byte.

use crate::domain::Event;
use crate::event_store::EventStoreError;

use super::{EventMapper, SerializedRecord};

/// serde_json based mapper
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMapper;

impl EventMapper for JsonMapper {
    fn event_to_record(&self, event: &Event) -> Result<SerializedRecord, EventStoreError> {
        Ok(SerializedRecord {
            event_id: event.event_id.clone(),
            event_type: event.event_type.clone(),
            data: serde_json::to_string(&event.data)?,
            metadata: serde_json::to_string(&event.metadata)?,
            created_at: event.created_at,
        })
    }

    fn record_to_event(&self, record: SerializedRecord) -> Result<Event, EventStoreError> {
        Ok(Event {
            data: serde_json::from_str(&record.data)?,
            metadata: serde_json::from_str(&record.metadata)?,
            event_id: record.event_id,
            event_type: record.event_type,
            created_at: record.created_at,
        })
    }
}
