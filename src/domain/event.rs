//! Domain Event
//!
//! The plain event structure exchanged with callers, and the
//! read-side wrapper carrying the stream entry it was read through.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::event_store::EventStoreError;

/// A domain event as supplied to (and returned from) the repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique identifier
    pub event_id: String,

    /// Discriminator of the payload's logical type
    pub event_type: String,

    /// Event payload
    pub data: serde_json::Value,

    /// Event metadata (correlation ids, actors, ...)
    pub metadata: serde_json::Value,

    /// Set by the repository at persistence time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Create a new event with a generated id and empty metadata
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            data,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            created_at: None,
        }
    }

    /// Create a new event from any serializable payload
    pub fn from_payload<E: Serialize>(
        event_type: &str,
        payload: &E,
    ) -> Result<Self, EventStoreError> {
        let data = serde_json::to_value(payload)?;
        Ok(Self::new(event_type, data))
    }

    /// Use a caller-supplied id instead of the generated one
    pub fn with_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    /// Attach metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Deserialize the payload into a typed event
    pub fn payload<E: DeserializeOwned>(&self) -> Result<E, EventStoreError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// An event read back through a stream entry
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub event: Event,
    pub stream_name: String,
    pub position: i64,
    pub global_position: i64,
    /// True when the entry was created by `link_to`
    pub is_link: bool,
}

impl RecordedEvent {
    pub fn event_id(&self) -> &str {
        &self.event.event_id
    }

    pub fn into_event(self) -> Event {
        self.event
    }
}
