//! Changesets
//!
//! Pure validation and row assembly, run before any I/O.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::domain::ExpectedVersion;
use crate::event_store::EventStoreError;
use crate::mapper::SerializedRecord;
use crate::relations::{EventRow, StreamEntryRow};

/// Limits enforced on incoming records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangesetLimits {
    /// Maximum length of stream names, event ids and event types
    pub max_name_length: usize,
    /// Maximum number of events in one append
    pub max_batch_size: usize,
}

impl Default for ChangesetLimits {
    fn default() -> Self {
        Self {
            max_name_length: 255,
            max_batch_size: 10_000,
        }
    }
}

/// Validator and builder for events and stream entry rows
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    limits: ChangesetLimits,
}

fn invalid(field: &'static str, reason: impl Into<String>) -> EventStoreError {
    EventStoreError::InvalidEventRecord {
        field,
        reason: reason.into(),
    }
}

impl Changeset {
    pub fn new(limits: ChangesetLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> ChangesetLimits {
        self.limits
    }

    fn check_name(&self, field: &'static str, value: &str) -> Result<(), EventStoreError> {
        if value.trim().is_empty() {
            return Err(invalid(field, "must not be empty"));
        }
        if value.len() > self.limits.max_name_length {
            return Err(invalid(
                field,
                format!("exceeds {} bytes", self.limits.max_name_length),
            ));
        }
        Ok(())
    }

    /// Validate a stream name
    pub fn validate_stream(&self, stream: &str) -> Result<(), EventStoreError> {
        self.check_name("stream", stream)
    }

    /// Validate an expected version
    pub fn validate_expected_version(
        &self,
        expected: ExpectedVersion,
    ) -> Result<(), EventStoreError> {
        match expected {
            ExpectedVersion::Exact(position) if position < 0 => {
                Err(invalid("expected_version", "must not be negative"))
            }
            _ => Ok(()),
        }
    }

    /// Validate serialized records and build event rows stamped with `now`
    pub fn create_events(
        &self,
        records: Vec<SerializedRecord>,
        now: DateTime<Utc>,
    ) -> Result<Vec<EventRow>, EventStoreError> {
        if records.len() > self.limits.max_batch_size {
            return Err(invalid(
                "events",
                format!("batch exceeds {} events", self.limits.max_batch_size),
            ));
        }

        let mut seen = HashSet::with_capacity(records.len());
        let mut rows = Vec::with_capacity(records.len());

        for record in records {
            self.check_name("event_id", &record.event_id)?;
            self.check_name("event_type", &record.event_type)?;
            if !seen.insert(record.event_id.clone()) {
                return Err(invalid(
                    "event_id",
                    format!("{} appears more than once in the batch", record.event_id),
                ));
            }

            rows.push(EventRow {
                event_id: record.event_id,
                event_type: record.event_type,
                data: record.data,
                metadata: record.metadata,
                created_at: now,
            });
        }

        Ok(rows)
    }

    /// Build stream entry rows continuing from `tail`
    pub fn create_stream_entries(
        &self,
        stream: &str,
        event_ids: &[String],
        tail: Option<i64>,
        is_link: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<StreamEntryRow>, EventStoreError> {
        self.validate_stream(stream)?;
        if event_ids.len() > self.limits.max_batch_size {
            return Err(invalid(
                "events",
                format!("batch exceeds {} events", self.limits.max_batch_size),
            ));
        }

        let first = tail.map_or(0, |position| position + 1);
        let mut seen = HashSet::with_capacity(event_ids.len());

        event_ids
            .iter()
            .zip(first..)
            .map(|(event_id, position)| {
                self.check_name("event_id", event_id)?;
                if !seen.insert(event_id.as_str()) {
                    return Err(invalid(
                        "event_id",
                        format!("{} appears more than once in the batch", event_id),
                    ));
                }
                Ok(StreamEntryRow {
                    stream_name: stream.to_string(),
                    position,
                    event_id: event_id.clone(),
                    is_link,
                    created_at: now,
                })
            })
            .collect()
    }
}
