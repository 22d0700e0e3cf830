//! In-memory Relations
//!
//! Enforces the same unique indexes and foreign key as the PostgreSQL
//! schema. Transactions buffer their rows and re-check every constraint
//! at commit, so a writer that lost a race fails the way it would
//! against the database. Global positions are assigned in commit order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{
    Direction, EventRow, Relations, RelationsTx, SelectRange, StorageError, StoredEvent,
    StreamEntryRecord, StreamEntryRow, EVENTS_PKEY, STREAM_EVENT_FKEY, STREAM_EVENT_INDEX,
    STREAM_POSITION_INDEX,
};

#[derive(Debug, Default)]
struct Tables {
    events: HashMap<String, EventRow>,
    /// Ordered by global position
    entries: Vec<StreamEntryRecord>,
    /// Per stream: position to index into `entries`
    streams: HashMap<String, BTreeMap<i64, usize>>,
    stream_events: HashSet<(String, String)>,
    last_global_position: i64,
}

type Entries<'a> = Box<dyn Iterator<Item = &'a StreamEntryRecord> + 'a>;

fn unique_violation(constraint: &str) -> StorageError {
    StorageError::UniqueViolation {
        constraint: constraint.to_string(),
    }
}

impl Tables {
    fn check_event(&self, row: &EventRow) -> Result<(), StorageError> {
        if self.events.contains_key(&row.event_id) {
            return Err(unique_violation(EVENTS_PKEY));
        }
        Ok(())
    }

    fn check_entry(&self, row: &StreamEntryRow) -> Result<(), StorageError> {
        if self
            .stream_events
            .contains(&(row.stream_name.clone(), row.event_id.clone()))
        {
            return Err(unique_violation(STREAM_EVENT_INDEX));
        }
        if self
            .streams
            .get(&row.stream_name)
            .is_some_and(|positions| positions.contains_key(&row.position))
        {
            return Err(unique_violation(STREAM_POSITION_INDEX));
        }
        Ok(())
    }

    fn joined(&self, entry: &StreamEntryRecord) -> Option<StoredEvent> {
        self.events.get(&entry.event_id).map(|event| StoredEvent {
            entry: entry.clone(),
            event: event.clone(),
        })
    }

    fn tail(&self, stream: &str) -> Option<i64> {
        self.streams
            .get(stream)?
            .keys()
            .next_back()
            .copied()
    }

    /// Entries of one stream past the range bound, in range order
    fn stream_window(&self, stream: &str, range: &SelectRange) -> Entries<'_> {
        let Some(positions) = self.streams.get(stream) else {
            return Box::new(std::iter::empty());
        };

        let indices: Box<dyn Iterator<Item = &usize> + '_> = match (range.direction, range.after) {
            (Direction::Forward, None) => Box::new(positions.values()),
            (Direction::Forward, Some(after)) => {
                Box::new(positions.range((Excluded(after), Unbounded)).map(|(_, idx)| idx))
            }
            (Direction::Backward, None) => Box::new(positions.values().rev()),
            (Direction::Backward, Some(after)) => {
                Box::new(positions.range(..after).rev().map(|(_, idx)| idx))
            }
        };

        let entries = &self.entries;
        Box::new(indices.map(move |&idx| &entries[idx]))
    }

    /// Non-link entries past the range bound, in range order
    fn global_window(&self, range: &SelectRange) -> Entries<'_> {
        let entries: Entries<'_> = match (range.direction, range.after) {
            (Direction::Forward, None) => Box::new(self.entries.iter()),
            (Direction::Forward, Some(after)) => {
                let start = self
                    .entries
                    .partition_point(|entry| entry.global_position <= after);
                Box::new(self.entries[start..].iter())
            }
            (Direction::Backward, None) => Box::new(self.entries.iter().rev()),
            (Direction::Backward, Some(after)) => {
                let end = self
                    .entries
                    .partition_point(|entry| entry.global_position < after);
                Box::new(self.entries[..end].iter().rev())
            }
        };

        Box::new(entries.filter(|entry| !entry.is_link))
    }

    fn page(&self, window: Entries<'_>, range: &SelectRange) -> Vec<StoredEvent> {
        window
            .filter_map(|entry| self.joined(entry))
            .filter(|stored| range.admits_type(&stored.event.event_type))
            .take(range.limit)
            .collect()
    }

    fn count(&self, window: Entries<'_>, range: &SelectRange) -> usize {
        window
            .filter(|entry| {
                self.events
                    .get(&entry.event_id)
                    .is_some_and(|event| range.admits_type(&event.event_type))
            })
            .take(range.limit)
            .count()
    }
}

/// Relations kept in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryRelations {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryRelations {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Relations for MemoryRelations {
    async fn begin(&self) -> Result<Box<dyn RelationsTx>, StorageError> {
        Ok(Box::new(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            events: Vec::new(),
            entries: Vec::new(),
        }))
    }

    async fn select_by_stream(
        &self,
        stream: &str,
        range: &SelectRange,
    ) -> Result<Vec<StoredEvent>, StorageError> {
        let tables = self.lock();
        Ok(tables.page(tables.stream_window(stream, range), range))
    }

    async fn select_by_global(&self, range: &SelectRange) -> Result<Vec<StoredEvent>, StorageError> {
        let tables = self.lock();
        Ok(tables.page(tables.global_window(range), range))
    }

    async fn count_by_stream(
        &self,
        stream: &str,
        range: &SelectRange,
    ) -> Result<usize, StorageError> {
        let tables = self.lock();
        Ok(tables.count(tables.stream_window(stream, range), range))
    }

    async fn count_by_global(&self, range: &SelectRange) -> Result<usize, StorageError> {
        let tables = self.lock();
        Ok(tables.count(tables.global_window(range), range))
    }

    async fn select_by_id(&self, event_id: &str) -> Result<Option<EventRow>, StorageError> {
        Ok(self.lock().events.get(event_id).cloned())
    }

    async fn streams_of(&self, event_id: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.event_id == event_id)
            .map(|entry| entry.stream_name.clone())
            .collect())
    }
}

/// Buffered writes of one transaction; dropping it discards them
struct MemoryTransaction {
    tables: Arc<Mutex<Tables>>,
    events: Vec<EventRow>,
    entries: Vec<StreamEntryRow>,
}

impl MemoryTransaction {
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RelationsTx for MemoryTransaction {
    async fn stream_tail(&mut self, stream: &str) -> Result<Option<i64>, StorageError> {
        let committed = self.lock().tail(stream);
        let pending = self
            .entries
            .iter()
            .filter(|entry| entry.stream_name == stream)
            .map(|entry| entry.position)
            .max();

        Ok(committed.max(pending))
    }

    async fn missing_event_ids(&mut self, event_ids: &[String]) -> Result<Vec<String>, StorageError> {
        let tables = self.lock();
        Ok(event_ids
            .iter()
            .filter(|id| {
                !tables.events.contains_key(*id) && !self.events.iter().any(|e| &e.event_id == *id)
            })
            .cloned()
            .collect())
    }

    async fn insert_events(&mut self, rows: &[EventRow]) -> Result<(), StorageError> {
        {
            let tables = self.lock();
            for (idx, row) in rows.iter().enumerate() {
                tables.check_event(row)?;
                if self
                    .events
                    .iter()
                    .chain(&rows[..idx])
                    .any(|e| e.event_id == row.event_id)
                {
                    return Err(unique_violation(EVENTS_PKEY));
                }
            }
        }

        self.events.extend_from_slice(rows);
        Ok(())
    }

    async fn insert_stream_entries(&mut self, rows: &[StreamEntryRow]) -> Result<(), StorageError> {
        {
            let tables = self.lock();
            for (idx, row) in rows.iter().enumerate() {
                tables.check_entry(row)?;
                for pending in self.entries.iter().chain(&rows[..idx]) {
                    if pending.stream_name != row.stream_name {
                        continue;
                    }
                    if pending.event_id == row.event_id {
                        return Err(unique_violation(STREAM_EVENT_INDEX));
                    }
                    if pending.position == row.position {
                        return Err(unique_violation(STREAM_POSITION_INDEX));
                    }
                }
            }
        }

        self.entries.extend_from_slice(rows);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let mut tables = self.lock();

        // Rows committed by other transactions since the inserts
        for row in &self.entries {
            tables.check_entry(row)?;
        }
        for row in &self.events {
            tables.check_event(row)?;
        }
        for row in &self.entries {
            let known = tables.events.contains_key(&row.event_id)
                || self.events.iter().any(|e| e.event_id == row.event_id);
            if !known {
                return Err(StorageError::ForeignKeyViolation {
                    constraint: STREAM_EVENT_FKEY.to_string(),
                });
            }
        }

        for row in &self.events {
            tables.events.insert(row.event_id.clone(), row.clone());
        }
        for row in &self.entries {
            tables.last_global_position += 1;
            let global_position = tables.last_global_position;

            let idx = tables.entries.len();
            tables
                .streams
                .entry(row.stream_name.clone())
                .or_default()
                .insert(row.position, idx);
            tables
                .stream_events
                .insert((row.stream_name.clone(), row.event_id.clone()));

            tables.entries.push(StreamEntryRecord {
                stream_name: row.stream_name.clone(),
                position: row.position,
                global_position,
                event_id: row.event_id.clone(),
                is_link: row.is_link,
                created_at: row.created_at,
            });
        }

        Ok(())
    }
}
