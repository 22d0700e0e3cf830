//! Event Repository
//!
//! Append-only storage of events partitioned into streams.
//! Optimistic concurrency is enforced by unique indexes, not locks.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::changeset::Changeset;
use crate::domain::{Event, ExpectedVersion, RecordedEvent};
use crate::mapper::{EventMapper, JsonMapper};
use crate::relations::{Direction, Relations, SelectRange};

use super::{EventStoreError, IndexViolationDetector, ReadQuery, UnitOfWork};

/// Default number of rows fetched per page when reading
pub const DEFAULT_READ_BATCH_SIZE: usize = 100;

/// Event repository over a storage backend
pub struct EventRepository<R, M = JsonMapper> {
    relations: Arc<R>,
    mapper: Arc<M>,
    changeset: Changeset,
    detector: IndexViolationDetector,
    read_batch_size: usize,
}

impl<R, M> Clone for EventRepository<R, M> {
    fn clone(&self) -> Self {
        Self {
            relations: Arc::clone(&self.relations),
            mapper: Arc::clone(&self.mapper),
            changeset: self.changeset.clone(),
            detector: self.detector.clone(),
            read_batch_size: self.read_batch_size,
        }
    }
}

impl<R: Relations> EventRepository<R, JsonMapper> {
    /// Create a repository with the JSON mapper and default limits
    pub fn new(relations: R) -> Self {
        Self::with_parts(relations, JsonMapper, Changeset::default())
    }
}

impl<R: Relations, M: EventMapper> EventRepository<R, M> {
    /// Create a repository from its storage port, mapper and validator
    pub fn with_parts(relations: R, mapper: M, changeset: Changeset) -> Self {
        Self {
            relations: Arc::new(relations),
            mapper: Arc::new(mapper),
            changeset,
            detector: IndexViolationDetector::default(),
            read_batch_size: DEFAULT_READ_BATCH_SIZE,
        }
    }

    /// Use a detector for a schema with custom index names
    pub fn with_detector(mut self, detector: IndexViolationDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_read_batch_size(mut self, batch_size: usize) -> Self {
        self.read_batch_size = batch_size.max(1);
        self
    }

    pub fn relations(&self) -> &R {
        &self.relations
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Append events to a stream, returning their positions.
    ///
    /// All-or-nothing: on any error no event of the batch is stored.
    pub async fn append(
        &self,
        events: &[Event],
        stream: &str,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<i64>, EventStoreError> {
        if events.is_empty() {
            self.changeset.validate_stream(stream)?;
            self.changeset.validate_expected_version(expected_version)?;
            return Ok(Vec::new());
        }

        self.within(|mut uow| async move {
            let positions = self
                .append_within(&mut uow, events, stream, expected_version)
                .await?;
            Ok((positions, uow))
        })
        .await
    }

    /// Append events as part of an open unit of work.
    ///
    /// Nothing is stored unless the unit of work commits.
    pub async fn append_within(
        &self,
        uow: &mut UnitOfWork,
        events: &[Event],
        stream: &str,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<i64>, EventStoreError> {
        self.changeset.validate_stream(stream)?;
        self.changeset.validate_expected_version(expected_version)?;

        let records = events
            .iter()
            .map(|event| self.mapper.event_to_record(event))
            .collect::<Result<Vec<_>, _>>()?;

        let now = Utc::now();
        let event_rows = self.changeset.create_events(records, now)?;
        if event_rows.is_empty() {
            return Ok(Vec::new());
        }

        let event_ids: Vec<String> = event_rows.iter().map(|row| row.event_id.clone()).collect();

        let tail = uow.stream_tail(stream).await?;
        check_expected_version(stream, expected_version, tail)?;

        // Entries before events: a repeat in this stream is reported as
        // EventDuplicatedInStream, not by the events primary key
        let entries = self
            .changeset
            .create_stream_entries(stream, &event_ids, tail, false, now)?;
        uow.insert_stream_entries(&entries).await?;
        uow.insert_events(&event_rows).await?;

        let positions: Vec<i64> = entries.iter().map(|entry| entry.position).collect();

        tracing::debug!(
            "Appended {} events to stream {} at positions {:?}",
            positions.len(),
            stream,
            positions
        );

        Ok(positions)
    }

    /// Add already stored events to another stream without copying them
    pub async fn link_to(
        &self,
        event_ids: &[String],
        stream: &str,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<i64>, EventStoreError> {
        if event_ids.is_empty() {
            self.changeset.validate_stream(stream)?;
            self.changeset.validate_expected_version(expected_version)?;
            return Ok(Vec::new());
        }

        self.within(|mut uow| async move {
            let positions = self
                .link_within(&mut uow, event_ids, stream, expected_version)
                .await?;
            Ok((positions, uow))
        })
        .await
    }

    /// Link events as part of an open unit of work. Events appended earlier
    /// in the same unit of work can be linked.
    pub async fn link_within(
        &self,
        uow: &mut UnitOfWork,
        event_ids: &[String],
        stream: &str,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<i64>, EventStoreError> {
        self.changeset.validate_stream(stream)?;
        self.changeset.validate_expected_version(expected_version)?;
        if event_ids.is_empty() {
            return Ok(Vec::new());
        }

        let missing = uow.missing_event_ids(event_ids).await?;
        if let Some(event_id) = missing.into_iter().next() {
            return Err(EventStoreError::EventNotFound(event_id));
        }

        let tail = uow.stream_tail(stream).await?;
        check_expected_version(stream, expected_version, tail)?;

        let entries = self
            .changeset
            .create_stream_entries(stream, event_ids, tail, true, Utc::now())?;
        uow.insert_stream_entries(&entries).await?;

        tracing::debug!("Linked {} events to stream {}", entries.len(), stream);

        Ok(entries.iter().map(|entry| entry.position).collect())
    }

    /// Run caller code inside a unit of work.
    ///
    /// Writes go through [`append_within`](Self::append_within) and
    /// [`link_within`](Self::link_within); they commit together or not at all.
    pub async fn within<T, F, Fut>(&self, f: F) -> Result<T, EventStoreError>
    where
        F: FnOnce(UnitOfWork) -> Fut,
        Fut: Future<Output = Result<(T, UnitOfWork), EventStoreError>>,
    {
        UnitOfWork::run(&*self.relations, &self.detector, f).await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Lazily read the events a query selects, fetching pages on demand.
    ///
    /// The returned stream is finite. Calling `read` again restarts it.
    pub fn read(&self, query: ReadQuery) -> BoxStream<'static, Result<RecordedEvent, EventStoreError>> {
        let pager = Pager {
            relations: Arc::clone(&self.relations),
            mapper: Arc::clone(&self.mapper),
            batch_size: query.batch_size.unwrap_or(self.read_batch_size),
            after: query.from,
            remaining: query.limit,
            exhausted: false,
            query,
        };

        stream::try_unfold(pager, Pager::next_page)
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, EventStoreError>)))
            .try_flatten()
            .boxed()
    }

    /// Read one stream by position; an unknown stream yields nothing
    pub fn read_stream(
        &self,
        stream: &str,
        direction: Direction,
        from: Option<i64>,
        limit: Option<usize>,
    ) -> BoxStream<'static, Result<RecordedEvent, EventStoreError>> {
        self.read(with_bounds(ReadQuery::stream(stream).direction(direction), from, limit))
    }

    /// Read every event once, by global position
    pub fn read_all(
        &self,
        from: Option<i64>,
        direction: Direction,
        limit: Option<usize>,
    ) -> BoxStream<'static, Result<RecordedEvent, EventStoreError>> {
        self.read(with_bounds(ReadQuery::all().direction(direction), from, limit))
    }

    /// Number of events a query yields, counted by the backend
    pub async fn count(&self, query: ReadQuery) -> Result<usize, EventStoreError> {
        let range = SelectRange {
            after: query.from,
            direction: query.direction,
            limit: query.limit.unwrap_or(usize::MAX),
            event_types: query.event_types,
        };

        let count = match &query.stream {
            Some(stream) => self.relations.count_by_stream(stream, &range).await?,
            None => self.relations.count_by_global(&range).await?,
        };

        Ok(count)
    }

    pub async fn last_stream_event(
        &self,
        stream: &str,
    ) -> Result<Option<RecordedEvent>, EventStoreError> {
        self.read(ReadQuery::stream(stream).backward().limit(1))
            .try_next()
            .await
    }

    pub async fn event_exists(&self, event_id: &str) -> Result<bool, EventStoreError> {
        Ok(self.relations.select_by_id(event_id).await?.is_some())
    }

    /// Find an event by id
    pub async fn find(&self, event_id: &str) -> Result<Event, EventStoreError> {
        let row = self
            .relations
            .select_by_id(event_id)
            .await?
            .ok_or_else(|| EventStoreError::EventNotFound(event_id.to_string()))?;

        self.mapper.record_to_event(row.into())
    }

    /// Streams an event appears in, in the order it was added to them
    pub async fn streams_of(&self, event_id: &str) -> Result<Vec<String>, EventStoreError> {
        Ok(self.relations.streams_of(event_id).await?)
    }
}

fn with_bounds(mut query: ReadQuery, from: Option<i64>, limit: Option<usize>) -> ReadQuery {
    query.from = from;
    query.limit = limit;
    query
}

fn check_expected_version(
    stream: &str,
    expected: ExpectedVersion,
    tail: Option<i64>,
) -> Result<(), EventStoreError> {
    if expected.matches(tail) {
        return Ok(());
    }

    tracing::warn!(
        "Wrong expected version for stream {}: expected {}, found {:?}",
        stream,
        expected,
        tail
    );

    Err(EventStoreError::WrongExpectedVersion {
        stream: stream.to_string(),
    })
}

/// Cursor state of a lazy read
struct Pager<R, M> {
    relations: Arc<R>,
    mapper: Arc<M>,
    query: ReadQuery,
    batch_size: usize,
    after: Option<i64>,
    remaining: Option<usize>,
    exhausted: bool,
}

impl<R: Relations, M: EventMapper> Pager<R, M> {
    async fn next_page(mut self) -> Result<Option<(Vec<RecordedEvent>, Self)>, EventStoreError> {
        if self.exhausted || self.remaining == Some(0) {
            return Ok(None);
        }

        let limit = self
            .remaining
            .map_or(self.batch_size, |remaining| remaining.min(self.batch_size));
        let range = SelectRange {
            after: self.after,
            direction: self.query.direction,
            limit,
            event_types: self.query.event_types.clone(),
        };

        let rows = match &self.query.stream {
            Some(stream) => self.relations.select_by_stream(stream, &range).await?,
            None => self.relations.select_by_global(&range).await?,
        };

        if rows.len() < limit {
            self.exhausted = true;
        }
        if let Some(last) = rows.last() {
            self.after = Some(match self.query.stream {
                Some(_) => last.entry.position,
                None => last.entry.global_position,
            });
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(rows.len());
        }
        if rows.is_empty() {
            return Ok(None);
        }

        let page = rows
            .into_iter()
            .map(|stored| self.mapper.stored_to_recorded(stored))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some((page, self)))
    }
}

// =========================================================================
// Tests (PostgreSQL-backed tests live in tests/integration_event_store.rs)
// =========================================================================
