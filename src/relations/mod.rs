//! Relations module
//!
//! Storage port over the `events` and `stream_entries` tables.
//! Contains no business logic; backends only translate rows to and from
//! their storage engine and report constraint violations by name.

mod memory;
mod postgres;

pub use memory::MemoryRelations;
pub use postgres::PgRelations;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Primary key of the events table
pub const EVENTS_PKEY: &str = "events_pkey";

/// Unique index on `(stream_name, position)`
pub const STREAM_POSITION_INDEX: &str = "index_stream_entries_on_stream_and_position";

/// Unique index on `(stream_name, event_id)`
pub const STREAM_EVENT_INDEX: &str = "index_stream_entries_on_stream_and_event_id";

/// Foreign key from stream entries to events
pub const STREAM_EVENT_FKEY: &str = "stream_entries_event_id_fkey";

/// Row of the events table
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub event_id: String,
    pub event_type: String,
    pub data: String,
    pub metadata: String,
    pub created_at: DateTime<Utc>,
}

/// Row to insert into the stream entries table
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntryRow {
    pub stream_name: String,
    pub position: i64,
    pub event_id: String,
    pub is_link: bool,
    pub created_at: DateTime<Utc>,
}

/// Stored stream entry, with its storage-assigned global position
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntryRecord {
    pub stream_name: String,
    pub position: i64,
    pub global_position: i64,
    pub event_id: String,
    pub is_link: bool,
    pub created_at: DateTime<Utc>,
}

/// Stream entry joined with its event
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub entry: StreamEntryRecord,
    pub event: EventRow,
}

/// Read order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

/// Window of a select over positions (stream) or global positions (all)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectRange {
    /// Exclusive bound: rows after this value in `direction` order
    pub after: Option<i64>,
    pub direction: Direction,
    pub limit: usize,
    /// Restrict to these event types (empty means all)
    pub event_types: Vec<String>,
}

impl SelectRange {
    /// Whether an event type passes the type filter
    pub fn admits_type(&self, event_type: &str) -> bool {
        self.event_types.is_empty() || self.event_types.iter().any(|t| t == event_type)
    }
}

/// Errors surfaced by a storage backend
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A unique index or primary key rejected a row
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// A foreign key rejected a row
    #[error("Foreign key constraint violated: {constraint}")]
    ForeignKeyViolation { constraint: String },

    /// Any other driver error
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl StorageError {
    /// Name of the violated constraint, if this is a constraint violation
    pub fn constraint(&self) -> Option<&str> {
        match self {
            StorageError::UniqueViolation { constraint }
            | StorageError::ForeignKeyViolation { constraint } => Some(constraint),
            StorageError::Database(_) => None,
        }
    }
}

/// Read access and transaction entry point of a backend
#[async_trait]
pub trait Relations: Send + Sync + 'static {
    /// Begin a transaction. Dropping the returned handle without
    /// committing discards every row it inserted.
    async fn begin(&self) -> Result<Box<dyn RelationsTx>, StorageError>;

    /// Entries of one stream, joined with their events
    async fn select_by_stream(
        &self,
        stream: &str,
        range: &SelectRange,
    ) -> Result<Vec<StoredEvent>, StorageError>;

    /// Non-link entries of all streams, ordered by global position
    async fn select_by_global(&self, range: &SelectRange) -> Result<Vec<StoredEvent>, StorageError>;

    /// Number of rows `select_by_stream` would return with `range.limit`
    /// as a cap instead of a page size
    async fn count_by_stream(&self, stream: &str, range: &SelectRange)
        -> Result<usize, StorageError>;

    /// Number of rows `select_by_global` would return, capped the same way
    async fn count_by_global(&self, range: &SelectRange) -> Result<usize, StorageError>;

    async fn select_by_id(&self, event_id: &str) -> Result<Option<EventRow>, StorageError>;

    /// Names of the streams an event appears in, in entry order
    async fn streams_of(&self, event_id: &str) -> Result<Vec<String>, StorageError>;
}

/// Writes performed inside one transaction
#[async_trait]
pub trait RelationsTx: Send {
    /// Highest position in a stream, `None` when it has no entries
    async fn stream_tail(&mut self, stream: &str) -> Result<Option<i64>, StorageError>;

    /// The ids from `event_ids` that have no event row
    async fn missing_event_ids(&mut self, event_ids: &[String]) -> Result<Vec<String>, StorageError>;

    async fn insert_events(&mut self, rows: &[EventRow]) -> Result<(), StorageError>;

    async fn insert_stream_entries(&mut self, rows: &[StreamEntryRow]) -> Result<(), StorageError>;

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;
}
