//! PostgreSQL Relations
//!
//! sqlx backend for the storage port. The schema lives in
//! `migrations/0001_create_event_store.sql`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};

use super::{
    Direction, EventRow, Relations, RelationsTx, SelectRange, StorageError, StoredEvent,
    StreamEntryRecord, StreamEntryRow,
};

type JoinedRow = (
    String,
    i64,
    i64,
    String,
    bool,
    DateTime<Utc>,
    String,
    String,
    String,
    DateTime<Utc>,
);

const SELECT_JOINED: &str = r#"
    SELECT se.stream_name, se.position, se.global_position, se.event_id, se.is_link, se.created_at,
           e.event_type, e.data, e.metadata, e.created_at
    FROM stream_entries se
    JOIN events e ON e.event_id = se.event_id
    WHERE "#;

const COUNT_JOINED: &str = r#"
    SELECT COUNT(*) FROM (
        SELECT 1
        FROM stream_entries se
        JOIN events e ON e.event_id = se.event_id
        WHERE "#;

/// `LIMIT` value for a row count; counts past `i64::MAX` saturate
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Push the stream, bound and type conditions of a select.
/// Returns the column the window is ordered by.
fn push_window<'args>(
    query: &mut QueryBuilder<'args, Postgres>,
    stream: Option<&'args str>,
    range: &'args SelectRange,
) -> &'static str {
    let column = match stream {
        Some(name) => {
            query.push("se.stream_name = ").push_bind(name);
            "se.position"
        }
        None => {
            query.push("se.is_link = FALSE");
            "se.global_position"
        }
    };

    if let Some(after) = range.after {
        let op = match range.direction {
            Direction::Forward => " > ",
            Direction::Backward => " < ",
        };
        query.push(" AND ").push(column).push(op).push_bind(after);
    }

    if !range.event_types.is_empty() {
        query
            .push(" AND e.event_type = ANY(")
            .push_bind(&range.event_types)
            .push(")");
    }

    column
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            let constraint = db_err.constraint().unwrap_or_default().to_string();
            if db_err.is_unique_violation() {
                return StorageError::UniqueViolation { constraint };
            }
            if db_err.is_foreign_key_violation() {
                return StorageError::ForeignKeyViolation { constraint };
            }
        }
        StorageError::Database(err)
    }
}

/// Relations backed by a PostgreSQL pool.
///
/// Global positions come from a `BIGSERIAL` sequence, which hands out
/// values at insert time, not at commit. With concurrent writers a
/// transaction can commit after one holding a larger global position, so
/// a reader tailing `read_all` from its last seen position may skip that
/// row. Within a stream, positions are always gap-free.
#[derive(Debug, Clone)]
pub struct PgRelations {
    pool: PgPool,
}

impl PgRelations {
    /// Create new relations over a database pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn select_joined(
        &self,
        stream: Option<&str>,
        range: &SelectRange,
    ) -> Result<Vec<StoredEvent>, StorageError> {
        let mut query = QueryBuilder::<Postgres>::new(SELECT_JOINED);
        let column = push_window(&mut query, stream, range);

        let order = match range.direction {
            Direction::Forward => " ASC",
            Direction::Backward => " DESC",
        };
        query
            .push(" ORDER BY ")
            .push(column)
            .push(order)
            .push(" LIMIT ")
            .push_bind(sql_limit(range.limit));

        let rows: Vec<JoinedRow> = query.build_query_as().fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    stream_name,
                    position,
                    global_position,
                    event_id,
                    is_link,
                    entry_created_at,
                    event_type,
                    data,
                    metadata,
                    event_created_at,
                )| StoredEvent {
                    entry: StreamEntryRecord {
                        stream_name,
                        position,
                        global_position,
                        event_id: event_id.clone(),
                        is_link,
                        created_at: entry_created_at,
                    },
                    event: EventRow {
                        event_id,
                        event_type,
                        data,
                        metadata,
                        created_at: event_created_at,
                    },
                },
            )
            .collect())
    }

    async fn count_joined(
        &self,
        stream: Option<&str>,
        range: &SelectRange,
    ) -> Result<usize, StorageError> {
        let mut query = QueryBuilder::<Postgres>::new(COUNT_JOINED);
        push_window(&mut query, stream, range);
        query
            .push(" LIMIT ")
            .push_bind(sql_limit(range.limit))
            .push(") counted");

        let count: i64 = query.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }
}

#[async_trait]
impl Relations for PgRelations {
    async fn begin(&self) -> Result<Box<dyn RelationsTx>, StorageError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn select_by_stream(
        &self,
        stream: &str,
        range: &SelectRange,
    ) -> Result<Vec<StoredEvent>, StorageError> {
        self.select_joined(Some(stream), range).await
    }

    async fn select_by_global(&self, range: &SelectRange) -> Result<Vec<StoredEvent>, StorageError> {
        self.select_joined(None, range).await
    }

    async fn count_by_stream(
        &self,
        stream: &str,
        range: &SelectRange,
    ) -> Result<usize, StorageError> {
        self.count_joined(Some(stream), range).await
    }

    async fn count_by_global(&self, range: &SelectRange) -> Result<usize, StorageError> {
        self.count_joined(None, range).await
    }

    async fn select_by_id(&self, event_id: &str) -> Result<Option<EventRow>, StorageError> {
        let row: Option<(String, String, String, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT event_id, event_type, data, metadata, created_at
            FROM events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(event_id, event_type, data, metadata, created_at)| EventRow {
            event_id,
            event_type,
            data,
            metadata,
            created_at,
        }))
    }

    async fn streams_of(&self, event_id: &str) -> Result<Vec<String>, StorageError> {
        let streams: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT stream_name FROM stream_entries
            WHERE event_id = $1
            ORDER BY global_position ASC
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(streams)
    }
}

/// An open PostgreSQL transaction; sqlx rolls it back on drop
struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RelationsTx for PgTransaction {
    async fn stream_tail(&mut self, stream: &str) -> Result<Option<i64>, StorageError> {
        let tail: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(position) FROM stream_entries WHERE stream_name = $1
            "#,
        )
        .bind(stream)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(tail)
    }

    async fn missing_event_ids(&mut self, event_ids: &[String]) -> Result<Vec<String>, StorageError> {
        let found: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT event_id FROM events WHERE event_id = ANY($1)
            "#,
        )
        .bind(event_ids)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(event_ids
            .iter()
            .filter(|id| !found.contains(id))
            .cloned()
            .collect())
    }

    async fn insert_events(&mut self, rows: &[EventRow]) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut query = QueryBuilder::<Postgres>::new(
            "INSERT INTO events (event_id, event_type, data, metadata, created_at) ",
        );
        query.push_values(rows, |mut b, row| {
            b.push_bind(&row.event_id)
                .push_bind(&row.event_type)
                .push_bind(&row.data)
                .push_bind(&row.metadata)
                .push_bind(row.created_at);
        });
        query.build().execute(&mut *self.tx).await?;

        Ok(())
    }

    async fn insert_stream_entries(&mut self, rows: &[StreamEntryRow]) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut query = QueryBuilder::<Postgres>::new(
            "INSERT INTO stream_entries (stream_name, position, event_id, is_link, created_at) ",
        );
        query.push_values(rows, |mut b, row| {
            b.push_bind(&row.stream_name)
                .push_bind(row.position)
                .push_bind(&row.event_id)
                .push_bind(row.is_link)
                .push_bind(row.created_at);
        });
        query.build().execute(&mut *self.tx).await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let PgTransaction { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_limit_saturates() {
        assert_eq!(sql_limit(100), 100);
        assert_eq!(sql_limit(usize::MAX), i64::MAX);
    }

    #[test]
    fn test_window_conditions() {
        let range = SelectRange {
            after: Some(4),
            direction: Direction::Backward,
            limit: usize::MAX,
            event_types: vec!["OrderPlaced".to_string()],
        };

        let mut query = QueryBuilder::<Postgres>::new(SELECT_JOINED);
        let column = push_window(&mut query, Some("order-1"), &range);
        let sql = query.sql();

        assert_eq!(column, "se.position");
        assert!(sql.contains("se.stream_name = $1"));
        assert!(sql.contains("se.position < $2"));
        assert!(sql.contains("e.event_type = ANY($3)"));

        let mut query = QueryBuilder::<Postgres>::new(COUNT_JOINED);
        let column = push_window(&mut query, None, &range);
        assert_eq!(column, "se.global_position");
        assert!(query.sql().contains("se.is_link = FALSE AND se.global_position < $1"));
    }
}
