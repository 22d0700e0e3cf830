//! Database module
//!
//! Connection pool and schema utilities for the PostgreSQL backend.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::Config;

/// DDL for the events and stream entries tables
pub const SCHEMA: &str = include_str!("../migrations/0001_create_event_store.sql");

/// Create a connection pool from configuration
pub async fn connect(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
}

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let required_tables = ["events", "stream_entries"];

    for table in required_tables {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    Ok(true)
}

/// Create the tables and indexes if they do not exist yet
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    for statement in schema_statements() {
        sqlx::query(&statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    tracing::info!("Event store schema ready");
    Ok(())
}

/// Statements of the schema file with comment lines removed
fn schema_statements() -> Vec<String> {
    SCHEMA
        .split(';')
        .map(|chunk| {
            chunk
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|statement| !statement.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_declares_constraints() {
        use crate::relations::{
            EVENTS_PKEY, STREAM_EVENT_FKEY, STREAM_EVENT_INDEX, STREAM_POSITION_INDEX,
        };

        assert!(SCHEMA.contains(STREAM_POSITION_INDEX));
        assert!(SCHEMA.contains(STREAM_EVENT_INDEX));
        assert!(SCHEMA.contains(EVENTS_PKEY));
        assert!(SCHEMA.contains(STREAM_EVENT_FKEY));
        assert!(SCHEMA.contains("DEFERRABLE INITIALLY DEFERRED"));
    }

    #[test]
    fn test_schema_statements() {
        let statements = schema_statements();
        assert_eq!(statements.len(), 5);
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS events"));
    }
}
