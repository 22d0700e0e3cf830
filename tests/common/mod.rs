//! Common test utilities

#![allow(dead_code)]

use relational_event_store::{Event, EventStoreError, RecordedEvent};
use futures::stream::{BoxStream, TryStreamExt};
use serde_json::json;

/// Event with a fixed id and a small payload
pub fn event(id: &str) -> Event {
    Event::new("OrderPlaced", json!({ "order": id })).with_id(id)
}

/// Unique stream name so tests sharing a database do not collide
pub fn stream_name(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

/// Drain a read into its recorded events
pub async fn collect(
    stream: BoxStream<'static, Result<RecordedEvent, EventStoreError>>,
) -> Vec<RecordedEvent> {
    stream.try_collect().await.expect("read failed")
}

/// Drain a read into its event ids
pub async fn ids(stream: BoxStream<'static, Result<RecordedEvent, EventStoreError>>) -> Vec<String> {
    collect(stream)
        .await
        .into_iter()
        .map(|recorded| recorded.event.event_id)
        .collect()
}

/// Connect to the test database and make sure the schema exists
#[cfg(feature = "integration_tests")]
pub async fn setup_test_db() -> sqlx::PgPool {
    use sqlx::postgres::PgPoolOptions;

    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    // Tests run concurrently; a losing CREATE ... IF NOT EXISTS may fail
    if let Err(e) = relational_event_store::db::ensure_schema(&pool).await {
        let ready = relational_event_store::db::check_schema(&pool)
            .await
            .unwrap_or(false);
        assert!(ready, "Failed to create schema: {}", e);
    }

    pool
}
