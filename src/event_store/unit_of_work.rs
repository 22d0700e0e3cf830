//! Unit of Work
//!
//! One transaction around one logical write. Concurrency control is left
//! to the store's isolation and unique indexes; no lock is taken here.
//!
//! Callers outside the crate only write through the repository's
//! validated operations. Raw row inserts are not reachable:
//!
//! ```compile_fail
//! use relational_event_store::relations::EventRow;
//! use relational_event_store::{EventRepository, MemoryRelations};
//!
//! async fn raw_insert(repo: EventRepository<MemoryRelations>, rows: Vec<EventRow>) {
//!     let _ = repo
//!         .within(|mut uow| async move {
//!             uow.insert_events(&rows).await?;
//!             Ok(((), uow))
//!         })
//!         .await;
//! }
//! ```

use std::future::Future;

use crate::relations::{EventRow, Relations, RelationsTx, StreamEntryRow};

use super::{EventStoreError, IndexViolationDetector};

tokio::task_local! {
    static UNIT_OF_WORK_ACTIVE: ();
}

/// An open transaction handed to the body of [`UnitOfWork::run`]
pub struct UnitOfWork {
    tx: Box<dyn RelationsTx>,
    detector: IndexViolationDetector,
    stream: Option<String>,
}

impl UnitOfWork {
    /// Whether the current task is inside a unit of work
    pub fn is_active() -> bool {
        UNIT_OF_WORK_ACTIVE.try_with(|_| ()).is_ok()
    }

    /// Run `f` inside a new transaction and commit what it returns.
    ///
    /// If `f` fails the unit of work is dropped and the transaction rolls
    /// back. Fails fast with `UnitOfWorkAlreadyActive` when called from
    /// inside another unit of work in the same task.
    pub async fn run<R, T, F, Fut>(
        relations: &R,
        detector: &IndexViolationDetector,
        f: F,
    ) -> Result<T, EventStoreError>
    where
        R: Relations + ?Sized,
        F: FnOnce(UnitOfWork) -> Fut,
        Fut: Future<Output = Result<(T, UnitOfWork), EventStoreError>>,
    {
        if Self::is_active() {
            return Err(EventStoreError::UnitOfWorkAlreadyActive);
        }

        UNIT_OF_WORK_ACTIVE
            .scope((), async move {
                let tx = relations.begin().await?;
                let uow = UnitOfWork {
                    tx,
                    detector: detector.clone(),
                    stream: None,
                };

                let (value, uow) = f(uow).await?;
                uow.commit().await?;
                Ok(value)
            })
            .await
    }

    fn stream(&self) -> &str {
        self.stream.as_deref().unwrap_or_default()
    }

    /// Highest position in `stream`, `None` if it has no entries
    pub async fn stream_tail(&mut self, stream: &str) -> Result<Option<i64>, EventStoreError> {
        Ok(self.tx.stream_tail(stream).await?)
    }

    /// Ids without an event row
    pub(crate) async fn missing_event_ids(
        &mut self,
        event_ids: &[String],
    ) -> Result<Vec<String>, EventStoreError> {
        Ok(self.tx.missing_event_ids(event_ids).await?)
    }

    pub(crate) async fn insert_stream_entries(
        &mut self,
        rows: &[StreamEntryRow],
    ) -> Result<(), EventStoreError> {
        if let Some(first) = rows.first() {
            self.stream = Some(first.stream_name.clone());
        }

        match self.tx.insert_stream_entries(rows).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.detector.classify(e, self.stream())),
        }
    }

    pub(crate) async fn insert_events(&mut self, rows: &[EventRow]) -> Result<(), EventStoreError> {
        match self.tx.insert_events(rows).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.detector.classify(e, self.stream())),
        }
    }

    async fn commit(self) -> Result<(), EventStoreError> {
        let UnitOfWork {
            tx,
            detector,
            stream,
        } = self;

        tx.commit()
            .await
            .map_err(|e| detector.classify(e, stream.as_deref().unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relations::MemoryRelations;
    use chrono::Utc;

    fn entry(stream: &str, position: i64, id: &str) -> StreamEntryRow {
        StreamEntryRow {
            stream_name: stream.to_string(),
            position,
            event_id: id.to_string(),
            is_link: false,
            created_at: Utc::now(),
        }
    }

    fn event(id: &str) -> EventRow {
        EventRow {
            event_id: id.to_string(),
            event_type: "OrderPlaced".to_string(),
            data: "{}".to_string(),
            metadata: "{}".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_run_commits() {
        let relations = MemoryRelations::new();
        let detector = IndexViolationDetector::default();

        let value = UnitOfWork::run(&relations, &detector, |mut uow| async move {
            uow.insert_stream_entries(&[entry("s", 0, "a")]).await?;
            uow.insert_events(&[event("a")]).await?;
            Ok((42, uow))
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert!(relations.select_by_id("a").await.unwrap().is_some());
        assert!(!UnitOfWork::is_active());
    }

    #[tokio::test]
    async fn test_failed_body_rolls_back() {
        let relations = MemoryRelations::new();
        let detector = IndexViolationDetector::default();

        let result: Result<(), _> = UnitOfWork::run(&relations, &detector, |mut uow| async move {
            uow.insert_stream_entries(&[entry("s", 0, "a")]).await?;
            uow.insert_events(&[event("a")]).await?;
            Err(EventStoreError::EventNotFound("b".to_string()))
        })
        .await;

        assert!(matches!(result, Err(EventStoreError::EventNotFound(_))));
        assert!(relations.select_by_id("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nested_run_fails_fast() {
        let relations = &MemoryRelations::new();
        let detector = &IndexViolationDetector::default();

        let nested = UnitOfWork::run(relations, detector, |uow| async move {
            assert!(UnitOfWork::is_active());
            let inner = UnitOfWork::run(relations, detector, |uow| async move { Ok(((), uow)) }).await;
            Ok((inner, uow))
        })
        .await
        .unwrap();

        assert!(matches!(nested, Err(EventStoreError::UnitOfWorkAlreadyActive)));
    }

    #[tokio::test]
    async fn test_spawned_task_is_separate_context() {
        let relations = MemoryRelations::new();
        let detector = IndexViolationDetector::default();

        let spawned = UnitOfWork::run(&relations, &detector, |uow| {
            let relations = relations.clone();
            let detector = detector.clone();
            async move {
                let handle = tokio::spawn(async move {
                    UnitOfWork::run(&relations, &detector, |uow| async move { Ok(((), uow)) })
                        .await
                });
                let inner = handle.await.expect("task panicked");
                Ok((inner, uow))
            }
        })
        .await
        .unwrap();

        assert!(spawned.is_ok());
    }

    #[tokio::test]
    async fn test_insert_errors_are_classified() {
        let relations = MemoryRelations::new();
        let detector = IndexViolationDetector::default();

        let result: Result<(), _> = UnitOfWork::run(&relations, &detector, |mut uow| async move {
            uow.insert_stream_entries(&[entry("s", 0, "a"), entry("s", 0, "b")])
                .await?;
            Ok(((), uow))
        })
        .await;

        assert!(matches!(
            result,
            Err(EventStoreError::WrongExpectedVersion { ref stream }) if stream == "s"
        ));
    }
}
