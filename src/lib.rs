//! relational_event_store Library
//!
//! Append-only event repository over a transactional relational store.
//! Events are partitioned into named streams; optimistic concurrency is
//! enforced through unique indexes rather than in-process locks.

pub mod changeset;
pub mod config;
pub mod db;
pub mod domain;
pub mod event_store;
pub mod mapper;
pub mod relations;

pub use changeset::{Changeset, ChangesetLimits};
pub use config::{Config, ConfigError};
pub use domain::{Event, ExpectedVersion, RecordedEvent};
pub use event_store::{EventRepository, EventStoreError, ReadQuery, UnitOfWork};
pub use mapper::{EventMapper, JsonMapper, SerializedRecord};
pub use relations::{Direction, MemoryRelations, PgRelations, Relations, StorageError};
