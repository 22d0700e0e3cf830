//! Event Store module
//!
//! Append-only event repository with optimistic concurrency control.

mod error;
mod index_violation;
mod query;
mod repository;
mod unit_of_work;

pub use error::EventStoreError;
pub use index_violation::{IndexViolation, IndexViolationDetector};
pub use query::ReadQuery;
pub use repository::{EventRepository, DEFAULT_READ_BATCH_SIZE};
pub use unit_of_work::UnitOfWork;
