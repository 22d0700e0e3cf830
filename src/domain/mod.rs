//! Domain module
//!
//! Event types exchanged with callers of the repository.

pub mod event;
pub mod expected_version;

pub use event::{Event, RecordedEvent};
pub use expected_version::ExpectedVersion;
