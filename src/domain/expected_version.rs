//! Expected Version
//!
//! The caller's assertion about a stream's tail, used for optimistic locking.

use std::fmt;

/// Expected state of a stream before an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No check; positions continue from the current tail
    Any,
    /// The stream must not have any entries yet
    NoStream,
    /// The highest position in the stream must equal this value
    Exact(i64),
}

impl ExpectedVersion {
    /// Check the expectation against the current tail (`None` for an empty stream)
    pub fn matches(&self, tail: Option<i64>) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => tail.is_none(),
            ExpectedVersion::Exact(position) => tail == Some(*position),
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::Any => write!(f, "any"),
            ExpectedVersion::NoStream => write!(f, "no_stream"),
            ExpectedVersion::Exact(position) => write!(f, "{}", position),
        }
    }
}
