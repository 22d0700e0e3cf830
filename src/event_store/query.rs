//! Read Queries
//!
//! Builder describing which entries a read yields and in what order.

use crate::relations::Direction;

/// A read over one stream or over all events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadQuery {
    pub(crate) stream: Option<String>,
    pub(crate) direction: Direction,
    pub(crate) from: Option<i64>,
    pub(crate) limit: Option<usize>,
    pub(crate) batch_size: Option<usize>,
    pub(crate) event_types: Vec<String>,
}

impl ReadQuery {
    /// Read the entries of one stream, ordered by position
    pub fn stream(name: impl Into<String>) -> Self {
        Self {
            stream: Some(name.into()),
            ..Self::all()
        }
    }

    /// Read every event once, ordered by global position
    pub fn all() -> Self {
        Self {
            stream: None,
            direction: Direction::Forward,
            from: None,
            limit: None,
            batch_size: None,
            event_types: Vec::new(),
        }
    }

    pub fn forward(self) -> Self {
        self.direction(Direction::Forward)
    }

    pub fn backward(self) -> Self {
        self.direction(Direction::Backward)
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Start after this position (exclusive, in read direction)
    pub fn from(mut self, position: i64) -> Self {
        self.from = Some(position);
        self
    }

    /// Yield at most this many events
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Fetch pages of this size from storage
    pub fn in_batches_of(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size.max(1));
        self
    }

    /// Only yield events of this type (may be repeated)
    pub fn of_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    pub fn stream_name(&self) -> Option<&str> {
        self.stream.as_deref()
    }
}
