//! Event identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Store-assigned identifier of a build event.
///
/// Identifiers grow with insertion order, so comparing two ids tells which
/// event was queued first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Get the raw row id.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for EventId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl From<EventId> for i64 {
    fn from(id: EventId) -> Self {
        id.0
    }
}
