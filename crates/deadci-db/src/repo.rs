//! Repository traits and implementations.

pub mod event;

pub use event::{EventFilter, EventRecord, EventStore, LIST_LIMIT, SqliteEventStore};
