//! Core domain types and traits for DeadCI.
//!
//! This crate contains:
//! - Build events and their fingerprints
//! - The build status state machine
//! - Commit notifications consumed by intake
//! - The status reporter trait implemented by providers

pub mod error;
pub mod event;
pub mod id;
pub mod notification;
pub mod reporter;
pub mod status;

pub use error::{Error, Result};
pub use event::{Event, EventType, Fingerprint, RETRY_MARKER, is_valid_segment};
pub use id::EventId;
pub use notification::{CommitNotification, NotificationKind};
pub use reporter::StatusReporter;
pub use status::BuildStatus;
