//! Build scheduling for DeadCI.
//!
//! Commit notifications enter through [`Intake`], which deduplicates them
//! against the event store. A [`WorkerPool`] claims pending events and hands
//! them to the [`Dispatcher`], which runs, finalizes and reports each build.

pub mod dispatch;
pub mod error;
pub mod intake;
pub mod pool;
pub mod worker;

pub use dispatch::Dispatcher;
pub use error::{SchedulerError, SchedulerResult};
pub use intake::{Intake, IntakeOutcome, RerunOutcome};
pub use pool::{DRAIN_POLL_INTERVAL, WorkerPool};
pub use worker::Worker;

#[cfg(test)]
pub(crate) mod testing;
