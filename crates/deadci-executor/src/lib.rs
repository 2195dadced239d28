//! Build execution for DeadCI.
//!
//! Clones the repository for an event into a scratch workspace, checks out
//! the commit and runs the configured command, streaming its output into the
//! event store as it arrives.

pub mod capture;
pub mod error;
pub mod job;
pub mod workspace;

pub use capture::CHUNK_SIZE;
pub use error::ExecutorError;
pub use job::{ExecutionOutcome, JobExecutor};
