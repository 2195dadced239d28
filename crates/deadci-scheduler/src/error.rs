//! Scheduler error types.

use deadci_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("build is already running: {0}")]
    Conflict(String),

    #[error("no reporter registered for domain {0}")]
    UnsupportedDomain(String),

    #[error(transparent)]
    Store(#[from] DbError),
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
