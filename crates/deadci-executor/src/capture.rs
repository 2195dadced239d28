//! Incremental output capture for child processes.

use deadci_core::{BuildStatus, Event};
use deadci_db::{DbError, EventStore};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::ExecutorError;

/// Largest slice of output read from a stream before it is persisted.
pub const CHUNK_SIZE: usize = 1024;

/// Why a build step stopped the build.
#[derive(Debug)]
pub(crate) enum Abort {
    /// The build ends with this status.
    Build(BuildStatus, ExecutorError),
    /// The event store failed; nothing more can be recorded.
    Store(DbError),
}

impl From<DbError> for Abort {
    fn from(e: DbError) -> Self {
        Abort::Store(e)
    }
}

/// A time budget shared by every step of one build.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub(crate) fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    fn abort(&self) -> Abort {
        Abort::Build(BuildStatus::Failed, ExecutorError::TimedOut(self.budget))
    }
}

/// Completes when the deadline passes, or never without one.
async fn expire(deadline: Option<Deadline>) -> Deadline {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(deadline.at).await;
            deadline
        }
        None => std::future::pending().await,
    }
}

/// Stream stdout and stderr of `child` into the event log until both close,
/// persisting after every chunk, then wait for the exit status.
///
/// Read errors end the build with `on_error`; an expired deadline ends it `failed`.
/// The child is killed whenever capture stops early.
pub(crate) async fn capture(
    store: &dyn EventStore,
    event: &mut Event,
    mut child: Child,
    deadline: Option<Deadline>,
    on_error: BuildStatus,
) -> Result<ExitStatus, Abort> {
    let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill().await;
        return Err(Abort::Build(
            on_error,
            ExecutorError::Output(std::io::Error::other("output pipes were not captured")),
        ));
    };

    let mut out_buf = [0u8; CHUNK_SIZE];
    let mut err_buf = [0u8; CHUNK_SIZE];
    let mut out_open = true;
    let mut err_open = true;

    while out_open || err_open {
        let (from_stdout, read) = tokio::select! {
            read = stdout.read(&mut out_buf), if out_open => (true, read),
            read = stderr.read(&mut err_buf), if err_open => (false, read),
            expired = expire(deadline) => {
                let _ = child.kill().await;
                return Err(expired.abort());
            }
        };

        match read {
            Ok(0) if from_stdout => out_open = false,
            Ok(0) => err_open = false,
            Ok(n) => {
                let chunk = if from_stdout {
                    &out_buf[..n]
                } else {
                    &err_buf[..n]
                };
                event.append_log(chunk);
                store.update(event).await?;
            }
            Err(e) => {
                warn!(path = %event.path(), error = %e, "Failed to read build output");
                let _ = child.kill().await;
                return Err(Abort::Build(on_error, ExecutorError::Output(e)));
            }
        }
    }

    debug!(path = %event.path(), "Output streams closed");

    tokio::select! {
        status = child.wait() => {
            status.map_err(|e| Abort::Build(on_error, ExecutorError::Output(e)))
        }
        expired = expire(deadline) => {
            let _ = child.kill().await;
            Err(expired.abort())
        }
    }
}
