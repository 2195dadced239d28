//! Worker that claims pending events from the store.

use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Dispatcher;

/// Back-off after a failed claim.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// A polling loop that claims and dispatches builds.
pub struct Worker {
    id: String,
    dispatcher: Dispatcher,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        dispatcher: Dispatcher,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            dispatcher,
            poll_interval,
            shutdown,
        }
    }

    /// Run the worker loop until shutdown is requested.
    ///
    /// A permit is taken before claiming so a claimed build always starts.
    pub async fn run(&self) {
        info!(worker_id = %self.id, "Starting worker");

        loop {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = self.dispatcher.permits().clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let wait = match self.dispatcher.store().claim_next_pending().await {
                Ok(Some(event)) => {
                    info!(worker_id = %self.id, path = %event.path(), "Claimed build");
                    self.dispatcher.execute(event, permit);
                    continue;
                }
                Ok(None) => self.poll_interval,
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "Failed to claim build");
                    ERROR_BACKOFF
                }
            };
            drop(permit);

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }

        debug!(worker_id = %self.id, "Worker stopped");
    }
}
