//! Worker pool lifecycle.

use deadci_core::BuildStatus;
use deadci_db::DbResult;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{Dispatcher, Worker};

/// How often a draining pool checks for running builds.
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A set of workers sharing one dispatcher and shutdown token.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawn `count` workers polling every `poll_interval`.
    pub fn spawn(count: usize, dispatcher: Dispatcher, poll_interval: Duration) -> Self {
        let shutdown = CancellationToken::new();
        let workers = (1..=count.max(1))
            .map(|n| {
                let worker = Worker::new(
                    format!("worker-{}", n),
                    dispatcher.clone(),
                    poll_interval,
                    shutdown.clone(),
                );
                tokio::spawn(async move { worker.run().await })
            })
            .collect::<Vec<_>>();

        info!(workers = workers.len(), "Worker pool started");
        Self {
            workers,
            dispatcher,
            shutdown,
        }
    }

    /// Stop claiming new builds. Running builds are left alone.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Stop claiming and wait until no build is running.
    ///
    /// Builds already spawned are awaited through their final status report.
    pub async fn drain(self) -> DbResult<()> {
        self.shutdown();
        for worker in self.workers {
            let _ = worker.await;
        }
        self.dispatcher.wait_idle().await;

        loop {
            let running = self
                .dispatcher
                .store()
                .count_by_status(BuildStatus::Running)
                .await?;
            if running == 0 {
                break;
            }
            info!(running, "Waiting for running builds to finish");
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        info!("Worker pool drained");
        Ok(())
    }
}
