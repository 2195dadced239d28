//! Build execution tasks: report, run, finalize.

use deadci_core::{BuildStatus, Event};
use deadci_db::{DbResult, EventStore};
use deadci_executor::JobExecutor;
use deadci_reporter::ReporterRegistry;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Shared handles for running builds, cheap to clone into tasks.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn EventStore>,
    reporters: Arc<ReporterRegistry>,
    executor: Arc<JobExecutor>,
    /// One permit per concurrently executing build.
    permits: Arc<Semaphore>,
    /// Every spawned build, through its final report.
    tasks: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn EventStore>,
        reporters: Arc<ReporterRegistry>,
        executor: Arc<JobExecutor>,
        max_jobs: usize,
    ) -> Self {
        Self {
            store,
            reporters,
            executor,
            permits: Arc::new(Semaphore::new(max_jobs.max(1))),
            tasks: TaskTracker::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn reporters(&self) -> &ReporterRegistry {
        &self.reporters
    }

    pub fn permits(&self) -> &Arc<Semaphore> {
        &self.permits
    }

    /// Wait until every build spawned so far has been finalized and reported.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Report the event's current status.
    ///
    /// Failures are logged and appended to the event's log, never returned.
    pub async fn report(&self, event: &mut Event) {
        let Err(e) = self.reporters.report(event).await else {
            return;
        };
        warn!(path = %event.path(), status = %event.status, error = %e, "Failed to report build status");

        let note = format!("\n{}", e);
        event.append_log(note.as_bytes());
        if let Some(id) = event.id {
            if let Err(e) = self.store.append_log(id, note.as_bytes()).await {
                warn!(event_id = %id, error = %e, "Failed to record reporting error");
            }
        }
    }

    /// Run a claimed event on a new task, releasing `permit` when it finishes.
    pub fn execute(&self, event: Event, permit: OwnedSemaphorePermit) -> JoinHandle<()> {
        let dispatcher = self.clone();
        self.tasks
            .spawn(async move { dispatcher.process(event, Some(permit)).await })
    }

    /// Run a claimed event on a new task once an execution permit frees up.
    pub fn execute_when_ready(&self, event: Event) -> JoinHandle<()> {
        let dispatcher = self.clone();
        self.tasks
            .spawn(async move { dispatcher.process(event, None).await })
    }

    async fn process(self, mut event: Event, permit: Option<OwnedSemaphorePermit>) {
        self.report(&mut event).await;

        // The semaphore is never closed, so acquiring only waits.
        let _permit = match permit {
            Some(permit) => Some(permit),
            None => self.permits.clone().acquire_owned().await.ok(),
        };

        info!(path = %event.path(), "Starting build");
        let (status, error) = match self.executor.run(&mut event).await {
            Ok(outcome) => (outcome.status, outcome.error.map(|e| e.to_string())),
            Err(e) => {
                error!(path = %event.path(), error = %e, "Event store failed during build");
                (BuildStatus::Failed, Some(e.to_string()))
            }
        };

        if let Err(e) = self.finalize(&mut event, status, error).await {
            error!(path = %event.path(), error = %e, "Failed to record build result");
        }
    }

    /// Record the final status of a build and report it.
    ///
    /// Appends `<status>` or `<status>: <error>` on its own line to the log.
    pub async fn finalize(
        &self,
        event: &mut Event,
        status: BuildStatus,
        error: Option<String>,
    ) -> DbResult<()> {
        debug_assert!(event.status.can_transition_to(status));

        match &error {
            Some(error) => event.append_marker(&format!("{}: {}", status, error)),
            None => event.append_marker(status.as_str()),
        }
        event.status = status;
        self.store.update(event).await?;
        info!(path = %event.path(), status = %status, "Build finished");

        self.report(event).await;
        Ok(())
    }
}
