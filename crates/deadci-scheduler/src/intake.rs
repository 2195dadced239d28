//! Turning commit notifications and re-run requests into queued builds.

use deadci_core::{CommitNotification, Event, Fingerprint};
use deadci_db::DbError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{Dispatcher, SchedulerError, SchedulerResult};

/// What happened to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// Not a buildable change (e.g. a closed pull request).
    Ignored,
    /// A new pending event was created.
    Queued,
    /// An existing event was reset to pending.
    Requeued,
    /// The event is already running and was left alone.
    InFlight,
}

/// A re-run that has been claimed and handed to execution.
#[derive(Debug)]
pub struct RerunOutcome {
    /// Detail path of the event, `domain/owner/repo/branch/commit`.
    pub path: String,
    /// Completes when the build has been finalized.
    pub execution: JoinHandle<()>,
}

/// Deduplicates incoming work against the event store.
pub struct Intake {
    dispatcher: Dispatcher,
}

impl Intake {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Consume notifications one at a time until the channel closes.
    pub async fn run(&self, mut notifications: mpsc::Receiver<CommitNotification>) {
        info!("Intake started");
        while let Some(notification) = notifications.recv().await {
            let fingerprint = notification.fingerprint();
            match self.handle(notification).await {
                Ok(outcome) => debug!(path = %fingerprint, ?outcome, "Handled notification"),
                Err(e) => warn!(path = %fingerprint, error = %e, "Failed to handle notification"),
            }
        }
        info!("Intake stopped");
    }

    /// Queue a build for a notification, or reset the existing one.
    pub async fn handle(&self, notification: CommitNotification) -> SchedulerResult<IntakeOutcome> {
        if !notification.is_buildable() {
            return Ok(IntakeOutcome::Ignored);
        }

        let store = self.dispatcher.store();
        let fingerprint = notification.fingerprint();
        if let Some(existing) = store.lookup(&fingerprint).await? {
            return self.requeue(existing).await;
        }

        let mut event = notification.to_event();
        match store.insert(&mut event).await {
            Ok(id) => {
                info!(event_id = %id, path = %event.path(), "Queued build");
                self.dispatcher.report(&mut event).await;
                Ok(IntakeOutcome::Queued)
            }
            // Inserted concurrently since the lookup.
            Err(DbError::Duplicate(_)) => {
                let existing = store
                    .lookup(&fingerprint)
                    .await?
                    .ok_or_else(|| DbError::NotFound(fingerprint.path()))?;
                self.requeue(existing).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn requeue(&self, existing: Event) -> SchedulerResult<IntakeOutcome> {
        let Some(id) = existing.id else {
            return Err(DbError::NotPersisted.into());
        };
        if !existing.status.is_resettable() {
            return Ok(IntakeOutcome::InFlight);
        }

        match self.dispatcher.store().requeue(id).await? {
            Some(mut event) => {
                info!(event_id = %id, path = %event.path(), "Requeued build");
                self.dispatcher.report(&mut event).await;
                Ok(IntakeOutcome::Requeued)
            }
            None => Ok(IntakeOutcome::InFlight),
        }
    }

    /// Re-run a build right away, creating it when it is unknown.
    ///
    /// Fails with [`SchedulerError::Conflict`] while the build is running.
    pub async fn rerun(&self, fingerprint: Fingerprint) -> SchedulerResult<RerunOutcome> {
        let store = self.dispatcher.store();
        let path = fingerprint.path();

        let event = match store.lookup(&fingerprint).await? {
            Some(event) if !event.status.is_resettable() => {
                return Err(SchedulerError::Conflict(path));
            }
            Some(event) => event,
            None => {
                if !self.dispatcher.reporters().supports(&fingerprint.domain) {
                    return Err(SchedulerError::UnsupportedDomain(fingerprint.domain));
                }
                let mut event = Event::push(fingerprint);
                match store.insert(&mut event).await {
                    Ok(id) => {
                        info!(event_id = %id, path = %path, "Created build for re-run");
                        event
                    }
                    Err(DbError::Duplicate(_)) => return Err(SchedulerError::Conflict(path)),
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let id = event.id.ok_or(DbError::NotPersisted)?;
        let claimed = store
            .claim_for_rerun(id)
            .await?
            .ok_or_else(|| SchedulerError::Conflict(path.clone()))?;

        info!(event_id = %id, path = %path, "Re-running build");
        let execution = self.dispatcher.execute_when_ready(claimed);
        Ok(RerunOutcome { path, execution })
    }
}
