//! Application state.

use deadci_config::DeadciConfig;
use deadci_core::CommitNotification;
use deadci_db::EventStore;
use deadci_scheduler::Intake;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DeadciConfig>,
    pub store: Arc<dyn EventStore>,
    pub intake: Arc<Intake>,
    /// Feed consumed by the intake loop.
    pub notifications: mpsc::Sender<CommitNotification>,
}

impl AppState {
    pub fn new(
        config: Arc<DeadciConfig>,
        store: Arc<dyn EventStore>,
        intake: Arc<Intake>,
        notifications: mpsc::Sender<CommitNotification>,
    ) -> Self {
        Self {
            config,
            store,
            intake,
            notifications,
        }
    }
}
