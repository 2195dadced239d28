//! Status reporter trait.
//!
//! Reporters push build status back to the source-control host a build came from.

use async_trait::async_trait;

use crate::{Event, Result};

/// A provider that can receive commit statuses for one domain.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Domain this reporter handles (e.g. `github.com`).
    fn domain(&self) -> &str;

    /// Post the event's current status to the provider.
    async fn report(&self, event: &Event) -> Result<()>;
}
