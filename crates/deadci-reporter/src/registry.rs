//! Domain to reporter lookup.

use deadci_core::{Event, Result, StatusReporter};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Reporters keyed by the domain they serve.
#[derive(Default, Clone)]
pub struct ReporterRegistry {
    reporters: HashMap<String, Arc<dyn StatusReporter>>,
}

impl ReporterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reporter under its own domain, replacing any previous one.
    pub fn register(&mut self, reporter: Arc<dyn StatusReporter>) {
        self.reporters
            .insert(reporter.domain().to_string(), reporter);
    }

    pub fn get(&self, domain: &str) -> Option<&Arc<dyn StatusReporter>> {
        self.reporters.get(domain)
    }

    pub fn supports(&self, domain: &str) -> bool {
        self.reporters.contains_key(domain)
    }

    /// Report an event through the reporter for its domain.
    pub async fn report(&self, event: &Event) -> Result<()> {
        match self.get(&event.fingerprint.domain) {
            Some(reporter) => reporter.report(event).await,
            None => {
                debug!(domain = %event.fingerprint.domain, "No reporter for domain");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for ReporterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReporterRegistry")
            .field("domains", &self.reporters.keys().collect::<Vec<_>>())
            .finish()
    }
}
