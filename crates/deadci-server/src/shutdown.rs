//! Two-stage interrupt handling.

use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `shutdown` on the first signal and return on the second.
///
/// Racing this against the shutdown work lets a second signal cut any phase short.
pub async fn escalate<S, F>(shutdown: &CancellationToken, mut signal: S)
where
    S: FnMut() -> F,
    F: Future<Output = ()>,
{
    signal().await;
    info!("Interrupted; shutting down");
    shutdown.cancel();
    signal().await;
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
pub async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for interrupt");
        std::future::pending::<()>().await;
    }
}
