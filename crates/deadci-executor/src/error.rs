//! Executor error types.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Why a build did not succeed.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to prepare workspace {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to build {0}")]
    Fingerprint(#[source] deadci_core::Error),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git clone failed with {0}")]
    Clone(ExitStatus),

    #[error("git checkout failed with {0}")]
    Checkout(ExitStatus),

    #[error("{0}")]
    Exit(ExitStatus),

    #[error("failed to read build output: {0}")]
    Output(#[source] std::io::Error),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}
