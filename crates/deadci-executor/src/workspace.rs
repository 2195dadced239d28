//! Scratch workspaces.

use deadci_config::DeadciConfig;
use deadci_core::Event;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::ExecutorError;

/// Directory the repository of `event` is cloned into.
///
/// Fingerprints that would escape the workspace root are refused.
pub fn workspace_dir(config: &DeadciConfig, event: &Event) -> Result<PathBuf, ExecutorError> {
    event
        .fingerprint
        .validate()
        .map_err(ExecutorError::Fingerprint)?;
    Ok(config.workspace_root().join(event.path()))
}

/// Remove any previous workspace at `dir` and create an empty one.
pub async fn prepare(dir: &Path) -> Result<(), ExecutorError> {
    let wrap = |source| ExecutorError::Workspace {
        path: dir.to_path_buf(),
        source,
    };

    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(wrap(e)),
    }
    tokio::fs::create_dir_all(dir).await.map_err(wrap)
}
