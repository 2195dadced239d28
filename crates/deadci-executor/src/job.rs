//! Running one build event end to end.

use deadci_config::DeadciConfig;
use deadci_core::{BuildStatus, Event, EventType};
use deadci_db::{DbResult, EventStore};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::ExecutorError;
use crate::capture::{Abort, Deadline, capture};
use crate::workspace;

/// Final status of an execution and the error that caused it, if any.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub status: BuildStatus,
    pub error: Option<ExecutorError>,
}

impl ExecutionOutcome {
    fn success() -> Self {
        Self {
            status: BuildStatus::Success,
            error: None,
        }
    }
}

/// Clones, checks out and tests events on the local machine.
pub struct JobExecutor {
    config: Arc<DeadciConfig>,
    store: Arc<dyn EventStore>,
}

impl JobExecutor {
    pub fn new(config: Arc<DeadciConfig>, store: Arc<dyn EventStore>) -> Self {
        Self { config, store }
    }

    /// Execute a claimed event, persisting output as it is produced.
    ///
    /// The event must already be `running`. Build failures are reported in the
    /// outcome; only event store faults are returned as errors.
    pub async fn run(&self, event: &mut Event) -> DbResult<ExecutionOutcome> {
        assert_eq!(
            event.status,
            BuildStatus::Running,
            "event {} must be claimed before it runs",
            event.path()
        );

        match self.execute(event).await {
            Ok(()) => Ok(ExecutionOutcome::success()),
            Err(Abort::Build(status, error)) => {
                warn!(path = %event.path(), status = %status, error = %error, "Build did not succeed");
                Ok(ExecutionOutcome {
                    status,
                    error: Some(error),
                })
            }
            Err(Abort::Store(e)) => Err(e),
        }
    }

    async fn execute(&self, event: &mut Event) -> Result<(), Abort> {
        let deadline = self.config.job_timeout.map(Deadline::after);
        let dir = workspace::workspace_dir(&self.config, event)
            .map_err(|e| Abort::Build(BuildStatus::FailedBoot, e))?;

        workspace::prepare(&dir)
            .await
            .map_err(|e| Abort::Build(BuildStatus::FailedBoot, e))?;

        let fp = &event.fingerprint;
        let url = self.config.clone_url(&fp.domain, &fp.owner, &fp.repo);
        let checkout = dir.join(&fp.repo);
        info!(path = %event.path(), url = %url, "Cloning repository");

        let mut clone = git(&dir);
        clone.args(["clone", "--"]).arg(&url).arg(&fp.repo);
        let status = self
            .step(event, clone, deadline, BuildStatus::FailedBoot)
            .await?;
        if !status.success() {
            return Err(Abort::Build(
                BuildStatus::FailedBoot,
                ExecutorError::Clone(status),
            ));
        }

        let mut checkout_cmd = git(&checkout);
        // A trailing `--` keeps the commit from being read as a path.
        checkout_cmd
            .args(["checkout", "-q"])
            .arg(&event.fingerprint.commit)
            .arg("--");
        let status = self
            .step(event, checkout_cmd, deadline, BuildStatus::FailedBoot)
            .await?;
        if !status.success() {
            return Err(Abort::Build(
                BuildStatus::FailedBoot,
                ExecutorError::Checkout(status),
            ));
        }

        info!(path = %event.path(), command = ?self.config.command, "Running build command");
        let command = self.build_command(event, &checkout);
        let status = self
            .step(event, command, deadline, BuildStatus::Failed)
            .await?;
        if !status.success() {
            return Err(Abort::Build(BuildStatus::Failed, ExecutorError::Exit(status)));
        }

        info!(path = %event.path(), "Build succeeded");
        Ok(())
    }

    /// Spawn `command` and capture its output into the event.
    ///
    /// Failing to start is always a boot failure.
    async fn step(
        &self,
        event: &mut Event,
        mut command: Command,
        deadline: Option<Deadline>,
        on_error: BuildStatus,
    ) -> Result<std::process::ExitStatus, Abort> {
        let child = spawn(&mut command)?;
        capture(self.store.as_ref(), event, child, deadline, on_error).await
    }

    fn build_command(&self, event: &Event, checkout: &Path) -> Command {
        let (program, args) = match self.config.command.split_first() {
            Some((program, args)) => (program.as_str(), args),
            None => ("", &[][..]),
        };

        let fp = &event.fingerprint;
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(checkout)
            .env("CI", "true")
            .env("DEADCI_DOMAIN", &fp.domain)
            .env("DEADCI_OWNER", &fp.owner)
            .env("DEADCI_REPO", &fp.repo)
            .env("DEADCI_BRANCH", &fp.branch)
            .env("DEADCI_COMMIT", &fp.commit)
            .env("DEADCI_TYPE", event.kind.as_str());

        if event.kind == EventType::PullRequest {
            let base = [
                ("DEADCI_BASEOWNER", &event.base_owner),
                ("DEADCI_BASEREPO", &event.base_repo),
                ("DEADCI_BASEBRANCH", &event.base_branch),
            ];
            for (key, value) in base {
                if let Some(value) = value {
                    command.env(key, value);
                }
            }
        }
        command
    }
}

fn git(dir: &Path) -> Command {
    let mut command = Command::new("git");
    command.current_dir(dir).env("GIT_TERMINAL_PROMPT", "0");
    command
}

fn spawn(command: &mut Command) -> Result<Child, Abort> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| {
            let program = command.as_std().get_program().to_string_lossy().into_owned();
            Abort::Build(
                BuildStatus::FailedBoot,
                ExecutorError::Spawn { program, source },
            )
        })
}
