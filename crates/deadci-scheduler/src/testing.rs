//! Shared fixtures for scheduler tests.

use async_trait::async_trait;
use deadci_config::DeadciConfig;
use deadci_core::{BuildStatus, Error, Event, Fingerprint, StatusReporter};
use deadci_db::{EventStore, SqliteEventStore, create_pool, run_migrations};
use deadci_executor::JobExecutor;
use deadci_reporter::ReporterRegistry;
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use crate::Dispatcher;

/// Records every status it is asked to report for `github.com`.
pub struct RecordingReporter {
    seen: Mutex<Vec<BuildStatus>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingReporter {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            fail: false,
            delay: None,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            fail: true,
            delay: None,
        })
    }

    /// Succeeds, but only records a status after `delay`.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            fail: false,
            delay: Some(delay),
        })
    }

    pub fn statuses(&self) -> Vec<BuildStatus> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    fn domain(&self) -> &str {
        "github.com"
    }

    async fn report(&self, event: &Event) -> deadci_core::Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.seen.lock().unwrap().push(event.status);
        if self.fail {
            return Err(Error::Report("provider unavailable".to_string()));
        }
        Ok(())
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub config: DeadciConfig,
    pub store: Arc<SqliteEventStore>,
    pub reporter: Arc<RecordingReporter>,
    pub dispatcher: Dispatcher,
}

impl Harness {
    /// Store, registry and executor; clones come from `<tmp>/mirror`.
    pub async fn new(reporter: Arc<RecordingReporter>) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = DeadciConfig::new(vec!["sh".to_string(), "runtests".to_string()], 8080);
        config.temp_dir = tmp.path().join("work");
        config.clone_base = Some(tmp.path().join("mirror").display().to_string());
        config.workers = 2;
        config.max_concurrent_jobs = 2;
        config.poll_interval = Duration::from_millis(20);

        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = Arc::new(SqliteEventStore::new(pool));

        let mut registry = ReporterRegistry::new();
        registry.register(reporter.clone());

        let executor = Arc::new(JobExecutor::new(
            Arc::new(config.clone()),
            store.clone(),
        ));
        let dispatcher = Dispatcher::new(
            store.clone(),
            Arc::new(registry),
            executor,
            config.max_concurrent_jobs,
        );

        Self {
            tmp,
            config,
            store,
            reporter,
            dispatcher,
        }
    }

    /// Create `<tmp>/mirror/acme/widgets.git` with one commit holding `runtests`.
    ///
    /// Returns the commit, or `None` when git is unavailable.
    pub fn mirror(&self, script: &str) -> Option<String> {
        let available = Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if !available {
            return None;
        }

        let repo = self.tmp.path().join("mirror/acme/widgets.git");
        std::fs::create_dir_all(&repo).unwrap();
        git(&repo, &["init", "-q"]);
        std::fs::write(repo.join("runtests"), script).unwrap();
        git(&repo, &["add", "runtests"]);
        git(&repo, &["commit", "-q", "-m", "add tests"]);
        Some(git(&repo, &["rev-parse", "HEAD"]))
    }

    pub async fn stored(&self, event: &Event) -> Event {
        self.lookup(&event.fingerprint).await
    }

    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Event {
        self.store.lookup(fingerprint).await.unwrap().unwrap()
    }

    /// Poll until the event for `fingerprint` reaches a terminal status.
    pub async fn wait_terminal(&self, fingerprint: &Fingerprint) -> Event {
        for _ in 0..500 {
            if let Some(event) = self.store.lookup(fingerprint).await.unwrap() {
                if event.status.is_terminal() {
                    return event;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("build for {} never finished", fingerprint);
    }
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=DeadCI Test",
            "-c",
            "user.email=test@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap().trim().to_string()
}
