//! System configuration parsing.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// How repositories are cloned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneProtocol {
    /// `git@host:owner/repo.git`
    Ssh,
    /// `https://host/owner/repo.git`
    Https,
}

/// GitHub provider settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubSettings {
    pub enabled: bool,
    /// API token used for statuses and comments. Reporting is skipped without one.
    pub token: Option<String>,
    /// Webhook secret used to verify deliveries.
    pub secret: Option<String>,
    pub api_url: String,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            secret: None,
            api_url: DEFAULT_GITHUB_API_URL.to_string(),
        }
    }
}

/// Process-wide configuration, built once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadciConfig {
    /// Build command and its arguments.
    pub command: Vec<String>,
    /// Port the HTTP server listens on; also used in detail URLs.
    pub port: u16,
    /// Public hostname used in detail URLs.
    pub host: String,
    /// Parent of the scratch workspaces.
    pub temp_dir: PathBuf,
    pub clone_protocol: CloneProtocol,
    /// Optional mirror prefix replacing the provider host when cloning.
    pub clone_base: Option<String>,
    /// Number of polling workers.
    pub workers: usize,
    /// Upper bound on concurrently executing builds.
    pub max_concurrent_jobs: usize,
    /// Kill builds that run longer than this.
    pub job_timeout: Option<Duration>,
    pub poll_interval: Duration,
    pub github: GitHubSettings,
}

impl DeadciConfig {
    /// Configuration with defaults for everything but the command and port.
    pub fn new(command: Vec<String>, port: u16) -> Self {
        let workers = default_workers();
        Self {
            command,
            port,
            host: DEFAULT_HOST.to_string(),
            temp_dir: std::env::temp_dir(),
            clone_protocol: CloneProtocol::Ssh,
            clone_base: None,
            workers,
            max_concurrent_jobs: workers,
            job_timeout: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            github: GitHubSettings::default(),
        }
    }

    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        parse_config(&content)
    }

    /// Root directory holding one scratch workspace per fingerprint.
    pub fn workspace_root(&self) -> PathBuf {
        self.temp_dir.join("deadci")
    }

    /// URL git clones a repository from.
    pub fn clone_url(&self, domain: &str, owner: &str, repo: &str) -> String {
        if let Some(base) = &self.clone_base {
            return format!("{}/{}/{}.git", base.trim_end_matches('/'), owner, repo);
        }
        match self.clone_protocol {
            CloneProtocol::Ssh => format!("git@{}:{}/{}.git", domain, owner, repo),
            CloneProtocol::Https => format!("https://{}/{}/{}.git", domain, owner, repo),
        }
    }

    /// Public URL of a build's detail view.
    pub fn detail_url(&self, path: &str) -> String {
        format!("http://{}:{}/{}", self.host, self.port, path)
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Parse system configuration from KDL text.
pub fn parse_config(kdl: &str) -> ConfigResult<DeadciConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut command = Vec::new();
    let mut port = None;
    let mut config = DeadciConfig::new(Vec::new(), 0);
    let mut max_jobs = None;

    for node in doc.nodes() {
        match node.name().value() {
            "command" => {
                command = get_all_string_args(node);
                // A single "make test" style argument is split like a shell would.
                if command.len() == 1 && command[0].contains(char::is_whitespace) {
                    command = command[0].split_whitespace().map(String::from).collect();
                }
            }
            "port" => {
                port = Some(get_int_arg::<u16>(node, "port")?);
            }
            "host" => {
                if let Some(host) = get_first_string_arg(node).filter(|h| !h.trim().is_empty()) {
                    config.host = host.trim().to_string();
                }
            }
            "tempdir" => {
                if let Some(dir) = get_first_string_arg(node).filter(|d| !d.trim().is_empty()) {
                    config.temp_dir = PathBuf::from(dir.trim_end_matches('/'));
                }
            }
            "https-clone" => {
                if get_bool_arg(node, "https-clone")? {
                    config.clone_protocol = CloneProtocol::Https;
                }
            }
            "clone-base" => {
                config.clone_base = get_first_string_arg(node).filter(|b| !b.is_empty());
            }
            "workers" => {
                config.workers = get_positive_arg(node, "workers")?;
            }
            "max-jobs" => {
                max_jobs = Some(get_positive_arg(node, "max-jobs")?);
            }
            "job-timeout-secs" => {
                let secs = get_int_arg::<u64>(node, "job-timeout-secs")?;
                config.job_timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
            "poll-interval-ms" => {
                let ms = get_int_arg::<u64>(node, "poll-interval-ms")?;
                config.poll_interval = Duration::from_millis(ms);
            }
            "github" => {
                config.github = parse_github(node)?;
            }
            _ => {} // Ignore unknown nodes
        }
    }

    if command.is_empty() {
        return Err(ConfigError::MissingField(
            "command (the build/test command to run)".to_string(),
        ));
    }
    config.command = command;
    config.port = port.ok_or_else(|| ConfigError::MissingField("port".to_string()))?;
    config.max_concurrent_jobs = max_jobs.unwrap_or(config.workers);

    Ok(config)
}

fn parse_github(node: &KdlNode) -> ConfigResult<GitHubSettings> {
    let mut github = GitHubSettings::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "enabled" => {
                    github.enabled = get_bool_arg(child, "github.enabled")?;
                }
                "token" => {
                    github.token = get_first_string_arg(child).filter(|t| !t.is_empty());
                }
                "secret" => {
                    github.secret = get_first_string_arg(child).filter(|s| !s.is_empty());
                }
                "api-url" => {
                    if let Some(url) = get_first_string_arg(child) {
                        github.api_url = url.trim_end_matches('/').to_string();
                    }
                }
                _ => {}
            }
        }
    }

    // Credentials are only honored for an enabled provider.
    if !github.enabled {
        github.token = None;
        github.secret = None;
    }

    Ok(github)
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_bool_arg(node: &KdlNode, field: &str) -> ConfigResult<bool> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_bool())
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            message: "expected #true or #false".to_string(),
        })
}

fn get_int_arg<T: TryFrom<i128>>(node: &KdlNode, field: &str) -> ConfigResult<T> {
    let raw = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            message: "expected an integer".to_string(),
        })?;

    T::try_from(raw).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("{} is out of range", raw),
    })
}

fn get_positive_arg(node: &KdlNode, field: &str) -> ConfigResult<usize> {
    let value = get_int_arg::<usize>(node, field)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}
