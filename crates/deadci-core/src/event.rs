//! Build events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BuildStatus, Error, EventId};

/// Log marker written when a build is claimed again after a previous attempt.
pub const RETRY_MARKER: &str = "Retrying...\n";

/// The (domain, owner, repo, branch, commit) tuple identifying one logical build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub domain: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub commit: String,
}

impl Fingerprint {
    pub fn new(
        domain: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        commit: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
            commit: commit.into(),
        }
    }

    /// `domain/owner/repo/branch/commit`, used for workspaces and detail views.
    ///
    /// Branch names may contain `/`, so the path can have more than five segments.
    pub fn path(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.domain, self.owner, self.repo, self.branch, self.commit
        )
    }

    /// Check that every part of the path is a plain segment.
    ///
    /// The branch is checked one `/`-separated component at a time.
    pub fn validate(&self) -> crate::Result<()> {
        let parts = [&self.domain, &self.owner, &self.repo, &self.commit];
        let invalid = parts
            .into_iter()
            .map(String::as_str)
            .chain(self.branch.split('/'))
            .find(|segment| !is_valid_segment(segment));

        match invalid {
            Some(segment) => Err(Error::InvalidInput(format!(
                "invalid path segment {:?} in {}",
                segment, self
            ))),
            None => Ok(()),
        }
    }
}

/// Whether `segment` can be used as one component of a build path.
///
/// Segments become directory names and git arguments: no `.`/`..`, no leading
/// `-`, no separators, quotes, whitespace or control characters.
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.starts_with('-')
        && !segment.chars().any(|c| {
            c == '/' || c == '\\' || c == '"' || c.is_whitespace() || c.is_control()
        })
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

/// Kind of change that produced a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Push,
    PullRequest,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Push => "push",
            EventType::PullRequest => "pull_request",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(EventType::Push),
            "pull_request" => Ok(EventType::PullRequest),
            _ => Err(crate::Error::InvalidInput(format!(
                "unknown event type: {}",
                s
            ))),
        }
    }
}

/// One build attempt lineage for a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Assigned by the store on first insert.
    pub id: Option<EventId>,
    pub fingerprint: Fingerprint,
    pub kind: EventType,
    /// Pull request target; `None` for pushes.
    pub base_owner: Option<String>,
    pub base_repo: Option<String>,
    pub base_branch: Option<String>,
    pub status: BuildStatus,
    pub created_at: DateTime<Utc>,
    /// Captured process output plus system markers.
    pub log: Vec<u8>,
}

impl Event {
    /// A fresh pending push build.
    pub fn push(fingerprint: Fingerprint) -> Self {
        Self {
            id: None,
            fingerprint,
            kind: EventType::Push,
            base_owner: None,
            base_repo: None,
            base_branch: None,
            status: BuildStatus::Pending,
            created_at: Utc::now(),
            log: Vec::new(),
        }
    }

    /// A fresh pending pull request build targeting `base_owner/base_repo`.
    pub fn pull_request(
        fingerprint: Fingerprint,
        base_owner: impl Into<String>,
        base_repo: impl Into<String>,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            kind: EventType::PullRequest,
            base_owner: Some(base_owner.into()),
            base_repo: Some(base_repo.into()),
            base_branch: Some(base_branch.into()),
            ..Self::push(fingerprint)
        }
    }

    pub fn path(&self) -> String {
        self.fingerprint.path()
    }

    /// Owner of the repository that receives statuses and comments.
    ///
    /// Pull requests report to the upstream target, not the fork.
    pub fn report_owner(&self) -> &str {
        match (self.kind, &self.base_owner) {
            (EventType::PullRequest, Some(owner)) => owner,
            _ => &self.fingerprint.owner,
        }
    }

    pub fn report_repo(&self) -> &str {
        match (self.kind, &self.base_repo) {
            (EventType::PullRequest, Some(repo)) => repo,
            _ => &self.fingerprint.repo,
        }
    }

    pub fn append_log(&mut self, bytes: &[u8]) {
        self.log.extend_from_slice(bytes);
    }

    /// Append a system marker on its own line.
    pub fn append_marker(&mut self, marker: &str) {
        self.log.push(b'\n');
        self.log.extend_from_slice(marker.as_bytes());
    }

    pub fn log_text(&self) -> String {
        String::from_utf8_lossy(&self.log).into_owned()
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "time:   {}", self.created_at)?;
        writeln!(f, "domain: {}", self.fingerprint.domain)?;
        writeln!(f, "type:   {}", self.kind)?;
        writeln!(f, "owner:  {}", self.fingerprint.owner)?;
        writeln!(f, "repo:   {}", self.fingerprint.repo)?;
        writeln!(f, "branch: {}", self.fingerprint.branch)?;
        writeln!(f, "commit: {}", self.fingerprint.commit)?;
        writeln!(f, "status: {}", self.status)?;
        writeln!(f)?;
        f.write_str(&self.log_text())
    }
}
