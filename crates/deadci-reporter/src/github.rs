//! GitHub commit statuses and commit comments.

use async_trait::async_trait;
use deadci_config::DeadciConfig;
use deadci_core::{BuildStatus, Event, StatusReporter};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Domain served by [`GitHubReporter`].
pub const GITHUB_DOMAIN: &str = "github.com";

/// Status context shown next to each commit.
const STATUS_CONTEXT: &str = "deadci";

/// GitHub state for a build status.
pub fn translate_status(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::Pending | BuildStatus::Running => "pending",
        BuildStatus::Success => "success",
        BuildStatus::Failed => "failure",
        BuildStatus::FailedBoot => "error",
    }
}

/// Body of a commit status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRequest {
    pub state: String,
    pub target_url: String,
    pub description: String,
    pub context: String,
}

#[derive(Debug, Serialize)]
struct CommentRequest<'a> {
    body: &'a str,
}

/// Minimal GitHub REST client.
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    access_token: String,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }

    /// Set the status of a commit.
    pub async fn create_status(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        status: &StatusRequest,
    ) -> Result<(), GitHubError> {
        let url = format!(
            "{}/repos/{}/{}/statuses/{}",
            self.api_url, owner, repo, sha
        );
        self.post(&url, status, "create status").await
    }

    /// Comment on a commit.
    pub async fn create_commit_comment(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        body: &str,
    ) -> Result<(), GitHubError> {
        let url = format!(
            "{}/repos/{}/{}/commits/{}/comments",
            self.api_url, owner, repo, sha
        );
        self.post(&url, &CommentRequest { body }, "create comment")
            .await
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
        action: &str,
    ) -> Result<(), GitHubError> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("User-Agent", "DeadCI")
            .header("Accept", "application/vnd.github+json")
            .json(payload)
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GitHubError::Api(format!(
                "Failed to {} ({}): {}",
                action, status, text
            )));
        }
        Ok(())
    }
}

/// Reports build statuses to GitHub.
///
/// Pull requests are reported on the base repository. Without an API token
/// reporting is a no-op.
pub struct GitHubReporter {
    client: Option<GitHubClient>,
    config: Arc<DeadciConfig>,
}

impl GitHubReporter {
    pub fn new(config: Arc<DeadciConfig>) -> Self {
        let client = config
            .github
            .token
            .as_ref()
            .map(|token| GitHubClient::new(config.github.api_url.clone(), token.clone()));
        Self { client, config }
    }

    fn status_request(&self, event: &Event) -> StatusRequest {
        StatusRequest {
            state: translate_status(event.status).to_string(),
            target_url: self.config.detail_url(&event.path()),
            description: event.status.description().to_string(),
            context: STATUS_CONTEXT.to_string(),
        }
    }

    async fn send(&self, client: &GitHubClient, event: &Event) -> Result<(), GitHubError> {
        let (owner, repo) = (event.report_owner(), event.report_repo());
        let sha = &event.fingerprint.commit;
        let status = self.status_request(event);

        client.create_status(owner, repo, sha, &status).await?;
        debug!(path = %event.path(), state = %status.state, "Posted commit status");

        if status.state == "failure" {
            let body = comment_body(event.status, &status.description, &status.target_url);
            client.create_commit_comment(owner, repo, sha, &body).await?;
            info!(path = %event.path(), "Commented on failed commit");
        }
        Ok(())
    }
}

fn comment_body(status: BuildStatus, description: &str, url: &str) -> String {
    format!(
        "DeadCI - build {}: {}\nFor details please see: {}",
        status, description, url
    )
}

#[async_trait]
impl StatusReporter for GitHubReporter {
    fn domain(&self) -> &str {
        GITHUB_DOMAIN
    }

    async fn report(&self, event: &Event) -> deadci_core::Result<()> {
        let Some(client) = &self.client else {
            return Ok(());
        };
        self.send(client, event)
            .await
            .map_err(|e| deadci_core::Error::Report(e.to_string()))
    }
}

/// GitHub API errors.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),
}
