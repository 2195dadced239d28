//! GitHub webhook receiver.

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use deadci_core::{CommitNotification, NotificationKind};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::error::ApiError;

const GITHUB_DOMAIN: &str = "github.com";

pub fn router() -> Router<AppState> {
    Router::new().route("/postreceive", post(postreceive))
}

/// Verify the signature, parse the delivery and hand it to intake.
async fn postreceive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let event_type = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    if let Some(secret) = &state.config.github.secret {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok());
        if !verify_github_signature(secret, &body, signature) {
            warn!(event = %event_type, "Invalid webhook signature");
            return Err(ApiError::Unauthorized(
                "Invalid webhook signature".to_string(),
            ));
        }
    }

    let notification = match event_type {
        "push" => parse_push(&body)?,
        "pull_request" => parse_pull_request(&body)?,
        "ping" => {
            info!("Ping event received - webhook is configured correctly");
            return Ok(StatusCode::OK);
        }
        other => {
            debug!(event = %other, "Unhandled event type");
            return Ok(StatusCode::OK);
        }
    };

    let Some(notification) = notification else {
        return Ok(StatusCode::OK);
    };

    info!(event = %event_type, path = %notification.fingerprint(), "Received commit notification");
    state
        .notifications
        .send(notification)
        .await
        .map_err(|_| ApiError::Unavailable("Build intake is not running".to_string()))?;

    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
struct Account {
    login: Option<String>,
    name: Option<String>,
}

impl Account {
    /// Push payloads carry `name`; everything else carries `login`.
    fn handle(&self) -> Option<&str> {
        self.login.as_deref().or(self.name.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    owner: Account,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    #[serde(default)]
    deleted: bool,
    repository: Repository,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: String,
    pull_request: PullRequest,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    head: PullRequestRef,
    base: PullRequestRef,
}

#[derive(Debug, Deserialize)]
struct PullRequestRef {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: String,
    /// Missing when the fork has been deleted.
    repo: Option<Repository>,
}

fn parse_json<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))
}

fn owner_of(repo: &Repository) -> Result<String, ApiError> {
    repo.owner
        .handle()
        .map(String::from)
        .ok_or_else(|| ApiError::BadRequest("Repository owner missing".to_string()))
}

/// Parse a push delivery. Tag pushes and branch deletions produce nothing.
fn parse_push(body: &[u8]) -> Result<Option<CommitNotification>, ApiError> {
    let payload: PushPayload = parse_json(body)?;

    let Some(branch) = payload.git_ref.strip_prefix("refs/heads/") else {
        return Ok(None);
    };
    if payload.deleted || payload.after.bytes().all(|b| b == b'0') {
        return Ok(None);
    }

    Ok(Some(CommitNotification {
        domain: GITHUB_DOMAIN.to_string(),
        owner: owner_of(&payload.repository)?,
        repo: payload.repository.name.clone(),
        branch: branch.to_string(),
        commit: payload.after,
        kind: NotificationKind::Push,
    }))
}

/// Parse a pull request delivery into a notification for the head commit.
fn parse_pull_request(body: &[u8]) -> Result<Option<CommitNotification>, ApiError> {
    let payload: PullRequestPayload = parse_json(body)?;
    let PullRequest { head, base } = payload.pull_request;

    let (Some(head_repo), Some(base_repo)) = (&head.repo, &base.repo) else {
        return Ok(None);
    };

    Ok(Some(CommitNotification {
        domain: GITHUB_DOMAIN.to_string(),
        owner: owner_of(head_repo)?,
        repo: head_repo.name.clone(),
        branch: head.git_ref.clone(),
        commit: head.sha.clone(),
        kind: NotificationKind::PullRequest {
            action: payload.action,
            base_owner: owner_of(base_repo)?,
            base_repo: base_repo.name.clone(),
            base_branch: base.git_ref.clone(),
        },
    }))
}

/// Verify GitHub webhook signature.
fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // Signature format: "sha256=<hex>"
    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}
