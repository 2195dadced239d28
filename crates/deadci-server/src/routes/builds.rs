//! Build listings, build details and manual re-runs.
//!
//! Paths mirror the event fingerprint: `/<domain>/<owner>/<repo>/<branch>/<commit>`.
//! The branch may span several segments. Paths with fewer than five segments
//! list the builds under that prefix.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use deadci_core::{BuildStatus, Event, EventType, Fingerprint, is_valid_segment};
use deadci_db::EventFilter;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

/// Segments in a full build path with a single-segment branch.
const FULL_PATH_SEGMENTS: usize = 5;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/{*path}", get(view).post(rerun))
}

/// JSON representation of a build.
#[derive(Debug, Serialize)]
pub struct EventView {
    pub time: DateTime<Utc>,
    pub domain: String,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub commit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
    pub status: BuildStatus,
    pub url: String,
    pub log: String,
}

impl EventView {
    fn new(state: &AppState, event: Event) -> Self {
        let url = state.config.detail_url(&event.path());
        let log = event.log_text();
        let Fingerprint {
            domain,
            owner,
            repo,
            branch,
            commit,
        } = event.fingerprint;
        Self {
            time: event.created_at,
            domain,
            kind: event.kind,
            owner,
            repo,
            branch,
            commit,
            base_owner: event.base_owner,
            base_repo: event.base_repo,
            base_branch: event.base_branch,
            status: event.status,
            url,
            log,
        }
    }
}

/// Split a request path into fingerprint segments.
///
/// Returns `None` when any segment is not a valid path segment.
fn parse_segments(path: &str) -> Option<Vec<&str>> {
    let path = path.trim_start_matches('/').trim_end_matches('/');
    if path.is_empty() {
        return Some(Vec::new());
    }

    let segments: Vec<&str> = path.split('/').collect();
    segments
        .iter()
        .all(|s| is_valid_segment(s))
        .then_some(segments)
}

/// Build a fingerprint from a full path; everything between repo and commit is the branch.
fn fingerprint(segments: &[&str]) -> Option<Fingerprint> {
    let [domain, owner, repo, branch @ .., commit] = segments else {
        return None;
    };
    if branch.is_empty() {
        return None;
    }
    Some(Fingerprint::new(
        *domain,
        *owner,
        *repo,
        branch.join("/"),
        *commit,
    ))
}

fn wants_text(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.starts_with("text/plain"))
}

async fn list(state: &AppState, filter: EventFilter) -> Result<Response, ApiError> {
    let events = state.store.list(&filter).await?;
    let views: Vec<EventView> = events
        .into_iter()
        .map(|event| EventView::new(state, event))
        .collect();
    Ok(Json(views).into_response())
}

/// List the most recent builds.
async fn index(State(state): State<AppState>) -> Result<Response, ApiError> {
    list(&state, EventFilter::all()).await
}

/// List builds under a path prefix, or show a single build.
///
/// A single build is rendered as text when the client asks for `text/plain`.
async fn view(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let segments =
        parse_segments(&path).ok_or_else(|| ApiError::NotFound(format!("/{}", path)))?;
    if segments.len() < FULL_PATH_SEGMENTS {
        return list(&state, EventFilter::from_segments(&segments)).await;
    }

    let fingerprint = fingerprint(&segments)
        .ok_or_else(|| ApiError::NotFound(format!("/{}", path)))?;
    let event = state
        .store
        .lookup(&fingerprint)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("build {}", fingerprint)))?;

    if wants_text(&headers) {
        let text = event.to_string();
        return Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response());
    }
    Ok(Json(EventView::new(&state, event)).into_response())
}

/// Re-run a build and redirect to its detail view.
async fn rerun(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Redirect, ApiError> {
    let fingerprint = parse_segments(&path)
        .and_then(|segments| fingerprint(&segments))
        .ok_or_else(|| ApiError::NotFound(format!("/{}", path)))?;

    let outcome = state.intake.rerun(fingerprint).await?;
    Ok(Redirect::to(&format!("/{}", outcome.path)))
}
