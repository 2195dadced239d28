//! Commit notifications delivered by webhook intake.

use serde::{Deserialize, Serialize};

use crate::{Event, Fingerprint};

/// Pull request actions that introduce new code to test.
const BUILDABLE_ACTIONS: [&str; 2] = ["opened", "synchronize"];

/// What kind of change a notification describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    Push,
    PullRequest {
        action: String,
        base_owner: String,
        base_repo: String,
        base_branch: String,
    },
}

/// An already-authenticated commit notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitNotification {
    pub domain: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub commit: String,
    #[serde(flatten)]
    pub kind: NotificationKind,
}

impl CommitNotification {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(
            self.domain.clone(),
            self.owner.clone(),
            self.repo.clone(),
            self.branch.clone(),
            self.commit.clone(),
        )
    }

    /// Pushes always build; pull requests only when opened or updated.
    pub fn is_buildable(&self) -> bool {
        match &self.kind {
            NotificationKind::Push => true,
            NotificationKind::PullRequest { action, .. } => {
                BUILDABLE_ACTIONS.contains(&action.as_str())
            }
        }
    }

    /// Build a fresh pending event for this notification.
    pub fn to_event(&self) -> Event {
        match &self.kind {
            NotificationKind::Push => Event::push(self.fingerprint()),
            NotificationKind::PullRequest {
                base_owner,
                base_repo,
                base_branch,
                ..
            } => Event::pull_request(
                self.fingerprint(),
                base_owner.clone(),
                base_repo.clone(),
                base_branch.clone(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BuildStatus, EventType};

    fn pull_request(action: &str) -> CommitNotification {
        CommitNotification {
            domain: "github.com".to_string(),
            owner: "contributor".to_string(),
            repo: "widgets".to_string(),
            branch: "feature".to_string(),
            commit: "def456".to_string(),
            kind: NotificationKind::PullRequest {
                action: action.to_string(),
                base_owner: "acme".to_string(),
                base_repo: "widgets".to_string(),
                base_branch: "main".to_string(),
            },
        }
    }

    #[test]
    fn test_only_new_code_pull_requests_build() {
        assert!(pull_request("opened").is_buildable());
        assert!(pull_request("synchronize").is_buildable());
        assert!(!pull_request("closed").is_buildable());
        assert!(!pull_request("labeled").is_buildable());
    }

    #[test]
    fn test_pull_request_event_carries_base() {
        let event = pull_request("opened").to_event();
        assert_eq!(event.kind, EventType::PullRequest);
        assert_eq!(event.status, BuildStatus::Pending);
        assert_eq!(event.base_owner.as_deref(), Some("acme"));
        assert_eq!(event.base_branch.as_deref(), Some("main"));
        assert_eq!(event.fingerprint.owner, "contributor");
    }
}
