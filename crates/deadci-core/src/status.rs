//! Build status state machine.
//!
//! ```text
//! pending ──claim──▶ running ──▶ success | failed | failed-boot
//!    ▲                                        │
//!    └──────────── requeue / re-run ──────────┘
//! ```
//!
//! A running build is never reset; only its completion path moves it on.

use serde::{Deserialize, Serialize};

/// Status of a build event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStatus {
    Pending,
    Running,
    Success,
    Failed,
    FailedBoot,
}

impl BuildStatus {
    pub const ALL: [BuildStatus; 5] = [
        BuildStatus::Pending,
        BuildStatus::Running,
        BuildStatus::Success,
        BuildStatus::Failed,
        BuildStatus::FailedBoot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Failed => "failed",
            BuildStatus::FailedBoot => "failed-boot",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failed | BuildStatus::FailedBoot
        )
    }

    /// Whether an external reset (requeue or re-run) may touch a build in this status.
    pub fn is_resettable(&self) -> bool {
        !matches!(self, BuildStatus::Running)
    }

    /// Check whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        match (self, next) {
            (BuildStatus::Running, next) => next.is_terminal(),
            (_, BuildStatus::Pending) | (_, BuildStatus::Running) => true,
            // Only a running build can finish.
            (_, _) => false,
        }
    }

    /// Human-readable description sent alongside provider statuses.
    pub fn description(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "Build queued - please wait",
            BuildStatus::Running => "Build and tests running - please wait",
            BuildStatus::Success => "Build successful and tests passed",
            BuildStatus::Failed => "Build testing failed",
            BuildStatus::FailedBoot => "Error bootstrapping build environment",
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BuildStatus::Pending),
            "running" => Ok(BuildStatus::Running),
            "success" => Ok(BuildStatus::Success),
            "failed" => Ok(BuildStatus::Failed),
            "failed-boot" => Ok(BuildStatus::FailedBoot),
            _ => Err(crate::Error::InvalidInput(format!(
                "unknown build status: {}",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_only_moves_to_terminal() {
        let running = BuildStatus::Running;
        assert!(!running.can_transition_to(BuildStatus::Pending));
        assert!(!running.can_transition_to(BuildStatus::Running));
        assert!(running.can_transition_to(BuildStatus::Success));
        assert!(running.can_transition_to(BuildStatus::Failed));
        assert!(running.can_transition_to(BuildStatus::FailedBoot));
    }

    #[test]
    fn test_terminal_states_can_be_reset() {
        for status in [
            BuildStatus::Success,
            BuildStatus::Failed,
            BuildStatus::FailedBoot,
        ] {
            assert!(status.is_terminal());
            assert!(status.is_resettable());
            assert!(status.can_transition_to(BuildStatus::Pending));
            assert!(status.can_transition_to(BuildStatus::Running));
            assert!(!status.can_transition_to(BuildStatus::Success));
        }
    }

    #[test]
    fn test_pending_cannot_finish_without_running() {
        let pending = BuildStatus::Pending;
        assert!(pending.can_transition_to(BuildStatus::Running));
        assert!(pending.can_transition_to(BuildStatus::Pending));
        assert!(!pending.can_transition_to(BuildStatus::Success));
        assert!(!pending.can_transition_to(BuildStatus::Failed));
    }

    #[test]
    fn test_status_names_parse_back() {
        for status in BuildStatus::ALL {
            assert_eq!(status.as_str().parse::<BuildStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<BuildStatus>().is_err());
    }

    #[test]
    fn test_serde_uses_kebab_case() {
        let json = serde_json::to_string(&BuildStatus::FailedBoot).unwrap();
        assert_eq!(json, "\"failed-boot\"");
    }
}
