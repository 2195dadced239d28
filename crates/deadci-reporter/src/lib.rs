//! Commit status reporting for DeadCI.
//!
//! Reporters are registered per source-control domain; events from domains
//! without a reporter are silently not reported.

pub mod github;
pub mod registry;

pub use github::{GitHubClient, GitHubError, GitHubReporter, GITHUB_DOMAIN, translate_status};
pub use registry::ReporterRegistry;
