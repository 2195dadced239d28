//! KDL configuration parsing for DeadCI.
//!
//! The configuration is read once at startup into an immutable [`DeadciConfig`]
//! that is handed to the executor, reporters and worker pool.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{CloneProtocol, DeadciConfig, GitHubSettings, parse_config};
