//! Error types for DeadCI.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("report failed: {0}")]
    Report(String),
}

pub type Result<T> = std::result::Result<T, Error>;
