//! HTTP server and build daemon for DeadCI.
//!
//! Receives GitHub webhooks, serves build listings and logs, and accepts
//! manual re-run requests.

pub mod cli;
pub mod error;
pub mod routes;
pub mod shutdown;
pub mod state;

pub use cli::Cli;
pub use state::AppState;
