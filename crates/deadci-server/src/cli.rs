//! Command line interface.

use clap::Parser;
use std::path::PathBuf;

/// Minimal continuous integration server.
#[derive(Debug, Parser)]
#[command(name = "deadci", version, about)]
pub struct Cli {
    /// Writable directory holding the database and, by default, deadci.kdl
    #[arg(long, env = "DEADCI_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Path to the configuration file when it is not in the data directory
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.data_dir.join("deadci.kdl"))
    }

    /// SQLite URL of the event database.
    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.data_dir.join("deadci.db").display())
    }
}
