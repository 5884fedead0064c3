//! Canonical paths under the engine home directory.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::io::durable::ensure_dir;

/// Destination of the state file, relative to the home directory.
///
/// The coordinator stages the state under this path so the transaction
/// publishes it into `home/var/state.json`.
pub const STATE_REL_PATH: &str = "var/state.json";

/// All canonical paths for a home directory.
#[derive(Debug, Clone)]
pub struct HomeLayout {
    pub home: PathBuf,
    pub config_path: PathBuf,
    pub var_dir: PathBuf,
    pub txn_dir: PathBuf,
    pub state_path: PathBuf,
    pub journal_path: PathBuf,
    pub metrics_path: PathBuf,
}

impl HomeLayout {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let var_dir = home.join("var");
        Self {
            config_path: home.join("config.toml"),
            txn_dir: var_dir.join("txn"),
            state_path: home.join(STATE_REL_PATH),
            journal_path: var_dir.join("journal.ndjson"),
            metrics_path: var_dir.join("metrics.json"),
            var_dir,
            home,
        }
    }

    /// Create `var/` and `var/txn/` if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        ensure_dir(&self.var_dir)?;
        ensure_dir(&self.txn_dir)
    }

    pub fn home(&self) -> &Path {
        &self.home
    }
}
