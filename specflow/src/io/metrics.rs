//! Best-effort counters in `var/metrics.json`.
//!
//! Nothing here may fail a state write: loads fall back to an empty snapshot
//! and store errors are returned for the caller to log and drop.

use std::path::Path;

use chrono::Utc;
use tracing::{debug, warn};

use crate::core::types::MetricsSnapshot;
use crate::error::Result;
use crate::io::durable::{read_json, to_pretty_json, write_atomic};

/// Load the snapshot, substituting an empty one if it is missing or unreadable.
pub fn load_metrics(path: &Path) -> MetricsSnapshot {
    match read_json::<MetricsSnapshot>(path) {
        Ok(snapshot) => snapshot,
        Err(err) if err.is_not_found() => MetricsSnapshot::default(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "metrics unreadable, starting empty");
            MetricsSnapshot::default()
        }
    }
}

/// Persist the snapshot (temp file + rename), stamping `updated_at`.
pub fn store_metrics(path: &Path, snapshot: &mut MetricsSnapshot) -> Result<()> {
    snapshot.updated_at = Some(Utc::now());
    write_atomic(path, &to_pretty_json("metrics", snapshot)?)?;
    debug!(
        cas_conflicts = snapshot.cas_conflicts,
        commit_successes = snapshot.commit_successes,
        commit_failures = snapshot.commit_failures,
        "metrics stored"
    );
    Ok(())
}

/// Load, apply `update`, store; failures are logged and swallowed.
pub fn record(path: &Path, update: impl FnOnce(&mut MetricsSnapshot)) {
    let mut snapshot = load_metrics(path);
    update(&mut snapshot);
    if let Err(err) = store_metrics(path, &mut snapshot) {
        warn!(path = %path.display(), error = %err, "metrics write failed");
    }
}
