//! Shared deterministic types for the state/journal layer.
//!
//! These types define the on-disk contracts for `var/state.json`,
//! `var/journal.ndjson` and `var/metrics.json`. Field order is the
//! serialization order, so reordering fields changes the files on disk.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Workflow step the orchestrator is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    #[default]
    Plan,
    Implement,
    Test,
    Review,
    Done,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Plan => "plan",
            Step::Implement => "implement",
            Step::Test => "test",
            Step::Review => "review",
            Step::Done => "done",
        }
    }
}

/// Authoritative orchestrator record (`var/state.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ApplicationState {
    /// Number of successful commits applied to this record.
    pub version: u64,
    pub step: Step,
    /// Turn counter (1-indexed once work starts).
    pub turn: u32,
    /// Task currently owning the execution slot.
    pub wip: Option<String>,
    /// When the current WIP lease lapses.
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub inputs: BTreeMap<String, String>,
    pub artifacts: BTreeMap<String, String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ApplicationState {
    /// A lease without an expiry never lapses.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        match self.lease_expires_at {
            Some(expires_at) => expires_at <= now,
            None => false,
        }
    }
}

/// Descriptor for a file produced during a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: String,
    pub path: String,
}

/// One line of `var/journal.ndjson`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub ts: DateTime<Utc>,
    pub turn: u32,
    pub step: Step,
    pub decision: String,
    pub elapsed_ms: u64,
    pub error: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
}

/// Best-effort counters persisted in `var/metrics.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MetricsSnapshot {
    pub cas_conflicts: u64,
    pub commit_successes: u64,
    pub commit_failures: u64,
    pub updated_at: Option<DateTime<Utc>>,
}
