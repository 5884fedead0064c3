//! Test-only helpers for building engine homes and fixture records.

use std::path::Path;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use crate::core::types::{ApplicationState, ArtifactRef, JournalEntry, Step};
use crate::io::layout::HomeLayout;

/// A throwaway engine home, removed on drop.
pub struct TestHome {
    dir: TempDir,
}

impl TestHome {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp home"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn layout(&self) -> HomeLayout {
        HomeLayout::new(self.dir.path())
    }
}

impl Default for TestHome {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic state at `version`.
pub fn sample_state(version: u64) -> ApplicationState {
    let mut state = ApplicationState {
        version,
        step: Step::Implement,
        turn: version as u32,
        wip: Some("task-1".to_string()),
        ..ApplicationState::default()
    };
    state
        .inputs
        .insert("goal".to_string(), "ship the parser".to_string());
    state
}

/// Deterministic journal entry for `turn`.
pub fn sample_entry(turn: u32) -> JournalEntry {
    JournalEntry {
        ts: Utc
            .with_ymd_and_hms(2026, 4, 2, 8, 30, 0)
            .single()
            .expect("valid timestamp"),
        turn,
        step: Step::Implement,
        decision: format!("advance turn {turn}"),
        elapsed_ms: 1_200,
        error: None,
        artifacts: vec![ArtifactRef {
            kind: "diff".to_string(),
            path: format!("artifacts/turn-{turn}.patch"),
        }],
    }
}
