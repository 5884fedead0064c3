//! State/journal coordinator: the one place application state is written.
//!
//! `save_state_and_journal` publishes `var/state.json` and appends one journal
//! line as a single transaction, guarded by an optimistic version check:
//!
//! 1. the candidate carries `expected_version`, the persisted version is
//!    re-read and must match, and the in-process version register must still
//!    be claimable from `expected_version`; otherwise `VersionConflict`;
//! 2. stage the serialized state, mark intent, commit with the journal
//!    append as the commit callback, clean up.
//!
//! Concurrent callers never block each other; of any number of callers racing
//! on the same `expected_version`, exactly one wins the register.
//!
//! Metrics are a load/modify/store of `var/metrics.json` outside the CAS, so
//! overlapping saves can drop counter increments. Versions and the journal
//! are never affected.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::cas::{Conflict, check_versions};
use crate::core::types::{ApplicationState, JournalEntry, MetricsSnapshot};
use crate::error::{Error, Result};
use crate::io::journal::append_entry;
use crate::io::layout::{HomeLayout, STATE_REL_PATH};
use crate::io::metrics::{self, load_metrics, store_metrics};
use crate::io::state_store::{load_state, read_version, serialize_state};
use crate::io::txn::{Transaction, TxnManager};

pub struct Coordinator {
    manager: TxnManager,
    layout: HomeLayout,
    cancel: CancellationToken,
    // Highest version claimed by an in-flight or finished save.
    claimed: AtomicU64,
    // Set when a save failed after its intent was marked. The transaction
    // will be finished by recovery, so no newer state may be written first.
    blocked: AtomicBool,
}

impl Coordinator {
    /// Build a coordinator over `layout`; the version register starts at the
    /// persisted version.
    pub fn new(manager: TxnManager, layout: HomeLayout, cancel: CancellationToken) -> Result<Self> {
        let version = read_version(&layout.state_path)?;
        debug!(version, "coordinator ready");
        Ok(Self {
            manager,
            layout,
            cancel,
            claimed: AtomicU64::new(version),
            blocked: AtomicBool::new(false),
        })
    }

    pub fn layout(&self) -> &HomeLayout {
        &self.layout
    }

    pub fn load_state(&self) -> Result<ApplicationState> {
        load_state(&self.layout.state_path)
    }

    pub fn current_version(&self) -> Result<u64> {
        read_version(&self.layout.state_path)
    }

    /// True while an interrupted save is waiting for recovery.
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Persist `state` and append `record` as one unit.
    ///
    /// On success `state.version` is `expected_version + 1`. On failure it is
    /// restored to `expected_version` so the caller can retry cleanly; the
    /// on-disk state is untouched unless the failure happened after intent
    /// was marked, in which case recovery will finish the write and further
    /// saves fail until it has.
    pub fn save_state_and_journal(
        &self,
        state: &mut ApplicationState,
        record: &JournalEntry,
        expected_version: u64,
    ) -> Result<()> {
        if self.is_blocked() {
            return Err(Error::precondition(
                "an interrupted state write is pending recovery",
            ));
        }
        let next_version = expected_version.checked_add(1).ok_or_else(|| {
            Error::precondition(format!("version {expected_version} cannot be incremented"))
        })?;

        let on_disk = self.current_version()?;
        if let Err(conflict) = check_versions(expected_version, state.version, on_disk) {
            return Err(self.conflict(conflict));
        }
        if let Err(found) =
            self.claimed
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |claimed| {
                    (claimed <= expected_version).then_some(next_version)
                })
        {
            return Err(self.conflict(Conflict {
                expected: expected_version,
                found,
            }));
        }

        let mut metrics = load_metrics(&self.layout.metrics_path);
        let previous_updated_at = state.updated_at;

        let mut tx = match self.manager.begin(&self.cancel) {
            Ok(tx) => tx,
            Err(err) => {
                state.updated_at = previous_updated_at;
                return Err(self.fail(state, expected_version, &mut metrics, None, err));
            }
        };

        if let Err(err) = self.write_through(&mut tx, state, record, next_version) {
            state.updated_at = previous_updated_at;
            return Err(self.fail(state, expected_version, &mut metrics, Some(&mut tx), err));
        }

        metrics.commit_successes += 1;
        self.store_metrics(&mut metrics);
        if let Err(err) = self.manager.cleanup(&mut tx) {
            warn!(txn = %tx.id(), error = %err, "transaction cleanup failed");
        }
        info!(
            version = state.version,
            turn = record.turn,
            step = record.step.as_str(),
            decision = %record.decision,
            "state and journal committed"
        );
        Ok(())
    }

    /// Re-sync the version register with disk and lift the block set by an
    /// interrupted save. Only called once recovery has run.
    pub(crate) fn resync(&self) -> Result<()> {
        let version = self.current_version()?;
        self.claimed.store(version, Ordering::SeqCst);
        self.blocked.store(false, Ordering::SeqCst);
        debug!(version, "coordinator resynced");
        Ok(())
    }

    fn write_through(
        &self,
        tx: &mut Transaction,
        state: &mut ApplicationState,
        record: &JournalEntry,
        next_version: u64,
    ) -> Result<()> {
        state.version = next_version;
        state.updated_at = Some(Utc::now());
        let bytes = serialize_state(state)?;

        self.manager.stage_file(tx, STATE_REL_PATH, &bytes)?;
        self.manager.mark_intent(tx)?;

        let journal_path = &self.layout.journal_path;
        self.manager
            .commit(tx, &self.layout.home, || append_entry(journal_path, record))
    }

    fn fail(
        &self,
        state: &mut ApplicationState,
        expected_version: u64,
        metrics: &mut MetricsSnapshot,
        tx: Option<&mut Transaction>,
        err: Error,
    ) -> Error {
        state.version = expected_version;
        metrics.commit_failures += 1;
        self.store_metrics(metrics);

        match tx {
            Some(tx) if tx.status().past_point_of_no_return() => {
                self.blocked.store(true, Ordering::SeqCst);
                warn!(
                    txn = %tx.id(),
                    error = %err,
                    "state write failed after intent; left for recovery"
                );
            }
            Some(tx) => {
                if let Err(abandon_err) = self.manager.abandon(tx) {
                    warn!(txn = %tx.id(), error = %abandon_err, "abandon failed");
                }
                self.release(expected_version);
                warn!(error = %err, "state write failed before intent");
            }
            None => {
                self.release(expected_version);
                warn!(error = %err, "state write failed before a transaction opened");
            }
        }
        err
    }

    fn release(&self, expected_version: u64) {
        let _ = self.claimed.compare_exchange(
            expected_version.saturating_add(1),
            expected_version,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    fn conflict(&self, conflict: Conflict) -> Error {
        metrics::record(&self.layout.metrics_path, |m| m.cas_conflicts += 1);
        info!(
            expected = conflict.expected,
            found = conflict.found,
            "version conflict"
        );
        Error::VersionConflict {
            expected: conflict.expected,
            found: conflict.found,
        }
    }

    fn store_metrics(&self, metrics: &mut MetricsSnapshot) {
        if let Err(err) = store_metrics(&self.layout.metrics_path, metrics) {
            warn!(error = %err, "metrics write failed");
        }
    }
}
