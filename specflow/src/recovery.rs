//! Startup recovery: finish every interrupted transaction, never undo one.
//!
//! Runs once before any new transaction may begin. Intent-only transactions
//! are re-committed with a no-op journal callback (the journal append has its
//! own durability and is never replayed from here), then cleaned up.
//! Committed leftovers are swept. Corrupt and empty directories are reported
//! and left alone.

use std::path::PathBuf;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::io::scan::{Inventory, Scanner};
use crate::io::txn::TxnManager;

/// A transaction recovery could not finish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryFailure {
    pub id: String,
    pub error: String,
}

/// Summary of one `recover_all` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryResult {
    pub recovered_count: usize,
    pub failed_count: usize,
    pub swept_count: usize,
    pub failures: Vec<RecoveryFailure>,
    /// Transactions whose markers cannot be trusted.
    pub corrupt: Vec<String>,
    /// Transactions that never reached intent; an operator may abandon them.
    pub abandoned: Vec<String>,
    /// Cancellation stopped the pass before every transaction was visited.
    pub interrupted: bool,
}

impl RecoveryResult {
    /// True when nothing needs an operator's attention.
    pub fn is_clean(&self) -> bool {
        self.failed_count == 0 && self.corrupt.is_empty()
    }
}

pub struct RecoveryDriver {
    manager: TxnManager,
    scanner: Scanner,
    destination_root: PathBuf,
}

impl RecoveryDriver {
    pub fn new(manager: TxnManager, destination_root: impl Into<PathBuf>) -> Self {
        let scanner = Scanner::new(manager.txn_dir());
        Self {
            manager,
            scanner,
            destination_root: destination_root.into(),
        }
    }

    /// Drive every interrupted transaction to completion.
    ///
    /// Only a failing scan is an error; per-transaction failures are counted
    /// and reported so one bad directory does not block startup. Cancellation
    /// is checked between transactions, never inside a commit.
    pub fn recover_all(&self, cancel: &CancellationToken) -> Result<RecoveryResult> {
        let inventory = self.scanner.scan()?;
        let mut result = RecoveryResult {
            corrupt: inventory.corrupt().map(|entry| entry.id.clone()).collect(),
            abandoned: inventory.empty().map(|entry| entry.id.clone()).collect(),
            ..RecoveryResult::default()
        };
        for entry in inventory.corrupt() {
            warn!(txn = %entry.id, class = ?entry.class, "corrupt transaction left for inspection");
        }

        self.recover_intent_only(&inventory, cancel, &mut result);
        if !result.interrupted {
            self.sweep_committed(&inventory, cancel, &mut result);
        }

        info!(
            recovered = result.recovered_count,
            failed = result.failed_count,
            swept = result.swept_count,
            corrupt = result.corrupt.len(),
            abandoned = result.abandoned.len(),
            interrupted = result.interrupted,
            "recovery finished"
        );
        Ok(result)
    }

    fn recover_intent_only(
        &self,
        inventory: &Inventory,
        cancel: &CancellationToken,
        result: &mut RecoveryResult,
    ) {
        for entry in inventory.intent_only() {
            if cancel.is_cancelled() {
                result.interrupted = true;
                return;
            }
            debug!(txn = %entry.id, "recovering intent-only transaction");
            let outcome = self.manager.reopen(&entry.id).and_then(|mut tx| {
                self.manager
                    .commit(&mut tx, &self.destination_root, || Ok(()))?;
                Ok(tx)
            });
            match outcome {
                Ok(mut tx) => {
                    result.recovered_count += 1;
                    if let Err(err) = self.manager.cleanup(&mut tx) {
                        warn!(txn = %entry.id, error = %err, "cleanup after recovery failed");
                    }
                }
                Err(err) => {
                    warn!(txn = %entry.id, error = %err, "recovery commit failed");
                    result.failed_count += 1;
                    result.failures.push(RecoveryFailure {
                        id: entry.id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }
    }

    fn sweep_committed(
        &self,
        inventory: &Inventory,
        cancel: &CancellationToken,
        result: &mut RecoveryResult,
    ) {
        for entry in inventory.committed() {
            if cancel.is_cancelled() {
                result.interrupted = true;
                return;
            }
            match self.manager.sweep(&entry.id) {
                Ok(()) => result.swept_count += 1,
                Err(err) => {
                    warn!(txn = %entry.id, error = %err, "sweep failed");
                    result.failed_count += 1;
                    result.failures.push(RecoveryFailure {
                        id: entry.id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }
    }
}
