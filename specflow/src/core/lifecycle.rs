//! Transaction state machine and on-disk classification rules.
//!
//! `Open → Staged → IntentMarked → Committed → CleanedUp`. Transitions only
//! move forward; once intent is marked the only way out is to finish.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnStatus {
    Open,
    Staged,
    IntentMarked,
    Committed,
    CleanedUp,
}

impl TxnStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TxnStatus::Open => "open",
            TxnStatus::Staged => "staged",
            TxnStatus::IntentMarked => "intent_marked",
            TxnStatus::Committed => "committed",
            TxnStatus::CleanedUp => "cleaned_up",
        }
    }

    /// True once the transaction may no longer be discarded.
    pub fn past_point_of_no_return(self) -> bool {
        matches!(
            self,
            TxnStatus::IntentMarked | TxnStatus::Committed | TxnStatus::CleanedUp
        )
    }
}

/// Operations that move a transaction through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOp {
    Stage,
    MarkIntent,
    Commit,
    Cleanup,
    Abandon,
}

impl TxnOp {
    fn as_str(self) -> &'static str {
        match self {
            TxnOp::Stage => "stage",
            TxnOp::MarkIntent => "mark intent",
            TxnOp::Commit => "commit",
            TxnOp::Cleanup => "cleanup",
            TxnOp::Abandon => "abandon",
        }
    }
}

/// Return the status after `op`, or a message describing why `op` is not
/// allowed from `status`.
pub fn next_status(status: TxnStatus, op: TxnOp) -> Result<TxnStatus, String> {
    use TxnStatus::{CleanedUp, Committed, IntentMarked, Open, Staged};

    let next = match (op, status) {
        (TxnOp::Stage, Open | Staged) => Staged,
        (TxnOp::MarkIntent, Staged | IntentMarked) => IntentMarked,
        (TxnOp::Commit, IntentMarked | Committed) => Committed,
        (TxnOp::Cleanup, Committed) => CleanedUp,
        (TxnOp::Abandon, Open | Staged) => CleanedUp,
        (TxnOp::MarkIntent, Open) => {
            return Err("cannot mark intent: nothing has been staged".to_string());
        }
        (TxnOp::Commit, Open | Staged) => {
            return Err(format!(
                "cannot commit a {} transaction: intent has not been marked",
                status.as_str()
            ));
        }
        (TxnOp::Abandon, IntentMarked | Committed) => {
            return Err(format!(
                "cannot abandon a {} transaction: intent is marked, it must be finished",
                status.as_str()
            ));
        }
        _ => {
            return Err(format!(
                "cannot {} a {} transaction",
                op.as_str(),
                status.as_str()
            ));
        }
    };
    Ok(next)
}

/// What a marker file looked like when probed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    Missing,
    Readable,
    Unreadable(String),
}

/// Observations about one transaction directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub manifest: Marker,
    pub intent: Marker,
    pub commit: bool,
    /// Manifest and intent were both readable but name different ids.
    pub id_mismatch: bool,
}

/// Classification of a transaction directory found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum TxnClass {
    /// Never reached the point of no return.
    Empty,
    /// Intent marked, commit marker missing: a crash interrupted `commit`.
    IntentOnly,
    /// Fully committed; only the directory remains to be swept.
    Committed,
    /// Markers cannot be trusted; left for manual inspection.
    Corrupt { reason: String },
}

pub fn classify(probe: &Probe) -> TxnClass {
    if probe.commit {
        return TxnClass::Committed;
    }
    if let Marker::Unreadable(reason) = &probe.manifest {
        return TxnClass::Corrupt {
            reason: format!("manifest unreadable: {reason}"),
        };
    }
    match &probe.intent {
        Marker::Missing => TxnClass::Empty,
        Marker::Unreadable(reason) => TxnClass::Corrupt {
            reason: format!("intent marker unreadable: {reason}"),
        },
        Marker::Readable => {
            if probe.manifest == Marker::Missing {
                TxnClass::Corrupt {
                    reason: "intent marked but manifest is missing".to_string(),
                }
            } else if probe.id_mismatch {
                TxnClass::Corrupt {
                    reason: "manifest and intent marker disagree on id".to_string(),
                }
            } else {
                TxnClass::IntentOnly
            }
        }
    }
}
