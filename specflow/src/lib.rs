//! Crash-safe state and journal persistence for an agent spec workflow.
//!
//! Every change to the workflow's state file travels through a small
//! file-system transaction: content is staged, an intent marker makes the
//! change durable, and only then are files published. A crash at any point
//! is repaired at startup by driving intent-marked transactions forward.
//!
//! - **[`core`]**: Pure logic (status transitions, classification, version
//!   checks, path validation). No I/O.
//! - **[`io`]**: Side-effecting storage (durable writes, transactions,
//!   scanning, journal, state, metrics, config).
//!
//! [`coordinator`] combines the two into the single CAS-guarded write path,
//! [`recovery`] finishes interrupted transactions, [`engine`] wires both
//! together for one home directory, and [`workflow`] drives the agent loops
//! that write through it.

pub mod coordinator;
pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod recovery;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;

pub use error::{Error, Result};
