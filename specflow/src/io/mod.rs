//! Side-effecting helpers: the home layout, durable file writes, the
//! transaction manager and scanner, and the state/journal/metrics files.

pub mod config;
pub mod durable;
pub mod journal;
pub mod layout;
pub mod metrics;
pub mod scan;
pub mod state_store;
pub mod txn;
