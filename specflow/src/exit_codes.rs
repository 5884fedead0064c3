//! Stable exit codes for specflow CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed due to invalid home/config/state or other errors.
pub const INVALID: i32 = 1;
/// `specflow recover` left failed or corrupt transactions behind.
pub const RECOVERY_INCOMPLETE: i32 = 2;
