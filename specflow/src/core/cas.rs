//! Optimistic version checks for state writes.

/// A failed version comparison: the caller expected `expected`, but
/// `found` is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict {
    pub expected: u64,
    pub found: u64,
}

/// Compare the caller's view against the persisted version.
///
/// `proposed` is the version carried by the candidate state, which must still
/// equal `expected` (the caller has not bumped it). The on-disk version is
/// checked second so a stale caller is reported against what is persisted.
pub fn check_versions(expected: u64, proposed: u64, on_disk: u64) -> Result<(), Conflict> {
    if proposed != expected {
        return Err(Conflict {
            expected,
            found: proposed,
        });
    }
    if on_disk != expected {
        return Err(Conflict {
            expected,
            found: on_disk,
        });
    }
    Ok(())
}
