//! Validation for destination-relative paths inside a transaction.

use std::path::{Component, Path};

/// Check that `path` stays inside whatever root it is joined onto.
///
/// Accepts only non-empty paths made of normal components; `.` is tolerated,
/// `..`, root and prefix components are not.
pub fn validate_dest_rel_path(path: &Path) -> Result<(), String> {
    let mut normal = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(format!("{} must not contain '..'", path.display()));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("{} must be relative", path.display()));
            }
        }
    }
    if normal == 0 {
        return Err(format!("'{}' does not name a file", path.display()));
    }
    Ok(())
}
