//! Error kinds for the transactional write layer.
//!
//! The core returns [`Error`] so callers can branch on the kind (a
//! [`Error::VersionConflict`] means "reload and retry"). Orchestration layers
//! wrap it in `anyhow` and recover the kind with `downcast_ref`.

use std::io;
use std::path::{Path, PathBuf};

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller's expected version no longer matches the persisted one.
    #[error("state changed concurrently (expected version {expected}, found {found}); reload and retry")]
    VersionConflict { expected: u64, found: u64 },

    /// Directory/file creation, read, write, rename or flush failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An operation was invoked in a state that does not allow it.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Transaction markers or staged bytes cannot be trusted.
    #[error("corrupt transaction {id}: {reason}")]
    CorruptTransaction { id: String, reason: String },

    /// A journal line that is not the trailing line failed to parse.
    #[error("corrupt journal {path} at line {line}: {reason}")]
    CorruptJournal {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A JSON file could not be parsed.
    #[error("malformed {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialize {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Cancellation was observed before the point of no return.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn decode(path: impl AsRef<Path>, source: serde_json::Error) -> Self {
        Self::Decode {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn corrupt(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptTransaction {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    /// True when the underlying I/O error is `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_conflict_message_asks_for_retry() {
        let err = Error::VersionConflict {
            expected: 1,
            found: 2,
        };
        assert!(err.is_version_conflict());
        assert!(err.to_string().contains("retry"));
    }

    #[test]
    fn not_found_is_detected_through_io_variant() {
        let err = Error::io("x", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());
        assert!(!Error::Cancelled.is_not_found());
    }
}
