//! Error types for the confstore crate.
//!
//! This module defines a unified error enumeration used across the object
//! store, revision handling, change application, the commit pipeline, and
//! the watch machinery. It integrates with `thiserror` to provide rich
//! `Display` implementations.
//!
//! Notes:
//! - Recoverable conditions (`RevisionNotFound`, `ChangeConflict`,
//!   `RedundantChange`, `Timeout`, `ShuttingDown`) carry enough context for
//!   the caller to retry or report precisely.
//! - `Storage` covers I/O failures and broken on-disk invariants; the engine
//!   reports these unchanged and never attempts local recovery.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the repository engine.
pub enum ConfError {
    /// Revision normalization failed: the requested revision does not exist
    /// in `[1, head]` after resolving relative revisions.
    #[error("revision {revision} cannot be resolved against head revision {head}")]
    RevisionNotFound { revision: i64, head: i64 },

    /// A single-entry query found nothing at the given path (or the JSON
    /// pointer of the query had no target).
    #[error("entry not found at revision {revision}: `{path}`")]
    EntryNotFound { revision: i64, path: String },

    /// Open was attempted on a directory that holds no repository.
    #[error("repository not found: `{0}`")]
    RepositoryNotFound(String),

    /// A change could not be applied: stale base revision, rename target
    /// clash, removal of a missing entry, or a patch that failed to apply.
    #[error("change conflict: {0}")]
    ChangeConflict(String),

    /// The commit would not alter the repository and empty commits were not
    /// allowed.
    #[error("changes produce no effective edit")]
    RedundantChange,

    /// The operation was issued after close began or while draining.
    #[error("repository is shutting down")]
    ShuttingDown,

    /// The caller's deadline elapsed before the operation could start.
    #[error("deadline elapsed before the operation could start")]
    Timeout,

    /// I/O failure or a violated storage invariant (unexpected ref-update
    /// state, unknown format version, missing index record).
    #[error("storage failure: {0}")]
    Storage(String),
}

impl ConfError {
    /// Build a `Storage` error from anything displayable.
    pub fn storage(msg: impl std::fmt::Display) -> Self {
        ConfError::Storage(msg.to_string())
    }

    /// Build a `ChangeConflict` error from anything displayable.
    pub fn conflict(msg: impl std::fmt::Display) -> Self {
        ConfError::ChangeConflict(msg.to_string())
    }
}

impl From<std::io::Error> for ConfError {
    fn from(err: std::io::Error) -> Self {
        ConfError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Display output should carry the offending revision and head.
    #[test]
    fn revision_not_found_display() {
        let err = ConfError::RevisionNotFound {
            revision: -9,
            head: 3,
        };
        assert_eq!(
            err.to_string(),
            "revision -9 cannot be resolved against head revision 3"
        );
    }

    /// I/O errors should convert into the storage kind.
    #[test]
    fn io_error_converts_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ConfError = io.into();
        assert!(matches!(err, ConfError::Storage(_)));
    }
}
