//! Error types for the TripVCS core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Version-control errors
// ---------------------------------------------------------------------------

/// Errors surfaced by commit, branch, ancestry and merge operations.
///
/// Merge conflicts are not errors: they are the expected outcome of
/// divergent edits and are reported through
/// [`MergeOutcome::Conflicted`](crate::engine::MergeOutcome::Conflicted).
#[derive(Debug, Error)]
pub enum VcsError {
    /// An unknown repo, branch or commit was referenced.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Compare-and-swap on a branch head failed. The caller should refetch
    /// the head and retry.
    #[error("non-fast-forward update of branch {branch_id}: head is now {current}")]
    NonFastForward { branch_id: String, current: String },

    /// The two commits share no history, so no three-way merge is possible.
    #[error("no common ancestor between {a} and {b}")]
    NoCommonAncestor { a: String, b: String },

    /// A branch with this name already exists in the repo.
    #[error("branch '{name}' already exists in repo {repo_id}")]
    BranchExists { repo_id: String, name: String },

    /// A caller-supplied argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Persistence failure.
    #[error("vcs database error: {0}")]
    Database(DatabaseError),
}

impl VcsError {
    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.into(),
        }
    }
}

impl From<DatabaseError> for VcsError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Database(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A stored JSON column could not be encoded or decoded.
    #[error("database serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = VcsError::NonFastForward {
            branch_id: "b1".into(),
            current: "c9".into(),
        };
        assert_eq!(
            err.to_string(),
            "non-fast-forward update of branch b1: head is now c9"
        );

        let err = VcsError::not_found("commit", "abc");
        assert_eq!(err.to_string(), "commit not found: abc");

        let err = ConfigError::InvalidValue {
            field: "merge.whole_plan_threshold".into(),
            detail: "must be within 0..=1".into(),
        };
        assert!(err.to_string().contains("whole_plan_threshold"));
    }

    #[test]
    fn test_database_not_found_maps_to_vcs_not_found() {
        let db_err = DatabaseError::NotFound {
            entity: "branch".into(),
            id: "x".into(),
        };
        let vcs: VcsError = db_err.into();
        assert!(matches!(vcs, VcsError::NotFound { ref entity, .. } if entity == "branch"));

        let core: CoreError = vcs.into();
        assert!(matches!(core, CoreError::Vcs(_)));
    }
}
