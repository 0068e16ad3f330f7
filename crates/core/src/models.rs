//! Domain model types used throughout TripVCS.
//!
//! These types bridge the engine, database layer, and any request layer
//! that serializes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;

// ---------------------------------------------------------------------------
// Key-change metadata
// ---------------------------------------------------------------------------

/// Heuristic "significant change" metadata attached to every commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyChange {
    pub score: i64,
    pub auto_flag: bool,
    /// The only commit field that may change after creation.
    pub manual_flag: bool,
    pub reason: Option<String>,
}

impl KeyChange {
    /// Whether the commit is flagged by either the classifier or a user.
    pub fn is_flagged(&self) -> bool {
        self.auto_flag || self.manual_flag
    }
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// An immutable commit holding a full itinerary snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub id: String,
    pub repo_id: String,
    pub author: String,
    pub message: String,
    /// Ordered parent ids: empty for a root, one for a normal commit, two
    /// for a merge (`[ours, theirs]`).
    pub parents: Vec<String>,
    pub snapshot: Snapshot,
    pub created_at: DateTime<Utc>,
    pub key_change: KeyChange,
}

impl Commit {
    pub fn is_merge(&self) -> bool {
        self.parents.len() == 2
    }

    pub fn first_parent(&self) -> Option<&str> {
        self.parents.first().map(String::as_str)
    }
}

/// Result of creating a commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitCreated {
    pub commit_id: String,
    pub key_change: KeyChange,
}

// ---------------------------------------------------------------------------
// Branch
// ---------------------------------------------------------------------------

/// A named, mutable pointer to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: String,
    pub repo_id: String,
    pub name: String,
    pub head_commit_id: String,
}

// ---------------------------------------------------------------------------
// Repo
// ---------------------------------------------------------------------------

/// Who may see a repo. Not consulted by any merge logic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Private,
    Unlisted,
    Public,
}

impl Visibility {
    /// Parse a visibility string, falling back to private.
    pub fn from_str_val(s: &str) -> Self {
        match s {
            "public" => Self::Public,
            "unlisted" => Self::Unlisted,
            _ => Self::Private,
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Private => write!(f, "private"),
            Self::Unlisted => write!(f, "unlisted"),
            Self::Public => write!(f, "public"),
        }
    }
}

/// A trip repository: lineage metadata only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repo {
    pub id: String,
    pub title: String,
    pub owner_user_id: Option<String>,
    pub visibility: Visibility,
    pub forked_from_repo_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// A row from the `audit_log` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub action: String,
    pub repo_id: Option<String>,
    pub commit_id: Option<String>,
    pub author: Option<String>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_change_wire_names() {
        let kc = KeyChange {
            score: 6,
            auto_flag: true,
            manual_flag: false,
            reason: Some("Stops changed: +4 / -0".into()),
        };
        let json = serde_json::to_value(&kc).unwrap();
        assert_eq!(json["autoFlag"], true);
        assert_eq!(json["manualFlag"], false);
        assert!(kc.is_flagged());
    }

    #[test]
    fn test_visibility_round_trip() {
        for v in [Visibility::Private, Visibility::Unlisted, Visibility::Public] {
            assert_eq!(Visibility::from_str_val(&v.to_string()), v);
        }
        assert_eq!(Visibility::from_str_val("bogus"), Visibility::Private);
    }
}
