//! Typed query helpers for every table in the TripVCS database.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, warn};

use super::Database;
use crate::ancestry::CommitGraph;
use crate::errors::{DatabaseError, VcsError};
use crate::models::{AuditEntry, Branch, Commit, KeyChange, Repo, Visibility};
use crate::snapshot::Snapshot;

const COMMIT_COLUMNS: &str = "id, repo_id, author, message, snapshot, created_at,
     key_score, key_auto_flag, key_manual_flag, key_reason";

const BRANCH_COLUMNS: &str = "id, repo_id, name, head_commit_id";

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- repos --------------------------------------------------------------

    /// Insert a new repo row.
    pub fn insert_repo(&self, repo: &Repo) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO repos (id, title, owner_user_id, visibility, forked_from_repo_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                repo.id,
                repo.title,
                repo.owner_user_id,
                repo.visibility.to_string(),
                repo.forked_from_repo_id,
                repo.created_at.to_rfc3339()
            ],
        )?;
        debug!(id = %repo.id, title = %repo.title, "inserted repo");
        Ok(())
    }

    /// Get a repo by ID (returns an error if not found).
    pub fn get_repo(&self, id: &str) -> Result<Repo, DatabaseError> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, title, owner_user_id, visibility, forked_from_repo_id, created_at
             FROM repos WHERE id = ?1",
            params![id],
            |row| {
                let visibility: String = row.get(3)?;
                let created_at: String = row.get(5)?;
                Ok(Repo {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    owner_user_id: row.get(2)?,
                    visibility: Visibility::from_str_val(&visibility),
                    forked_from_repo_id: row.get(4)?,
                    created_at: parse_datetime(&created_at),
                })
            },
        )
        .map_err(|e| not_found_or(e, "repo", id))
    }

    // -- commits ------------------------------------------------------------

    /// Insert a commit and its ordered parent edges atomically.
    pub fn insert_commit(&self, commit: &Commit) -> Result<(), DatabaseError> {
        let snapshot = serde_json::to_string(&commit.snapshot)?;
        self.transaction(|conn| {
            conn.execute(
                "INSERT INTO commits (id, repo_id, author, message, snapshot, created_at,
                 key_score, key_auto_flag, key_manual_flag, key_reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    commit.id,
                    commit.repo_id,
                    commit.author,
                    commit.message,
                    snapshot,
                    commit.created_at.to_rfc3339(),
                    commit.key_change.score,
                    commit.key_change.auto_flag,
                    commit.key_change.manual_flag,
                    commit.key_change.reason
                ],
            )?;
            for (position, parent_id) in commit.parents.iter().enumerate() {
                conn.execute(
                    "INSERT INTO commit_parents (commit_id, position, parent_id)
                     VALUES (?1, ?2, ?3)",
                    params![commit.id, position as i64, parent_id],
                )?;
            }
            Ok(())
        })?;
        debug!(id = %commit.id, parents = commit.parents.len(), "inserted commit");
        Ok(())
    }

    /// Get a commit by ID (returns an error if not found).
    pub fn get_commit(&self, id: &str) -> Result<Commit, DatabaseError> {
        let mut commit = {
            let conn = self.conn();
            conn.query_row(
                &format!("SELECT {COMMIT_COLUMNS} FROM commits WHERE id = ?1"),
                params![id],
                commit_from_row,
            )
            .map_err(|e| not_found_or(e, "commit", id))?
        };
        commit.parents = self.get_parents(id)?;
        Ok(commit)
    }

    /// Whether a commit with this ID exists.
    pub fn commit_exists(&self, id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM commits WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Ordered parent IDs of a commit. Unknown commits are `NotFound`.
    pub fn get_parents(&self, id: &str) -> Result<Vec<String>, DatabaseError> {
        if !self.commit_exists(id)? {
            return Err(DatabaseError::NotFound {
                entity: "commit".into(),
                id: id.to_string(),
            });
        }
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT parent_id FROM commit_parents WHERE commit_id = ?1 ORDER BY position",
        )?;
        let parents = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(parents)
    }

    /// Raw stored snapshot text of a commit, if the commit exists.
    pub fn get_snapshot_text(&self, id: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let text = conn
            .query_row(
                "SELECT snapshot FROM commits WHERE id = ?1",
                params![id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(text.flatten())
    }

    /// Set or clear the user-controlled significance flag.
    pub fn set_manual_flag(&self, id: &str, flag: bool) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE commits SET key_manual_flag = ?1 WHERE id = ?2",
            params![flag, id],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "commit".into(),
                id: id.to_string(),
            });
        }
        debug!(id, flag, "set manual flag");
        Ok(())
    }

    /// Most recent commits of a repo, newest first.
    pub fn list_commits(&self, repo_id: &str, limit: u32) -> Result<Vec<Commit>, DatabaseError> {
        self.query_commits(
            &format!(
                "SELECT {COMMIT_COLUMNS} FROM commits WHERE repo_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
            ),
            repo_id,
            limit,
        )
    }

    /// Commits flagged automatically or manually, newest first.
    pub fn list_flagged_commits(
        &self,
        repo_id: &str,
        limit: u32,
    ) -> Result<Vec<Commit>, DatabaseError> {
        self.query_commits(
            &format!(
                "SELECT {COMMIT_COLUMNS} FROM commits
                 WHERE repo_id = ?1 AND (key_auto_flag = 1 OR key_manual_flag = 1)
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
            ),
            repo_id,
            limit,
        )
    }

    fn query_commits(
        &self,
        sql: &str,
        repo_id: &str,
        limit: u32,
    ) -> Result<Vec<Commit>, DatabaseError> {
        let mut commits = {
            let conn = self.conn();
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(params![repo_id, limit], commit_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        for commit in &mut commits {
            commit.parents = self.get_parents(&commit.id)?;
        }
        Ok(commits)
    }

    // -- branches -----------------------------------------------------------

    /// Insert a new branch row.
    pub fn insert_branch(&self, branch: &Branch) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO branches (id, repo_id, name, head_commit_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                branch.id,
                branch.repo_id,
                branch.name,
                branch.head_commit_id,
                now
            ],
        )?;
        debug!(id = %branch.id, name = %branch.name, head = %branch.head_commit_id, "inserted branch");
        Ok(())
    }

    /// Get a branch by ID (returns an error if not found).
    pub fn get_branch(&self, id: &str) -> Result<Branch, DatabaseError> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {BRANCH_COLUMNS} FROM branches WHERE id = ?1"),
            params![id],
            branch_from_row,
        )
        .map_err(|e| not_found_or(e, "branch", id))
    }

    /// Look a branch up by its per-repo name.
    pub fn get_branch_by_name(
        &self,
        repo_id: &str,
        name: &str,
    ) -> Result<Option<Branch>, DatabaseError> {
        let conn = self.conn();
        let branch = conn
            .query_row(
                &format!("SELECT {BRANCH_COLUMNS} FROM branches WHERE repo_id = ?1 AND name = ?2"),
                params![repo_id, name],
                branch_from_row,
            )
            .optional()?;
        Ok(branch)
    }

    /// All branches of a repo, ordered by name.
    pub fn list_branches(&self, repo_id: &str) -> Result<Vec<Branch>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {BRANCH_COLUMNS} FROM branches WHERE repo_id = ?1 ORDER BY name"
        ))?;
        let branches = stmt
            .query_map(params![repo_id], branch_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(branches)
    }

    /// Atomically move a branch head from `expected` to `new_head`.
    ///
    /// Returns `false` without touching the row when the stored head is not
    /// `expected` (or the branch does not exist).
    pub fn compare_and_swap_head(
        &self,
        branch_id: &str,
        expected: &str,
        new_head: &str,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE branches SET head_commit_id = ?1, updated_at = ?2
             WHERE id = ?3 AND head_commit_id = ?4",
            params![new_head, now, branch_id, expected],
        )?;
        debug!(branch_id, expected, new_head, swapped = changed == 1, "branch head CAS");
        Ok(changed == 1)
    }

    // -- kv_state -----------------------------------------------------------

    /// Get a value from the key-value state table.
    pub fn get_state(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM kv_state WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Set a value in the key-value state table (upsert).
    pub fn set_state(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO kv_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        debug!(key, value, "set kv_state");
        Ok(())
    }

    // -- audit_log ----------------------------------------------------------

    /// Insert an audit log entry.
    pub fn insert_audit_log(
        &self,
        action: &str,
        repo_id: Option<&str>,
        commit_id: Option<&str>,
        author: Option<&str>,
        details: Option<&str>,
    ) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_log (action, repo_id, commit_id, author, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![action, repo_id, commit_id, author, details, now],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, action, "inserted audit_log entry");
        Ok(id)
    }

    /// Return the most recent N audit log entries, newest first.
    pub fn list_audit_log(&self, limit: u32) -> Result<Vec<AuditEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, action, repo_id, commit_id, author, details, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                let created_at: String = row.get(6)?;
                Ok(AuditEntry {
                    id: row.get(0)?,
                    action: row.get(1)?,
                    repo_id: row.get(2)?,
                    commit_id: row.get(3)?,
                    author: row.get(4)?,
                    details: row.get(5)?,
                    created_at: parse_datetime(&created_at),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

impl CommitGraph for Database {
    fn parents_of(&self, commit_id: &str) -> Result<Vec<String>, VcsError> {
        Ok(self.get_parents(commit_id)?)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Parents are loaded separately and left empty here.
fn commit_from_row(row: &Row<'_>) -> rusqlite::Result<Commit> {
    let id: String = row.get(0)?;
    let snapshot_text: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let snapshot = Snapshot::from_json(&snapshot_text).unwrap_or_else(|e| {
        warn!(commit_id = %id, error = %e, "stored snapshot is not valid JSON, using empty snapshot");
        Snapshot::default()
    });
    Ok(Commit {
        id,
        repo_id: row.get(1)?,
        author: row.get(2)?,
        message: row.get(3)?,
        parents: Vec::new(),
        snapshot,
        created_at: parse_datetime(&created_at),
        key_change: KeyChange {
            score: row.get(6)?,
            auto_flag: row.get(7)?,
            manual_flag: row.get(8)?,
            reason: row.get(9)?,
        },
    })
}

fn branch_from_row(row: &Row<'_>) -> rusqlite::Result<Branch> {
    Ok(Branch {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        name: row.get(2)?,
        head_commit_id: row.get(3)?,
    })
}

fn not_found_or(err: rusqlite::Error, entity: &str, id: &str) -> DatabaseError {
    match err {
        rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        },
        other => other.into(),
    }
}

/// Parse an RFC 3339 timestamp, falling back to now.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn repo(db: &Database) -> Repo {
        let repo = Repo {
            id: "r1".into(),
            title: "Paris".into(),
            owner_user_id: Some("u1".into()),
            visibility: Visibility::Unlisted,
            forked_from_repo_id: None,
            created_at: Utc::now(),
        };
        db.insert_repo(&repo).unwrap();
        repo
    }

    fn commit(id: &str, parents: &[&str]) -> Commit {
        Commit {
            id: id.into(),
            repo_id: "r1".into(),
            author: "alice".into(),
            message: format!("commit {id}"),
            parents: parents.iter().map(|p| p.to_string()).collect(),
            snapshot: Snapshot::default(),
            created_at: Utc::now(),
            key_change: KeyChange::default(),
        }
    }

    #[test]
    fn test_repo_round_trip() {
        let db = setup_db();
        let inserted = repo(&db);
        let loaded = db.get_repo("r1").unwrap();
        assert_eq!(loaded.title, inserted.title);
        assert_eq!(loaded.visibility, Visibility::Unlisted);
        assert!(matches!(db.get_repo("nope"), Err(DatabaseError::NotFound { .. })));
    }

    #[test]
    fn test_commit_parents_are_ordered() {
        let db = setup_db();
        repo(&db);
        db.insert_commit(&commit("a", &[])).unwrap();
        db.insert_commit(&commit("b", &["a"])).unwrap();
        db.insert_commit(&commit("c", &["a"])).unwrap();
        db.insert_commit(&commit("m", &["c", "b"])).unwrap();

        assert_eq!(db.get_parents("m").unwrap(), vec!["c", "b"]);
        let loaded = db.get_commit("m").unwrap();
        assert!(loaded.is_merge());
        assert_eq!(loaded.message, "commit m");
        assert!(matches!(db.get_commit("zz"), Err(DatabaseError::NotFound { .. })));
    }

    #[test]
    fn test_manual_flag_and_flagged_listing() {
        let db = setup_db();
        repo(&db);
        db.insert_commit(&commit("a", &[])).unwrap();
        db.insert_commit(&commit("b", &["a"])).unwrap();
        assert!(db.list_flagged_commits("r1", 10).unwrap().is_empty());

        db.set_manual_flag("b", true).unwrap();
        let flagged = db.list_flagged_commits("r1", 10).unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].id, "b");
        assert!(flagged[0].key_change.manual_flag);
        assert_eq!(db.list_commits("r1", 10).unwrap().len(), 2);
    }

    #[test]
    fn test_compare_and_swap_head() {
        let db = setup_db();
        repo(&db);
        db.insert_commit(&commit("a", &[])).unwrap();
        db.insert_commit(&commit("b", &["a"])).unwrap();
        let branch = Branch {
            id: "br".into(),
            repo_id: "r1".into(),
            name: "main".into(),
            head_commit_id: "a".into(),
        };
        db.insert_branch(&branch).unwrap();

        assert!(!db.compare_and_swap_head("br", "b", "a").unwrap());
        assert!(db.compare_and_swap_head("br", "a", "b").unwrap());
        assert_eq!(db.get_branch("br").unwrap().head_commit_id, "b");
        assert_eq!(
            db.get_branch_by_name("r1", "main").unwrap().map(|b| b.id),
            Some("br".to_string())
        );
    }

    #[test]
    fn test_kv_state_upsert() {
        let db = setup_db();
        assert_eq!(db.get_state("k").unwrap(), None);
        db.set_state("k", "v1").unwrap();
        db.set_state("k", "v2").unwrap();
        assert_eq!(db.get_state("k").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn test_audit_log() {
        let db = setup_db();
        db.insert_audit_log("commit_created", Some("r1"), Some("a"), Some("alice"), None)
            .unwrap();
        db.insert_audit_log("branch_advanced", Some("r1"), Some("b"), None, Some("main"))
            .unwrap();
        let entries = db.list_audit_log(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "branch_advanced");
    }

    #[test]
    fn test_corrupt_snapshot_reads_as_empty() {
        let db = setup_db();
        repo(&db);
        db.insert_commit(&commit("a", &[])).unwrap();
        db.conn()
            .execute("UPDATE commits SET snapshot = '{not json' WHERE id = 'a'", [])
            .unwrap();
        let loaded = db.get_commit("a").unwrap();
        assert_eq!(loaded.snapshot, Snapshot::default());
        assert_eq!(db.get_snapshot_text("a").unwrap().as_deref(), Some("{not json"));
    }
}
