//! Append-only commit storage.
//!
//! Every commit carries a complete [`Snapshot`] plus key-change metadata
//! computed against its first parent at creation time.

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::ChangeClassifier;
use crate::config::ClassifierConfig;
use crate::db::Database;
use crate::errors::VcsError;
use crate::models::{Commit, CommitCreated, KeyChange};
use crate::snapshot::Snapshot;

/// Parents beyond this count are rejected.
const MAX_PARENTS: usize = 2;

/// Creates and reads commits in one database.
pub struct CommitStore<'a> {
    db: &'a Database,
    classifier: &'a ClassifierConfig,
}

impl<'a> CommitStore<'a> {
    pub fn new(db: &'a Database, classifier: &'a ClassifierConfig) -> Self {
        Self { db, classifier }
    }

    /// Persist a new commit and return its id and key-change metadata.
    ///
    /// Parents must already exist. Identical snapshots are stored again as
    /// distinct commits.
    pub fn create(
        &self,
        repo_id: &str,
        parents: &[String],
        snapshot: Snapshot,
        author: &str,
        message: &str,
    ) -> Result<CommitCreated, VcsError> {
        if parents.len() > MAX_PARENTS {
            return Err(VcsError::InvalidArgument(format!(
                "a commit has at most {MAX_PARENTS} parents, got {}",
                parents.len()
            )));
        }
        self.db.get_repo(repo_id)?;
        for parent in parents {
            if !self.db.commit_exists(parent)? {
                return Err(VcsError::not_found("commit", parent.as_str()));
            }
        }

        let key_change = match parents.first() {
            Some(parent) => self.key_change_against(parent, &snapshot)?,
            None => KeyChange::default(),
        };

        let commit = Commit {
            id: Uuid::new_v4().to_string(),
            repo_id: repo_id.to_string(),
            author: author.to_string(),
            message: message.to_string(),
            parents: parents.to_vec(),
            snapshot,
            created_at: Utc::now(),
            key_change,
        };
        self.db.insert_commit(&commit)?;

        let details = commit.key_change.reason.clone();
        if let Err(e) = self.db.insert_audit_log(
            "commit_created",
            Some(repo_id),
            Some(&commit.id),
            Some(author),
            details.as_deref(),
        ) {
            warn!(commit_id = %commit.id, error = %e, "failed to insert audit log entry (continuing)");
        }

        info!(
            commit_id = %commit.id,
            repo_id,
            parents = commit.parents.len(),
            score = commit.key_change.score,
            auto_flag = commit.key_change.auto_flag,
            "commit created"
        );
        Ok(CommitCreated {
            commit_id: commit.id,
            key_change: commit.key_change,
        })
    }

    /// Classify `next` against the stored snapshot of `parent_id`, degrading
    /// to an empty key change when that snapshot cannot be read.
    fn key_change_against(&self, parent_id: &str, next: &Snapshot) -> Result<KeyChange, VcsError> {
        let Some(text) = self.db.get_snapshot_text(parent_id)? else {
            warn!(parent_id, "parent snapshot missing, key change score is 0");
            return Ok(KeyChange::default());
        };
        match Snapshot::from_json(&text) {
            Ok(base) => Ok(ChangeClassifier::classify(&base, next, self.classifier)),
            Err(e) => {
                warn!(parent_id, error = %e, "parent snapshot unparseable, key change score is 0");
                Ok(KeyChange::default())
            }
        }
    }

    /// Fetch a commit by id.
    pub fn get(&self, commit_id: &str) -> Result<Commit, VcsError> {
        Ok(self.db.get_commit(commit_id)?)
    }

    /// Set or clear the manual significance flag.
    pub fn set_manual_flag(&self, commit_id: &str, flag: bool) -> Result<(), VcsError> {
        self.db.set_manual_flag(commit_id, flag)?;
        info!(commit_id, flag, "manual flag updated");
        Ok(())
    }

    pub fn list(&self, repo_id: &str, limit: u32) -> Result<Vec<Commit>, VcsError> {
        Ok(self.db.list_commits(repo_id, limit)?)
    }

    pub fn list_flagged(&self, repo_id: &str, limit: u32) -> Result<Vec<Commit>, VcsError> {
        Ok(self.db.list_flagged_commits(repo_id, limit)?)
    }

    /// Follow first parents from `tip`, newest first, up to `limit` commits.
    pub fn history(&self, tip: &str, limit: usize) -> Result<Vec<Commit>, VcsError> {
        let mut log = Vec::new();
        let mut next = Some(tip.to_string());
        while let Some(id) = next {
            if log.len() >= limit {
                break;
            }
            let commit = self.db.get_commit(&id)?;
            next = commit.first_parent().map(str::to_string);
            log.push(commit);
        }
        debug!(tip, entries = log.len(), "walked first-parent history");
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Repo, Visibility};
    use serde_json::json;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db.insert_repo(&Repo {
            id: "r1".into(),
            title: "Lisbon".into(),
            owner_user_id: None,
            visibility: Visibility::Private,
            forked_from_repo_id: None,
            created_at: Utc::now(),
        })
        .unwrap();
        db
    }

    fn stops(n: usize) -> Vec<serde_json::Value> {
        (0..n).map(|i| json!({"id": format!("s{i}"), "name": format!("Stop {i}")})).collect()
    }

    fn trip(first: usize, second: usize) -> Snapshot {
        Snapshot::from(json!({
            "files": {},
            "plan": {"days": [
                {"id": "d1", "date": "2025-05-01", "stops": stops(first)},
                {"id": "d2", "date": "2025-05-02", "stops": stops(second)}
            ]}
        }))
    }

    #[test]
    fn test_create_and_get() {
        let db = setup_db();
        let cfg = ClassifierConfig::default();
        let store = CommitStore::new(&db, &cfg);
        let root = store.create("r1", &[], trip(1, 1), "ana", "init").unwrap();
        let child = store
            .create("r1", &[root.commit_id.clone()], trip(1, 1), "ana", "same again")
            .unwrap();

        assert_ne!(root.commit_id, child.commit_id);
        let loaded = store.get(&child.commit_id).unwrap();
        assert_eq!(loaded.parents, vec![root.commit_id]);
        assert_eq!(loaded.snapshot, trip(1, 1));
        assert_eq!(loaded.key_change, KeyChange::default());
    }

    #[test]
    fn test_key_change_against_first_parent() {
        let db = setup_db();
        let cfg = ClassifierConfig::default();
        let store = CommitStore::new(&db, &cfg);
        let root = store.create("r1", &[], trip(3, 2), "ana", "init").unwrap();
        let next = store
            .create("r1", &[root.commit_id], trip(5, 4), "ana", "more stops")
            .unwrap();
        assert!(next.key_change.auto_flag);
        assert!(next.key_change.score >= 4);
        assert!(next
            .key_change
            .reason
            .as_deref()
            .unwrap_or_default()
            .contains("Stops changed: +4 / -0"));
    }

    #[test]
    fn test_unparseable_parent_snapshot_scores_zero() {
        let db = setup_db();
        let cfg = ClassifierConfig::default();
        let store = CommitStore::new(&db, &cfg);
        let root = store.create("r1", &[], trip(1, 0), "ana", "init").unwrap();
        db.conn()
            .execute(
                "UPDATE commits SET snapshot = 'garbage' WHERE id = ?1",
                [&root.commit_id],
            )
            .unwrap();
        let next = store
            .create("r1", &[root.commit_id], trip(9, 9), "ana", "big edit")
            .unwrap();
        assert_eq!(next.key_change.score, 0);
        assert!(!next.key_change.auto_flag);
    }

    #[test]
    fn test_rejects_unknown_parent_and_too_many_parents() {
        let db = setup_db();
        let cfg = ClassifierConfig::default();
        let store = CommitStore::new(&db, &cfg);
        let err = store
            .create("r1", &["missing".into()], Snapshot::default(), "ana", "x")
            .unwrap_err();
        assert!(matches!(err, VcsError::NotFound { .. }));

        let root = store.create("r1", &[], Snapshot::default(), "ana", "x").unwrap();
        let three = vec![root.commit_id.clone(); 3];
        let err = store
            .create("r1", &three, Snapshot::default(), "ana", "x")
            .unwrap_err();
        assert!(matches!(err, VcsError::InvalidArgument(_)));

        assert!(matches!(store.get("nope"), Err(VcsError::NotFound { .. })));
    }

    #[test]
    fn test_history_follows_first_parent() {
        let db = setup_db();
        let cfg = ClassifierConfig::default();
        let store = CommitStore::new(&db, &cfg);
        let a = store.create("r1", &[], Snapshot::default(), "ana", "a").unwrap();
        let b = store
            .create("r1", &[a.commit_id.clone()], Snapshot::default(), "ana", "b")
            .unwrap();
        let side = store
            .create("r1", &[a.commit_id.clone()], Snapshot::default(), "ben", "side")
            .unwrap();
        let m = store
            .create("r1", &[b.commit_id.clone(), side.commit_id], Snapshot::default(), "ana", "m")
            .unwrap();

        let log: Vec<String> = store
            .history(&m.commit_id, 10)
            .unwrap()
            .into_iter()
            .map(|c| c.message)
            .collect();
        assert_eq!(log, vec!["m", "b", "a"]);
        assert_eq!(store.history(&m.commit_id, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_manual_flag() {
        let db = setup_db();
        let cfg = ClassifierConfig::default();
        let store = CommitStore::new(&db, &cfg);
        let a = store.create("r1", &[], Snapshot::default(), "ana", "a").unwrap();
        store.set_manual_flag(&a.commit_id, true).unwrap();
        assert!(store.get(&a.commit_id).unwrap().key_change.manual_flag);
        assert_eq!(store.list_flagged("r1", 10).unwrap().len(), 1);
        assert!(store.set_manual_flag("nope", true).is_err());
    }
}
