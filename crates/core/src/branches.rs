//! Repos and their named branch pointers.
//!
//! A branch head only ever moves through [`BranchRegistry::advance_head`],
//! a compare-and-swap against the head the caller last saw. There is no
//! other locking: a writer whose view is stale gets
//! [`VcsError::NonFastForward`] and must refetch.

use chrono::Utc;
use rusqlite::ErrorCode;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::errors::{DatabaseError, VcsError};
use crate::models::{Branch, Repo, Visibility};

/// Branch and repo operations over one database.
pub struct BranchRegistry<'a> {
    db: &'a Database,
}

impl<'a> BranchRegistry<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    // -----------------------------------------------------------------------
    // Repos
    // -----------------------------------------------------------------------

    pub fn create_repo(
        &self,
        title: &str,
        owner_user_id: Option<&str>,
        visibility: Visibility,
    ) -> Result<Repo, VcsError> {
        let repo = Repo {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            owner_user_id: owner_user_id.map(str::to_string),
            visibility,
            forked_from_repo_id: None,
            created_at: Utc::now(),
        };
        self.db.insert_repo(&repo)?;
        if let Err(e) =
            self.db
                .insert_audit_log("repo_created", Some(&repo.id), None, owner_user_id, Some(title))
        {
            warn!(repo_id = %repo.id, error = %e, "failed to insert audit log entry (continuing)");
        }
        info!(repo_id = %repo.id, title, %visibility, "repo created");
        Ok(repo)
    }

    pub fn get_repo(&self, repo_id: &str) -> Result<Repo, VcsError> {
        Ok(self.db.get_repo(repo_id)?)
    }

    /// Create a new repo whose branches point at the same heads as the
    /// source repo's branches. Commits are shared, not copied.
    pub fn fork_repo(
        &self,
        source_repo_id: &str,
        title: &str,
        owner_user_id: Option<&str>,
    ) -> Result<Repo, VcsError> {
        let source = self.db.get_repo(source_repo_id)?;
        let repo = Repo {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            owner_user_id: owner_user_id.map(str::to_string),
            visibility: source.visibility,
            forked_from_repo_id: Some(source.id.clone()),
            created_at: Utc::now(),
        };
        self.db.insert_repo(&repo)?;

        let branches = self.db.list_branches(&source.id)?;
        for branch in &branches {
            self.db.insert_branch(&Branch {
                id: Uuid::new_v4().to_string(),
                repo_id: repo.id.clone(),
                name: branch.name.clone(),
                head_commit_id: branch.head_commit_id.clone(),
            })?;
        }
        if let Err(e) = self.db.insert_audit_log(
            "repo_forked",
            Some(&repo.id),
            None,
            owner_user_id,
            Some(&format!("forked from {}", source.id)),
        ) {
            warn!(repo_id = %repo.id, error = %e, "failed to insert audit log entry (continuing)");
        }
        info!(
            repo_id = %repo.id,
            source_repo_id,
            branches = branches.len(),
            "repo forked"
        );
        Ok(repo)
    }

    // -----------------------------------------------------------------------
    // Branches
    // -----------------------------------------------------------------------

    /// Create a branch named `name` pointing at `from_commit_id`.
    pub fn create(
        &self,
        repo_id: &str,
        name: &str,
        from_commit_id: &str,
    ) -> Result<Branch, VcsError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VcsError::InvalidArgument("branch name is empty".into()));
        }
        self.db.get_repo(repo_id)?;
        if !self.db.commit_exists(from_commit_id)? {
            return Err(VcsError::not_found("commit", from_commit_id));
        }
        if self.db.get_branch_by_name(repo_id, name)?.is_some() {
            return Err(branch_exists(repo_id, name));
        }

        let branch = Branch {
            id: Uuid::new_v4().to_string(),
            repo_id: repo_id.to_string(),
            name: name.to_string(),
            head_commit_id: from_commit_id.to_string(),
        };
        match self.db.insert_branch(&branch) {
            Ok(()) => {}
            Err(DatabaseError::SqliteError(e))
                if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) =>
            {
                // Lost a race with a concurrent create of the same name.
                return Err(branch_exists(repo_id, name));
            }
            Err(e) => return Err(e.into()),
        }
        info!(branch_id = %branch.id, repo_id, name, head = from_commit_id, "branch created");
        Ok(branch)
    }

    pub fn get(&self, branch_id: &str) -> Result<Branch, VcsError> {
        Ok(self.db.get_branch(branch_id)?)
    }

    pub fn get_by_name(&self, repo_id: &str, name: &str) -> Result<Option<Branch>, VcsError> {
        Ok(self.db.get_branch_by_name(repo_id, name)?)
    }

    /// Like [`get_by_name`](Self::get_by_name) but a missing branch is `NotFound`.
    pub fn require_by_name(&self, repo_id: &str, name: &str) -> Result<Branch, VcsError> {
        self.get_by_name(repo_id, name)?
            .ok_or_else(|| VcsError::not_found("branch", name))
    }

    pub fn list(&self, repo_id: &str) -> Result<Vec<Branch>, VcsError> {
        Ok(self.db.list_branches(repo_id)?)
    }

    /// Move `branch_id` from `expected_head` to `new_head`.
    ///
    /// Fails with `NonFastForward` carrying the stored head when it is not
    /// `expected_head`; the branch is left untouched in that case.
    pub fn advance_head(
        &self,
        branch_id: &str,
        expected_head: &str,
        new_head: &str,
    ) -> Result<(), VcsError> {
        let branch = self.db.get_branch(branch_id)?;
        if !self.db.commit_exists(new_head)? {
            return Err(VcsError::not_found("commit", new_head));
        }

        if !self.db.compare_and_swap_head(branch_id, expected_head, new_head)? {
            let current = self.db.get_branch(branch_id)?.head_commit_id;
            warn!(
                branch_id,
                expected_head,
                %current,
                "rejected non-fast-forward branch update"
            );
            return Err(VcsError::NonFastForward {
                branch_id: branch_id.to_string(),
                current,
            });
        }

        // The head has already moved; a lost audit row must not report failure.
        if let Err(e) = self.db.insert_audit_log(
            "branch_advanced",
            Some(&branch.repo_id),
            Some(new_head),
            None,
            Some(&format!("{}: {} -> {}", branch.name, expected_head, new_head)),
        ) {
            warn!(branch_id, error = %e, "failed to insert audit log entry (continuing)");
        }
        info!(branch_id, name = %branch.name, from = expected_head, to = new_head, "branch advanced");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Current branch (UI convenience only)
    // -----------------------------------------------------------------------

    pub fn set_current_branch(&self, repo_id: &str, name: &str) -> Result<(), VcsError> {
        self.require_by_name(repo_id, name)?;
        self.db.set_state(&current_branch_key(repo_id), name)?;
        debug!(repo_id, name, "current branch set");
        Ok(())
    }

    /// The remembered current branch name, if any.
    pub fn current_branch(&self, repo_id: &str) -> Result<Option<String>, VcsError> {
        Ok(self.db.get_state(&current_branch_key(repo_id))?)
    }
}

fn current_branch_key(repo_id: &str) -> String {
    format!("repo:{repo_id}:current_branch")
}

fn branch_exists(repo_id: &str, name: &str) -> VcsError {
    VcsError::BranchExists {
        repo_id: repo_id.to_string(),
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commits::CommitStore;
    use crate::config::ClassifierConfig;
    use crate::snapshot::Snapshot;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn commit(db: &Database, repo_id: &str, parents: &[String]) -> String {
        let cfg = ClassifierConfig::default();
        CommitStore::new(db, &cfg)
            .create(repo_id, parents, Snapshot::default(), "ana", "c")
            .unwrap()
            .commit_id
    }

    #[test]
    fn test_create_branch_and_duplicate() {
        let db = setup_db();
        let reg = BranchRegistry::new(&db);
        let repo = reg.create_repo("Rome", Some("u1"), Visibility::Public).unwrap();
        let c1 = commit(&db, &repo.id, &[]);

        let main = reg.create(&repo.id, "main", &c1).unwrap();
        assert_eq!(main.head_commit_id, c1);
        assert_eq!(reg.get(&main.id).unwrap(), main);

        let err = reg.create(&repo.id, "main", &c1).unwrap_err();
        assert!(matches!(err, VcsError::BranchExists { .. }));

        let err = reg.create(&repo.id, "alt", "missing").unwrap_err();
        assert!(matches!(err, VcsError::NotFound { .. }));

        reg.create(&repo.id, "alt", &c1).unwrap();
        let names: Vec<String> = reg.list(&repo.id).unwrap().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["alt", "main"]);
    }

    #[test]
    fn test_advance_head_compare_and_swap() {
        let db = setup_db();
        let reg = BranchRegistry::new(&db);
        let repo = reg.create_repo("Rome", None, Visibility::Private).unwrap();
        let c1 = commit(&db, &repo.id, &[]);
        let c2 = commit(&db, &repo.id, &[c1.clone()]);
        let c3 = commit(&db, &repo.id, &[c1.clone()]);
        let main = reg.create(&repo.id, "main", &c1).unwrap();

        reg.advance_head(&main.id, &c1, &c2).unwrap();

        // A writer that still believes the head is c1 is rejected.
        let err = reg.advance_head(&main.id, &c1, &c3).unwrap_err();
        match err {
            VcsError::NonFastForward { current, .. } => assert_eq!(current, c2),
            other => panic!("expected NonFastForward, got {other:?}"),
        }
        assert_eq!(reg.get(&main.id).unwrap().head_commit_id, c2);

        assert!(matches!(
            reg.advance_head("nope", &c1, &c2),
            Err(VcsError::NotFound { .. })
        ));
    }

    #[test]
    fn test_current_branch_side_table() {
        let db = setup_db();
        let reg = BranchRegistry::new(&db);
        let repo = reg.create_repo("Rome", None, Visibility::Private).unwrap();
        let c1 = commit(&db, &repo.id, &[]);
        reg.create(&repo.id, "main", &c1).unwrap();

        assert_eq!(reg.current_branch(&repo.id).unwrap(), None);
        reg.set_current_branch(&repo.id, "main").unwrap();
        assert_eq!(reg.current_branch(&repo.id).unwrap().as_deref(), Some("main"));
        assert!(reg.set_current_branch(&repo.id, "ghost").is_err());
    }

    #[test]
    fn test_fork_repo_shares_heads() {
        let db = setup_db();
        let reg = BranchRegistry::new(&db);
        let repo = reg.create_repo("Rome", Some("u1"), Visibility::Unlisted).unwrap();
        let c1 = commit(&db, &repo.id, &[]);
        reg.create(&repo.id, "main", &c1).unwrap();
        reg.create(&repo.id, "alt", &c1).unwrap();

        let fork = reg.fork_repo(&repo.id, "Rome (copy)", Some("u2")).unwrap();
        assert_eq!(fork.forked_from_repo_id.as_deref(), Some(repo.id.as_str()));
        assert_eq!(fork.visibility, Visibility::Unlisted);

        let branches = reg.list(&fork.id).unwrap();
        assert_eq!(branches.len(), 2);
        assert!(branches.iter().all(|b| b.head_commit_id == c1));
        assert!(reg.fork_repo("missing", "x", None).is_err());
    }

    #[test]
    fn test_lost_audit_row_does_not_fail_completed_writes() {
        let db = setup_db();
        let reg = BranchRegistry::new(&db);
        let repo = reg.create_repo("Rome", None, Visibility::Private).unwrap();
        let c1 = commit(&db, &repo.id, &[]);
        let main = reg.create(&repo.id, "main", &c1).unwrap();

        db.conn().execute_batch("DROP TABLE audit_log;").unwrap();

        let c2 = commit(&db, &repo.id, &[c1.clone()]);
        reg.advance_head(&main.id, &c1, &c2).unwrap();
        assert_eq!(reg.get(&main.id).unwrap().head_commit_id, c2);

        let fork = reg.fork_repo(&repo.id, "Rome again", None).unwrap();
        assert_eq!(reg.list(&fork.id).unwrap().len(), 1);
    }
}

