//! The version-control engine.
//!
//! [`VersionEngine`] ties the commit store, branch registry, ancestry
//! resolver, merger and resolution applier to one database and one
//! configuration. A merge between two branches runs in two steps:
//!
//! 1. [`open_merge`](VersionEngine::open_merge) resolves both heads, finds
//!    their merge base and merges. A clean merge is committed and the target
//!    branch advanced right away.
//! 2. Otherwise the caller receives a [`MergeSession`], collects one
//!    [`Decision`] per conflict and hands both to
//!    [`resolve_merge`](VersionEngine::resolve_merge), which re-merges from
//!    freshly loaded commits and commits the result.
//!
//! Both paths advance the target branch by compare-and-swap against the head
//! seen when the merge was opened.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ancestry;
use crate::branches::BranchRegistry;
use crate::commits::CommitStore;
use crate::config::AppConfig;
use crate::conflict::{Conflict, ConflictResolver, Decision, MergeResult, ThreeWayMerger};
use crate::db::Database;
use crate::errors::{CoreError, VcsError};
use crate::models::{Branch, Commit, CommitCreated, KeyChange, Repo, Visibility};
use crate::snapshot::Snapshot;

// ---------------------------------------------------------------------------
// Merge workflow types
// ---------------------------------------------------------------------------

/// A merge that stopped on conflicts, waiting for user decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeSession {
    pub repo_id: String,
    pub source_branch: String,
    pub target_branch: String,
    pub target_branch_id: String,
    pub base_id: String,
    /// Head of the source branch.
    pub ours_id: String,
    /// Head of the target branch.
    pub theirs_id: String,
    /// Target head at open time; the resolution commit CASes against it.
    pub expected_head: String,
    pub conflicts: Vec<Conflict>,
    /// The merged snapshot with every conflict at its default.
    pub preview: Snapshot,
}

/// What [`VersionEngine::open_merge`] did.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// The target already contains the source head.
    UpToDate { head: String },
    /// No conflicts: the merge commit was created and the target advanced.
    Committed {
        commit_id: String,
        key_change: KeyChange,
    },
    /// Conflicts need decisions before anything is committed.
    Conflicted(MergeSession),
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct VersionEngine {
    db: Arc<Database>,
    config: AppConfig,
}

impl VersionEngine {
    pub fn new(config: AppConfig, db: Arc<Database>) -> Self {
        info!("initializing version engine");
        Self { db, config }
    }

    /// Open the database named in `config.store`, run migrations and build
    /// an engine over it.
    pub fn open(config: AppConfig) -> Result<Self, CoreError> {
        let db = Database::new(&config.store.database_path)?;
        db.initialize()?;
        Ok(Self::new(config, Arc::new(db)))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn commits(&self) -> CommitStore<'_> {
        CommitStore::new(&self.db, &self.config.classifier)
    }

    pub fn branches(&self) -> BranchRegistry<'_> {
        BranchRegistry::new(&self.db)
    }

    // -----------------------------------------------------------------------
    // Repos, commits, branches
    // -----------------------------------------------------------------------

    pub fn create_repo(
        &self,
        title: &str,
        owner_user_id: Option<&str>,
        visibility: Visibility,
    ) -> Result<Repo, VcsError> {
        self.branches().create_repo(title, owner_user_id, visibility)
    }

    pub fn fork_repo(
        &self,
        source_repo_id: &str,
        title: &str,
        owner_user_id: Option<&str>,
    ) -> Result<Repo, VcsError> {
        self.branches().fork_repo(source_repo_id, title, owner_user_id)
    }

    pub fn create_commit(
        &self,
        repo_id: &str,
        parents: &[String],
        snapshot: Snapshot,
        author: &str,
        message: &str,
    ) -> Result<CommitCreated, VcsError> {
        self.commits().create(repo_id, parents, snapshot, author, message)
    }

    pub fn get_commit(&self, commit_id: &str) -> Result<Commit, VcsError> {
        self.commits().get(commit_id)
    }

    pub fn create_branch(
        &self,
        repo_id: &str,
        name: &str,
        from_commit_id: &str,
    ) -> Result<Branch, VcsError> {
        self.branches().create(repo_id, name, from_commit_id)
    }

    pub fn advance_branch(
        &self,
        branch_id: &str,
        expected_head: &str,
        new_head: &str,
    ) -> Result<(), VcsError> {
        self.branches().advance_head(branch_id, expected_head, new_head)
    }

    /// Commit `snapshot` on top of `expected_head` and move the branch to it.
    ///
    /// When the branch moved in the meantime the commit still exists but
    /// is unreachable from the branch, and `NonFastForward` is returned.
    pub fn commit_on_branch(
        &self,
        branch_id: &str,
        expected_head: &str,
        snapshot: Snapshot,
        author: &str,
        message: &str,
    ) -> Result<CommitCreated, VcsError> {
        let branch = self.branches().get(branch_id)?;
        let created = self.commits().create(
            &branch.repo_id,
            &[expected_head.to_string()],
            snapshot,
            author,
            message,
        )?;
        self.branches()
            .advance_head(branch_id, expected_head, &created.commit_id)?;
        Ok(created)
    }

    // -----------------------------------------------------------------------
    // Ancestry and merging
    // -----------------------------------------------------------------------

    pub fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>, VcsError> {
        ancestry::merge_base(self.db.as_ref(), a, b)
    }

    pub fn three_way_merge(&self, base: &Snapshot, ours: &Snapshot, theirs: &Snapshot) -> MergeResult {
        ThreeWayMerger::merge(base, ours, theirs, &self.config.merge)
    }

    pub fn apply_resolutions(
        &self,
        base: &Snapshot,
        ours: &Snapshot,
        theirs: &Snapshot,
        decisions: &[Decision],
    ) -> Snapshot {
        ConflictResolver::apply(base, ours, theirs, decisions, &self.config.merge)
    }

    /// Merge branch `source` into branch `target` of `repo_id`.
    pub fn open_merge(
        &self,
        repo_id: &str,
        source: &str,
        target: &str,
        author: &str,
        message: &str,
    ) -> Result<MergeOutcome, VcsError> {
        let registry = self.branches();
        let source_branch = registry.require_by_name(repo_id, source)?;
        let target_branch = registry.require_by_name(repo_id, target)?;
        let ours_id = source_branch.head_commit_id;
        let theirs_id = target_branch.head_commit_id;

        let base_id = self
            .merge_base(&ours_id, &theirs_id)?
            .ok_or_else(|| VcsError::NoCommonAncestor {
                a: ours_id.clone(),
                b: theirs_id.clone(),
            })?;
        info!(repo_id, source, target, %base_id, %ours_id, %theirs_id, "opening merge");

        if base_id == ours_id {
            debug!(source, target, "target already contains source");
            return Ok(MergeOutcome::UpToDate { head: theirs_id });
        }

        let base = self.get_commit(&base_id)?;
        let ours = self.get_commit(&ours_id)?;
        let theirs = self.get_commit(&theirs_id)?;
        let result = self.three_way_merge(&base.snapshot, &ours.snapshot, &theirs.snapshot);

        let session = MergeSession {
            repo_id: repo_id.to_string(),
            source_branch: source_branch.name,
            target_branch: target_branch.name,
            target_branch_id: target_branch.id,
            base_id,
            ours_id,
            theirs_id: theirs_id.clone(),
            expected_head: theirs_id,
            conflicts: result.conflicts,
            preview: result.snapshot,
        };

        if !session.conflicts.is_empty() {
            info!(conflicts = session.conflicts.len(), "merge needs resolution");
            return Ok(MergeOutcome::Conflicted(session));
        }

        let preview = session.preview.clone();
        let created = self.finish_merge(&session, preview, author, message)?;
        Ok(MergeOutcome::Committed {
            commit_id: created.commit_id,
            key_change: created.key_change,
        })
    }

    /// Apply `decisions` to a conflicted merge and commit the result.
    ///
    /// The three commits are reloaded by id and merged again; the preview
    /// stored in `session` is ignored.
    pub fn resolve_merge(
        &self,
        session: &MergeSession,
        decisions: &[Decision],
        author: &str,
        message: &str,
    ) -> Result<CommitCreated, VcsError> {
        self.check_session(session)?;
        let base = self.get_commit(&session.base_id)?;
        let ours = self.get_commit(&session.ours_id)?;
        let theirs = self.get_commit(&session.theirs_id)?;

        let snapshot =
            self.apply_resolutions(&base.snapshot, &ours.snapshot, &theirs.snapshot, decisions);
        info!(
            repo_id = %session.repo_id,
            decisions = decisions.len(),
            conflicts = session.conflicts.len(),
            "resolving merge"
        );
        self.finish_merge(session, snapshot, author, message)
    }

    /// Reject a session whose ids do not describe the merge it claims to be.
    fn check_session(&self, session: &MergeSession) -> Result<(), VcsError> {
        if session.expected_head != session.theirs_id {
            return Err(VcsError::InvalidArgument(format!(
                "merge session expects target head {} but merges {}",
                session.expected_head, session.theirs_id
            )));
        }
        let base = self.merge_base(&session.ours_id, &session.theirs_id)?;
        if base.as_deref() != Some(session.base_id.as_str()) {
            return Err(VcsError::InvalidArgument(format!(
                "merge session base {} is not the merge base of {} and {}",
                session.base_id, session.ours_id, session.theirs_id
            )));
        }
        Ok(())
    }

    fn finish_merge(
        &self,
        session: &MergeSession,
        snapshot: Snapshot,
        author: &str,
        message: &str,
    ) -> Result<CommitCreated, VcsError> {
        let message = if message.trim().is_empty() {
            format!(
                "Merge {} into {}",
                session.source_branch, session.target_branch
            )
        } else {
            message.to_string()
        };
        let parents = [session.ours_id.clone(), session.theirs_id.clone()];
        let created = self
            .commits()
            .create(&session.repo_id, &parents, snapshot, author, &message)?;
        self.branches().advance_head(
            &session.target_branch_id,
            &session.expected_head,
            &created.commit_id,
        )?;

        if let Err(e) = self.db.insert_audit_log(
            "merge_committed",
            Some(&session.repo_id),
            Some(&created.commit_id),
            Some(author),
            Some(&format!(
                "{} -> {} (base {}, {} conflicts)",
                session.source_branch,
                session.target_branch,
                session.base_id,
                session.conflicts.len()
            )),
        ) {
            warn!(commit_id = %created.commit_id, error = %e, "failed to insert audit log entry (continuing)");
        }
        info!(commit_id = %created.commit_id, target = %session.target_branch, "merge committed");
        Ok(created)
    }
}
