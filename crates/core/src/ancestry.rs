//! Ancestor sets and merge-base discovery over the commit DAG.
//!
//! Traversal is generic over [`CommitGraph`], so the same code runs against
//! the SQLite store and against in-memory maps in tests.
//!
//! [`merge_base`] returns the first common ancestor met by a breadth-first
//! walk from `b`. Under criss-cross histories with several merge bases this
//! is not guaranteed to be the unique lowest one.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::errors::VcsError;

/// Read access to parent edges.
pub trait CommitGraph {
    /// Ordered parent ids of `commit_id`. Unknown ids are `NotFound`.
    fn parents_of(&self, commit_id: &str) -> Result<Vec<String>, VcsError>;
}

impl CommitGraph for HashMap<String, Vec<String>> {
    fn parents_of(&self, commit_id: &str) -> Result<Vec<String>, VcsError> {
        self.get(commit_id)
            .cloned()
            .ok_or_else(|| VcsError::not_found("commit", commit_id))
    }
}

/// Every commit reachable from `commit_id` over parent edges, including
/// `commit_id` itself.
pub fn ancestor_set<G: CommitGraph + ?Sized>(
    graph: &G,
    commit_id: &str,
) -> Result<HashSet<String>, VcsError> {
    let mut seen = HashSet::new();
    let mut stack = vec![commit_id.to_string()];
    while let Some(id) = stack.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        for parent in graph.parents_of(&id)? {
            if !seen.contains(&parent) {
                stack.push(parent);
            }
        }
    }
    Ok(seen)
}

/// The merge base of `a` and `b`, or `None` when histories are disjoint.
pub fn merge_base<G: CommitGraph + ?Sized>(
    graph: &G,
    a: &str,
    b: &str,
) -> Result<Option<String>, VcsError> {
    let ancestors_of_a = ancestor_set(graph, a)?;

    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([b.to_string()]);
    while let Some(id) = queue.pop_front() {
        if ancestors_of_a.contains(&id) {
            debug!(a, b, base = %id, "merge base found");
            return Ok(Some(id));
        }
        if !visited.insert(id.clone()) {
            continue;
        }
        for parent in graph.parents_of(&id)? {
            if !visited.contains(&parent) {
                queue.push_back(parent);
            }
        }
    }

    debug!(a, b, "histories are disjoint");
    Ok(None)
}

/// Whether `ancestor` is reachable from `descendant` (inclusive).
pub fn is_ancestor<G: CommitGraph + ?Sized>(
    graph: &G,
    ancestor: &str,
    descendant: &str,
) -> Result<bool, VcsError> {
    Ok(ancestor_set(graph, descendant)?.contains(ancestor))
}
