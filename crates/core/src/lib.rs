//! TripVCS core library.
//!
//! Git-style version control for trip itineraries: immutable commits holding
//! whole itinerary snapshots, named branches advanced by compare-and-swap,
//! merge-base discovery over the commit DAG, a three-way merger that
//! understands days and stops, conflict resolution, and a heuristic
//! "significant change" classifier.

pub mod ancestry;
pub mod branches;
pub mod classify;
pub mod commits;
pub mod config;
pub mod conflict;
pub mod db;
pub mod engine;
pub mod errors;
pub mod models;
pub mod snapshot;

// Re-exports for convenience.
pub use ancestry::CommitGraph;
pub use branches::BranchRegistry;
pub use classify::ChangeClassifier;
pub use commits::CommitStore;
pub use config::AppConfig;
pub use conflict::{Conflict, ConflictKind, ConflictResolver, Decision, Side, ThreeWayMerger};
pub use db::Database;
pub use engine::{MergeOutcome, MergeSession, VersionEngine};
pub use errors::{CoreError, VcsError};
pub use snapshot::Snapshot;
