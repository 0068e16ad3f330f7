//! Conflict detection, three-way merging, and resolution.
//!
//! The conflict subsystem is responsible for:
//! 1. **Detection** -- classifying each key, day and stop against the merge base.
//! 2. **Merging** -- reconciling files and itinerary plans automatically where possible.
//! 3. **Resolution** -- applying per-conflict user decisions to a fresh re-merge.

pub mod detector;
pub mod merger;
mod plan;
pub mod resolver;

pub use detector::{jaccard, Conflict, ConflictKind, ConflictLocation, Decision, Side};
pub use merger::{MergeResult, ThreeWayMerger};
pub use resolver::ConflictResolver;
