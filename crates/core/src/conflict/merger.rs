//! Three-way merge engine for itinerary snapshots.
//!
//! The merge runs in two tiers. The file map is merged key by key on plain
//! equality. The plan is merged cheaply when at most one side changed it;
//! otherwise the stop fingerprints of both sides gate whether a structured
//! day/stop reconciliation is attempted or a single whole-plan conflict is
//! raised.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::detector::{jaccard, pick, Conflict, ConflictKind, ConflictLocation, Pick};
use super::plan;
use crate::config::MergeConfig;
use crate::snapshot::{Plan, Snapshot};

/// The result of a three-way merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResult {
    /// The merged snapshot, with every conflict at its default value.
    pub snapshot: Snapshot,
    /// Divergences that need a user decision.
    pub conflicts: Vec<Conflict>,
}

impl MergeResult {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Stateless three-way merge engine.
pub struct ThreeWayMerger;

impl ThreeWayMerger {
    /// Merge `ours` and `theirs` against their common ancestor `base`.
    pub fn merge(
        base: &Snapshot,
        ours: &Snapshot,
        theirs: &Snapshot,
        config: &MergeConfig,
    ) -> MergeResult {
        info!("performing three-way merge");

        let mut conflicts = Vec::new();
        let files = merge_files(&base.files, &ours.files, &theirs.files, &mut conflicts);
        let plan = merge_plan(&base.plan, &ours.plan, &theirs.plan, config, &mut conflicts);

        info!(conflicts = conflicts.len(), "three-way merge complete");
        MergeResult {
            snapshot: Snapshot::new(files, plan),
            conflicts,
        }
    }

    /// Quick check: can these three versions be merged without conflicts?
    pub fn can_auto_merge(
        base: &Snapshot,
        ours: &Snapshot,
        theirs: &Snapshot,
        config: &MergeConfig,
    ) -> bool {
        if ours == base || theirs == base || ours == theirs {
            return true;
        }
        !Self::merge(base, ours, theirs, config).has_conflicts()
    }
}

/// File-map tier: per-path equality against base. Conflicts keep base.
fn merge_files(
    base: &BTreeMap<String, String>,
    ours: &BTreeMap<String, String>,
    theirs: &BTreeMap<String, String>,
    conflicts: &mut Vec<Conflict>,
) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    for path in base.keys().chain(ours.keys()).chain(theirs.keys()) {
        if merged.contains_key(path) {
            continue;
        }
        let (b, o, t) = (base.get(path), ours.get(path), theirs.get(path));
        let chosen = match pick(b, o, t) {
            Pick::Base => b,
            Pick::Ours => o,
            Pick::Theirs => t,
            Pick::Conflict => {
                debug!(path = %path, "file changed differently on both sides");
                conflicts.push(Conflict::new(
                    ConflictKind::File,
                    ConflictLocation::file(path.as_str()),
                    b.cloned().map(Value::String),
                    o.cloned().map(Value::String),
                    t.cloned().map(Value::String),
                ));
                b
            }
        };
        if let Some(text) = chosen {
            merged.insert(path.clone(), text.clone());
        }
    }
    merged
}

/// Plan tier.
fn merge_plan(
    base: &Plan,
    ours: &Plan,
    theirs: &Plan,
    config: &MergeConfig,
    conflicts: &mut Vec<Conflict>,
) -> Plan {
    match pick(Some(base), Some(ours), Some(theirs)) {
        Pick::Base => return base.clone(),
        Pick::Ours => return ours.clone(),
        Pick::Theirs => return theirs.clone(),
        Pick::Conflict => {}
    }

    let base_fp = base.fingerprint();
    let ours_fp = ours.fingerprint();
    let theirs_fp = theirs.fingerprint();
    if ours_fp != base_fp && theirs_fp != base_fp {
        let similarity = jaccard(&ours_fp, &theirs_fp);
        debug!(similarity, threshold = config.whole_plan_threshold, "both sides changed plan structure");
        if similarity < config.whole_plan_threshold {
            info!(similarity, "plans diverged too far, raising whole-plan conflict");
            conflicts.push(Conflict::new(
                ConflictKind::PlanWhole,
                ConflictLocation::plan(),
                Some(base.to_value()),
                Some(ours.to_value()),
                Some(theirs.to_value()),
            ));
            return base.clone();
        }
    }

    let reconciled = plan::reconcile(base, ours, theirs, config);
    conflicts.extend(reconciled.conflicts);

    let extra = plan::merge_fields(Some(&base.extra), Some(&ours.extra), Some(&theirs.extra));
    Plan::new(reconciled.days, extra)
}
