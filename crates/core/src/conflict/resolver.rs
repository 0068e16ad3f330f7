//! Conflict resolution: turning per-conflict user decisions into the final
//! merged snapshot.
//!
//! The merge is always recomputed from the three input snapshots; a merge
//! result cached by a client is never trusted.

use tracing::{debug, info};

use super::detector::{ConflictKind, Decision, Side};
use super::merger::ThreeWayMerger;
use super::plan::{keyed_stops, with_timing_from};
use crate::config::MergeConfig;
use crate::snapshot::{Plan, Snapshot, Stop};

/// Stateless conflict resolution operations.
pub struct ConflictResolver;

impl ConflictResolver {
    /// Re-merge `base`/`ours`/`theirs` and apply `decisions` on top.
    ///
    /// Decisions of an unrecognized type, or whose location no longer
    /// exists in the merge, are skipped.
    pub fn apply(
        base: &Snapshot,
        ours: &Snapshot,
        theirs: &Snapshot,
        decisions: &[Decision],
        config: &MergeConfig,
    ) -> Snapshot {
        let merged = ThreeWayMerger::merge(base, ours, theirs, config).snapshot;
        info!(decisions = decisions.len(), "applying conflict resolutions");

        let mut files = merged.files;
        let mut plan = merged.plan;

        for decision in decisions {
            let Some(kind) = ConflictKind::from_str_val(&decision.kind) else {
                debug!(kind = %decision.kind, "ignoring decision of unknown type");
                continue;
            };
            let chosen = match decision.choice {
                Side::Ours => ours,
                Side::Theirs => theirs,
                Side::Base => base,
            };
            debug!(%kind, location = %decision.location, choice = %decision.choice, "applying decision");

            match kind {
                ConflictKind::File => {
                    let Some(path) = decision.location.path.as_deref() else {
                        continue;
                    };
                    match chosen.files.get(path) {
                        Some(text) => {
                            files.insert(path.to_string(), text.clone());
                        }
                        None => {
                            files.remove(path);
                        }
                    }
                }
                ConflictKind::PlanWhole => {
                    plan = chosen.plan.clone();
                }
                ConflictKind::PlanStopTime => {
                    let (Some(day_id), Some(stop_id)) =
                        (decision.location.day_id.as_deref(), decision.location.stop_id.as_deref())
                    else {
                        continue;
                    };
                    let source = find_stop(&chosen.plan, day_id, stop_id, config);
                    plan = retime_stop(plan, day_id, stop_id, source.as_ref());
                }
                ConflictKind::PlanStopDelete => {
                    let (Some(day_id), Some(stop_id)) =
                        (decision.location.day_id.as_deref(), decision.location.stop_id.as_deref())
                    else {
                        continue;
                    };
                    let source = find_stop(&chosen.plan, day_id, stop_id, config);
                    plan = reinstate_stop(plan, &chosen.plan, day_id, stop_id, source);
                }
            }
        }

        Snapshot::new(files, plan)
    }
}

/// Look a stop up by key, keying the day the same way the merger does.
fn find_stop(plan: &Plan, day_id: &str, stop_id: &str, config: &MergeConfig) -> Option<Stop> {
    keyed_stops(plan.day(day_id), config).get(stop_id).cloned()
}

/// Overwrite only `arrive`/`depart` of the located stop.
fn retime_stop(plan: Plan, day_id: &str, stop_id: &str, source: Option<&Stop>) -> Plan {
    let Some(source) = source else {
        debug!(day_id, stop_id, "chosen side has no such stop, leaving timing as merged");
        return plan;
    };
    let Plan { days, extra } = plan;
    let days = days
        .into_iter()
        .map(|day| {
            if day.id != day_id {
                return day;
            }
            let stops = day
                .stops
                .iter()
                .map(|stop| {
                    if stop.id().as_deref() == Some(stop_id) {
                        with_timing_from(stop.clone(), Some(source))
                    } else {
                        stop.clone()
                    }
                })
                .collect();
            day.with_stops(stops)
        })
        .collect();
    Plan::new(days, extra)
}

/// Put the chosen side's version of a stop back, or remove the stop when
/// the chosen side lacks it.
fn reinstate_stop(
    plan: Plan,
    chosen_plan: &Plan,
    day_id: &str,
    stop_id: &str,
    source: Option<Stop>,
) -> Plan {
    let Plan { mut days, extra } = plan;

    if days.iter().all(|d| d.id != day_id) {
        let Some(shell) = chosen_plan.day(day_id) else {
            return Plan::new(days, extra);
        };
        if source.is_none() {
            return Plan::new(days, extra);
        }
        days.push(shell.with_stops(Vec::new()));
    }

    let days = days
        .into_iter()
        .map(|day| {
            if day.id != day_id {
                return day;
            }
            let mut stops: Vec<Stop> = day
                .stops
                .iter()
                .filter(|s| s.id().as_deref() != Some(stop_id))
                .cloned()
                .collect();
            if let Some(stop) = &source {
                let position = day
                    .stops
                    .iter()
                    .position(|s| s.id().as_deref() == Some(stop_id))
                    .unwrap_or(stops.len());
                stops.insert(position.min(stops.len()), stop.clone());
            }
            day.with_stops(stops)
        })
        // A day the chosen side deleted goes once its last stop is gone.
        .filter(|day| {
            day.id != day_id || !day.stops.is_empty() || chosen_plan.day(day_id).is_some()
        })
        .collect();
    Plan::new(days, extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::detector::{Conflict, ConflictLocation};
    use serde_json::json;

    fn base() -> Snapshot {
        Snapshot::from(json!({
            "files": {"notes.md": "base"},
            "plan": {"days": [
                {"id": "d1", "date": "2025-06-01", "stops": [
                    {"id": "x", "name": "Louvre", "arrive": "10:00", "depart": "11:00", "stayMin": 60},
                    {"id": "y", "name": "Orsay", "arrive": "12:00", "depart": "13:00", "stayMin": 60}
                ]}
            ]}
        }))
    }

    fn conflicts_of(b: &Snapshot, o: &Snapshot, t: &Snapshot) -> Vec<Conflict> {
        ThreeWayMerger::merge(b, o, t, &MergeConfig::default()).conflicts
    }

    fn apply_all(b: &Snapshot, o: &Snapshot, t: &Snapshot, choice: Side) -> Snapshot {
        let decisions: Vec<Decision> = conflicts_of(b, o, t)
            .iter()
            .map(|c| Decision::for_conflict(c, choice))
            .collect();
        ConflictResolver::apply(b, o, t, &decisions, &MergeConfig::default())
    }

    fn delete_vs_edit() -> (Snapshot, Snapshot, Snapshot) {
        let b = base();
        let mut o = base();
        o.plan.days[0].stops.remove(0);
        let mut t = base();
        t.plan.days[0].stops[0] = t.plan.days[0].stops[0].with_field("stayMin", json!(90));
        (b, o, t)
    }

    #[test]
    fn test_stop_delete_choose_theirs_reinstates_edit() {
        let (b, o, t) = delete_vs_edit();
        let result = apply_all(&b, &o, &t, Side::Theirs);
        let stops = &result.plan.days[0].stops;
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[0].id().as_deref(), Some("x"));
        assert_eq!(stops[0].get("stayMin"), Some(&json!(90)));
    }

    #[test]
    fn test_stop_delete_choose_ours_removes() {
        let (b, o, t) = delete_vs_edit();
        let result = apply_all(&b, &o, &t, Side::Ours);
        let stops = &result.plan.days[0].stops;
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].id().as_deref(), Some("y"));
    }

    #[test]
    fn test_stop_time_overwrites_only_timing() {
        let b = base();
        let mut o = base();
        o.plan.days[0].stops[0] = o.plan.days[0].stops[0]
            .with_field("arrive", json!("10:30"))
            .with_field("stayMin", json!(30));
        let mut t = base();
        t.plan.days[0].stops[0] = t.plan.days[0].stops[0].with_field("arrive", json!("09:30"));
        assert_eq!(conflicts_of(&b, &o, &t).len(), 1);

        let result = apply_all(&b, &o, &t, Side::Theirs);
        let stop = &result.plan.days[0].stops[0];
        assert_eq!(stop.get("arrive"), Some(&json!("09:30")));
        // Non-timing fields keep the merged value.
        assert_eq!(stop.get("stayMin"), Some(&json!(30)));
    }

    #[test]
    fn test_file_and_whole_plan_choices() {
        let b = base();
        let o = Snapshot::from(json!({
            "files": {"notes.md": "ours"},
            "plan": {"days": [{"id": "d1", "date": "2025-06-01", "stops": [{"id": "o1"}, {"id": "o2"}]}]}
        }));
        let t = Snapshot::from(json!({
            "files": {"notes.md": "theirs"},
            "plan": {"days": [{"id": "d1", "date": "2025-06-01", "stops": [{"id": "t1"}, {"id": "t2"}]}]}
        }));
        let conflicts = conflicts_of(&b, &o, &t);
        assert_eq!(conflicts.len(), 2);

        let result = apply_all(&b, &o, &t, Side::Theirs);
        assert_eq!(result.files["notes.md"], "theirs");
        assert_eq!(result.plan, t.plan);

        let result = apply_all(&b, &o, &t, Side::Base);
        assert_eq!(result.files["notes.md"], "base");
        assert_eq!(result.plan, b.plan);
    }

    #[test]
    fn test_unknown_decision_type_is_ignored() {
        let (b, o, t) = delete_vs_edit();
        let decisions = vec![Decision {
            kind: "plan-rename".into(),
            location: ConflictLocation::stop("d1", "x"),
            choice: Side::Ours,
        }];
        let result = ConflictResolver::apply(&b, &o, &t, &decisions, &MergeConfig::default());
        let merged = ThreeWayMerger::merge(&b, &o, &t, &MergeConfig::default()).snapshot;
        assert_eq!(result, merged);
    }

    fn two_day_base() -> Snapshot {
        Snapshot::from(json!({
            "files": {},
            "plan": {"days": [
                {"id": "d1", "date": "2025-06-01", "stops": [{"id": "a", "name": "Louvre"}]},
                {"id": "d2", "date": "2025-06-02", "stops": [
                    {"id": "x", "name": "Versailles", "stayMin": 60},
                    {"id": "y", "name": "Giverny", "stayMin": 60}
                ]}
            ]}
        }))
    }

    #[test]
    fn test_choosing_day_deletion_drops_empty_day() {
        let b = two_day_base();
        let mut o = two_day_base();
        o.plan.days.remove(1);
        let mut t = two_day_base();
        t.plan.days[1].stops[0] = t.plan.days[1].stops[0].with_field("stayMin", json!(90));

        let conflicts = conflicts_of(&b, &o, &t);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::PlanStopDelete);

        let result = apply_all(&b, &o, &t, Side::Ours);
        assert!(result.plan.day("d2").is_none());
        assert_eq!(result.plan.days.len(), 1);

        let result = apply_all(&b, &o, &t, Side::Theirs);
        let d2 = result.plan.day("d2").unwrap();
        assert_eq!(d2.stops.len(), 1);
        assert_eq!(d2.stops[0].get("stayMin"), Some(&json!(90)));
    }

    #[test]
    fn test_reinstating_stop_recreates_missing_day_shell() {
        let merged = base().plan;
        let chosen = Plan::from_value(&json!({"days": [
            {"id": "d1", "date": "2025-06-01", "stops": []},
            {"id": "d2", "date": "2025-06-02", "theme": "gardens", "stops": [
                {"id": "w", "name": "Monet house"},
                {"id": "z", "name": "Giverny"}
            ]}
        ]}));
        let source = find_stop(&chosen, "d2", "z", &MergeConfig::default());

        let plan = reinstate_stop(merged.clone(), &chosen, "d2", "z", source);
        // d1 is untouched; d2 comes back with its date and extras but only
        // the decided stop.
        assert_eq!(plan.days.len(), 2);
        assert_eq!(plan.days[0], merged.days[0]);
        let d2 = plan.day("d2").unwrap();
        assert_eq!(d2.date, "2025-06-02");
        assert_eq!(d2.extra.get("theme"), Some(&json!("gardens")));
        assert_eq!(d2.stops.len(), 1);
        assert_eq!(d2.stops[0].id().as_deref(), Some("z"));

        // No stop on the chosen side: nothing to recreate.
        let plan = reinstate_stop(merged.clone(), &chosen, "d2", "missing", None);
        assert_eq!(plan, merged);
    }
}
