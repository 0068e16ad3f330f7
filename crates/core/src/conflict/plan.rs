//! Structured day/stop reconciliation for plans that are similar enough to
//! merge field by field.
//!
//! Stops are matched by their explicit `id`, else by a synthetic key built
//! from the normalized name, rounded coordinates and the day id. The key is
//! written back as the stop's `id` so later merges match on it directly.
//! Two distinct same-named stops at the same rounded position within one
//! day share a key; only the first is matched.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::detector::{pick, Conflict, ConflictKind, ConflictLocation, Pick};
use crate::config::MergeConfig;
use crate::snapshot::{Day, Plan, Stop, TIME_FIELDS};

/// Reconciled days plus any stop-level conflicts.
#[derive(Debug, Default)]
pub(crate) struct Reconciled {
    pub days: Vec<Day>,
    pub conflicts: Vec<Conflict>,
}

/// Stops of one day keyed by identity, in document order.
pub(crate) struct KeyedStops {
    order: Vec<String>,
    by_key: HashMap<String, Stop>,
}

impl KeyedStops {
    pub(crate) fn get(&self, key: &str) -> Option<&Stop> {
        self.by_key.get(key)
    }
}

/// Key the stops of `day` (or none if the day is absent).
pub(crate) fn keyed_stops(day: Option<&Day>, config: &MergeConfig) -> KeyedStops {
    let mut keyed = KeyedStops {
        order: Vec::new(),
        by_key: HashMap::new(),
    };
    let Some(day) = day else {
        return keyed;
    };
    for stop in &day.stops {
        let (key, stop) = match stop.id() {
            Some(id) => (id, stop.clone()),
            None => {
                let key = synthetic_key(stop, &day.id, config.coordinate_precision);
                let with_id = stop.with_field("id", Value::String(key.clone()));
                (key, with_id)
            }
        };
        if keyed.by_key.contains_key(&key) {
            warn!(day_id = %day.id, key = %key, "duplicate stop key within day, keeping first");
            continue;
        }
        keyed.order.push(key.clone());
        keyed.by_key.insert(key, stop);
    }
    keyed
}

/// `name|lat|lng|day` with the name normalized and coordinates rounded.
pub(crate) fn synthetic_key(stop: &Stop, day_id: &str, precision: u32) -> String {
    let name = stop
        .name()
        .map(normalize_name)
        .unwrap_or_default();
    let coord = |v: Option<f64>| {
        v.map(|x| format!("{:.*}", precision as usize, x))
            .unwrap_or_default()
    };
    format!("{}|{}|{}|{}", name, coord(stop.lat()), coord(stop.lng()), day_id)
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Reconcile three plans day by day and stop by stop.
pub(crate) fn reconcile(base: &Plan, ours: &Plan, theirs: &Plan, config: &MergeConfig) -> Reconciled {
    let mut day_ids: Vec<&str> = Vec::new();
    for day in base.days.iter().chain(&ours.days).chain(&theirs.days) {
        if !day_ids.contains(&day.id.as_str()) {
            day_ids.push(&day.id);
        }
    }

    let mut out = Reconciled::default();
    for day_id in day_ids {
        let (b, o, t) = (base.day(day_id), ours.day(day_id), theirs.day(day_id));
        let stops = reconcile_stops(day_id, b, o, t, config, &mut out.conflicts);

        if !day_survives(b, o, t) && stops.is_empty() {
            debug!(day_id, "day removed by merge");
            continue;
        }

        let header = merge_fields(
            b.map(Day::header).as_ref(),
            o.map(Day::header).as_ref(),
            t.map(Day::header).as_ref(),
        );
        out.days.push(Day::from_header(day_id, header, stops));
    }
    out
}

/// Whether the day itself (not its stops) is kept.
fn day_survives(b: Option<&Day>, o: Option<&Day>, t: Option<&Day>) -> bool {
    match (b, o, t) {
        (_, Some(_), Some(_)) => true,
        (None, _, _) => true,
        (Some(_), None, None) => false,
        // Deleted on one side: kept only if the other side edited it.
        (Some(b), Some(o), None) => o != b,
        (Some(b), None, Some(t)) => t != b,
    }
}

fn reconcile_stops(
    day_id: &str,
    b: Option<&Day>,
    o: Option<&Day>,
    t: Option<&Day>,
    config: &MergeConfig,
    conflicts: &mut Vec<Conflict>,
) -> Vec<Stop> {
    let base = keyed_stops(b, config);
    let ours = keyed_stops(o, config);
    let theirs = keyed_stops(t, config);

    let mut keys: Vec<&String> = Vec::new();
    for key in base.order.iter().chain(&ours.order).chain(&theirs.order) {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    let mut merged = Vec::new();
    for key in keys {
        let (bs, os, ts) = (base.get(key), ours.get(key), theirs.get(key));
        let location = || ConflictLocation::stop(day_id, key.as_str());

        match (bs, os, ts) {
            (Some(bs), Some(os), Some(ts)) => match pick(Some(bs), Some(os), Some(ts)) {
                Pick::Base => merged.push(bs.clone()),
                Pick::Ours => merged.push(os.clone()),
                Pick::Theirs => merged.push(ts.clone()),
                Pick::Conflict => {
                    let fields = merge_fields(Some(bs.fields()), Some(os.fields()), Some(ts.fields()));
                    let both_retimed = os.timing() != bs.timing() && ts.timing() != bs.timing();
                    if both_retimed && os.timing() != ts.timing() {
                        debug!(day_id, stop = %key, "stop retimed on both sides");
                        conflicts.push(stop_conflict(ConflictKind::PlanStopTime, location(), bs, os, ts));
                        merged.push(with_timing_from(Stop::from_fields(fields), Some(bs)));
                    } else {
                        merged.push(Stop::from_fields(fields));
                    }
                }
            },
            // Deleted on one side.
            (Some(bs), None, Some(ts)) | (Some(bs), Some(ts), None) => {
                if ts == bs {
                    continue;
                }
                let (ours_val, theirs_val) = if os.is_some() {
                    (Some(ts.to_value()), None)
                } else {
                    (None, Some(ts.to_value()))
                };
                debug!(day_id, stop = %key, "stop deleted on one side, modified on the other");
                conflicts.push(Conflict::new(
                    ConflictKind::PlanStopDelete,
                    location(),
                    Some(bs.to_value()),
                    ours_val,
                    theirs_val,
                ));
                merged.push(bs.clone());
            }
            (Some(_), None, None) => {}
            (None, Some(os), None) => merged.push(os.clone()),
            (None, None, Some(ts)) => merged.push(ts.clone()),
            (None, Some(os), Some(ts)) => {
                if os == ts {
                    merged.push(os.clone());
                    continue;
                }
                let fields = merge_fields(None, Some(os.fields()), Some(ts.fields()));
                if os.timing() != ts.timing() {
                    conflicts.push(Conflict::new(
                        ConflictKind::PlanStopTime,
                        location(),
                        None,
                        Some(os.to_value()),
                        Some(ts.to_value()),
                    ));
                }
                merged.push(Stop::from_fields(fields));
            }
            (None, None, None) => {}
        }
    }
    merged
}

fn stop_conflict(kind: ConflictKind, location: ConflictLocation, b: &Stop, o: &Stop, t: &Stop) -> Conflict {
    Conflict::new(
        kind,
        location,
        Some(b.to_value()),
        Some(o.to_value()),
        Some(t.to_value()),
    )
}

/// Copy `arrive`/`depart` from `source` onto `stop`, removing them where the
/// source lacks them.
pub(crate) fn with_timing_from(stop: Stop, source: Option<&Stop>) -> Stop {
    TIME_FIELDS.iter().fold(stop, |acc, field| {
        match source.and_then(|s| s.get(field)) {
            Some(value) => acc.with_field(field, value.clone()),
            None => acc.without_field(field),
        }
    })
}

/// Field-level three-way merge of JSON objects. A field changed on one side
/// takes that side; changed on both, ours wins. Absent maps count as empty.
pub(crate) fn merge_fields(
    base: Option<&Map<String, Value>>,
    ours: Option<&Map<String, Value>>,
    theirs: Option<&Map<String, Value>>,
) -> Map<String, Value> {
    let empty = Map::new();
    let (b, o, t) = (
        base.unwrap_or(&empty),
        ours.unwrap_or(&empty),
        theirs.unwrap_or(&empty),
    );

    let mut out = Map::new();
    for key in b.keys().chain(o.keys()).chain(t.keys()) {
        if out.contains_key(key) {
            continue;
        }
        let (bv, ov, tv) = (b.get(key), o.get(key), t.get(key));
        let chosen = match pick(bv, ov, tv) {
            Pick::Base => bv,
            Pick::Ours | Pick::Conflict => ov,
            Pick::Theirs => tv,
        };
        if let Some(value) = chosen {
            out.insert(key.clone(), value.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan(value: Value) -> Plan {
        Plan::from_value(&value)
    }

    #[test]
    fn test_synthetic_key_normalizes_and_rounds() {
        let stop = Stop::from_value(json!({"name": "  Eiffel   Tower ", "lat": 48.8583701, "lng": 2.2944813}));
        assert_eq!(
            synthetic_key(&stop, "d1", 5),
            "eiffel tower|48.85837|2.29448|d1"
        );
    }

    #[test]
    fn test_keyed_stops_persist_synthetic_id() {
        let day = Day::new(
            "d1",
            "2025-06-01",
            vec![Stop::from_value(json!({"name": "Cafe", "lat": 1.0, "lng": 2.0}))],
        );
        let keyed = keyed_stops(Some(&day), &MergeConfig::default());
        let stop = keyed.get("cafe|1.00000|2.00000|d1").unwrap();
        assert_eq!(stop.id().as_deref(), Some("cafe|1.00000|2.00000|d1"));
    }

    #[test]
    fn test_merge_fields_takes_each_sides_change() {
        let b = json!({"arrive": "10:00", "stayMin": 60}).as_object().cloned().unwrap();
        let o = json!({"arrive": "10:30", "stayMin": 60}).as_object().cloned().unwrap();
        let t = json!({"arrive": "10:00", "stayMin": 90, "note": "x"}).as_object().cloned().unwrap();
        let merged = merge_fields(Some(&b), Some(&o), Some(&t));
        assert_eq!(merged["arrive"], "10:30");
        assert_eq!(merged["stayMin"], 90);
        assert_eq!(merged["note"], "x");
    }

    #[test]
    fn test_added_stops_from_both_sides_are_unioned() {
        let base = plan(json!({"days": [{"id": "d1", "stops": [{"id": "a"}]}]}));
        let ours = plan(json!({"days": [{"id": "d1", "stops": [{"id": "a"}, {"id": "b"}]}]}));
        let theirs = plan(json!({"days": [{"id": "d1", "stops": [{"id": "a"}, {"id": "c"}]}]}));
        let out = reconcile(&base, &ours, &theirs, &MergeConfig::default());
        assert!(out.conflicts.is_empty());
        let ids: Vec<_> = out.days[0].stops.iter().map(|s| s.identity()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_both_retimed_differently_conflicts() {
        let base = plan(json!({"days": [{"id": "d1", "stops": [{"id": "a", "arrive": "10:00", "depart": "11:00"}]}]}));
        let ours = plan(json!({"days": [{"id": "d1", "stops": [{"id": "a", "arrive": "10:30", "depart": "11:00"}]}]}));
        let theirs = plan(json!({"days": [{"id": "d1", "stops": [{"id": "a", "arrive": "09:30", "depart": "11:00"}]}]}));
        let out = reconcile(&base, &ours, &theirs, &MergeConfig::default());
        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(out.conflicts[0].kind, ConflictKind::PlanStopTime);
        // Default keeps base timing.
        assert_eq!(out.days[0].stops[0].get("arrive"), Some(&json!("10:00")));
    }

    #[test]
    fn test_day_deleted_on_one_side_unchanged_on_other_is_dropped() {
        let base = plan(json!({"days": [{"id": "d1", "stops": [{"id": "a"}]}, {"id": "d2", "stops": [{"id": "b"}]}]}));
        let ours = plan(json!({"days": [{"id": "d1", "stops": [{"id": "a"}]}]}));
        let theirs = plan(json!({"days": [{"id": "d1", "stops": [{"id": "a", "stayMin": 5}]}, {"id": "d2", "stops": [{"id": "b"}]}]}));
        let out = reconcile(&base, &ours, &theirs, &MergeConfig::default());
        assert!(out.conflicts.is_empty());
        assert_eq!(out.days.len(), 1);
        assert_eq!(out.days[0].stops[0].get("stayMin"), Some(&json!(5)));
    }

    #[test]
    fn test_same_stop_added_on_both_sides_with_different_times() {
        let base = plan(json!({"days": [{"id": "d1", "stops": [{"id": "a"}]}]}));
        let ours = plan(json!({"days": [{"id": "d1", "stops": [
            {"id": "a"},
            {"name": "Sainte  Chapelle", "lat": 48.85541, "lng": 2.34501, "arrive": "14:00", "stayMin": 45}
        ]}]}));
        let theirs = plan(json!({"days": [{"id": "d1", "stops": [
            {"id": "a"},
            {"name": "sainte chapelle", "lat": 48.85539, "lng": 2.34499, "arrive": "15:00", "note": "tickets"}
        ]}]}));
        let out = reconcile(&base, &ours, &theirs, &MergeConfig::default());

        assert_eq!(out.conflicts.len(), 1);
        let conflict = &out.conflicts[0];
        assert_eq!(conflict.kind, ConflictKind::PlanStopTime);
        assert!(conflict.base.is_none());
        let key = conflict.location.stop_id.clone().unwrap();
        assert!(key.starts_with("sainte chapelle|"));

        // One stop, ours winning the shared fields, theirs' extras kept.
        let stops = &out.days[0].stops;
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[1].id(), Some(key));
        assert_eq!(stops[1].get("arrive"), Some(&json!("14:00")));
        assert_eq!(stops[1].get("stayMin"), Some(&json!(45)));
        assert_eq!(stops[1].get("note"), Some(&json!("tickets")));
    }
}
