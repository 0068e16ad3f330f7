//! Heuristic "significant change" classifier.
//!
//! Every commit is scored against its first parent. The result is advisory
//! only: it feeds history views and never blocks a commit.

use tracing::debug;

use crate::config::ClassifierConfig;
use crate::models::KeyChange;
use crate::snapshot::Snapshot;

/// Stateless scorer comparing a snapshot to its baseline.
pub struct ChangeClassifier;

impl ChangeClassifier {
    /// Score `next` against `base`.
    ///
    /// `score = added + removed + 2*|dayDelta| + (2 if pct >= threshold)`.
    /// Stops are matched by plan fingerprint (`date::identity`).
    pub fn classify(base: &Snapshot, next: &Snapshot, config: &ClassifierConfig) -> KeyChange {
        let before = base.plan.fingerprint();
        let after = next.plan.fingerprint();
        let added = after.difference(&before).count();
        let removed = before.difference(&after).count();
        let churn = added + removed;

        let day_delta = next.plan.days.len().abs_diff(base.plan.days.len());

        let base_count = base.plan.stop_count();
        let next_count = next.plan.stop_count();
        let pct_change = if base_count == 0 {
            if next_count > 0 {
                100.0
            } else {
                0.0
            }
        } else {
            next_count.abs_diff(base_count) as f64 / base_count as f64 * 100.0
        };
        let churn_fired = churn >= config.stop_churn_threshold;
        let days_fired = day_delta >= config.day_delta_threshold;
        let pct_fired = pct_change >= config.stop_count_pct_threshold;

        let score = churn as i64 + 2 * day_delta as i64 + if pct_fired { 2 } else { 0 };
        let auto_flag = churn_fired || days_fired || pct_fired;

        let mut reasons = Vec::new();
        if churn_fired {
            reasons.push(format!("Stops changed: +{added} / -{removed}"));
        }
        if days_fired {
            let sign = if next.plan.days.len() >= base.plan.days.len() { '+' } else { '-' };
            reasons.push(format!("Days changed: {sign}{day_delta}"));
        }
        if pct_fired {
            reasons.push(format!("Stop count changed by {pct_change:.0}%"));
        }

        debug!(added, removed, day_delta, pct_change, score, auto_flag, "classified change");

        KeyChange {
            score,
            auto_flag,
            manual_flag: false,
            reason: (!reasons.is_empty()).then(|| reasons.join("; ")),
        }
    }
}
