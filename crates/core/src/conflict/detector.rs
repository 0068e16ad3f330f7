//! Conflict taxonomy and the three-way change classification shared by the
//! file, plan and stop merge tiers.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Categorisation of a conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    /// Both sides changed the same file differently.
    File,
    /// The plans diverged too far to reconcile stop by stop.
    PlanWhole,
    /// Both sides retimed the same stop differently.
    PlanStopTime,
    /// One side deleted a stop the other side modified.
    PlanStopDelete,
}

impl ConflictKind {
    /// Parse a wire name. Unknown names yield `None`.
    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Self::File),
            "plan-whole" => Some(Self::PlanWhole),
            "plan-stop-time" => Some(Self::PlanStopTime),
            "plan-stop-delete" => Some(Self::PlanStopDelete),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::PlanWhole => write!(f, "plan-whole"),
            Self::PlanStopTime => write!(f, "plan-stop-time"),
            Self::PlanStopDelete => write!(f, "plan-stop-delete"),
        }
    }
}

/// Where in the snapshot a conflict sits.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConflictLocation {
    /// File path, for `file` conflicts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Day id, for stop conflicts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_id: Option<String>,
    /// Stop key (explicit or synthetic id), for stop conflicts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_id: Option<String>,
}

impl ConflictLocation {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn plan() -> Self {
        Self::default()
    }

    pub fn stop(day_id: impl Into<String>, stop_id: impl Into<String>) -> Self {
        Self {
            path: None,
            day_id: Some(day_id.into()),
            stop_id: Some(stop_id.into()),
        }
    }
}

impl std::fmt::Display for ConflictLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.path, &self.day_id, &self.stop_id) {
            (Some(path), _, _) => write!(f, "{path}"),
            (None, Some(day), Some(stop)) => write!(f, "plan/{day}/{stop}"),
            _ => write!(f, "plan"),
        }
    }
}

/// A single unresolved divergence produced by the merger.
///
/// `base`, `ours` and `theirs` carry the competing values (file text, plan
/// document or stop object); `None` means absent on that side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conflict {
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    pub location: ConflictLocation,
    pub base: Option<Value>,
    pub ours: Option<Value>,
    pub theirs: Option<Value>,
}

impl Conflict {
    pub fn new(
        kind: ConflictKind,
        location: ConflictLocation,
        base: Option<Value>,
        ours: Option<Value>,
        theirs: Option<Value>,
    ) -> Self {
        Self {
            kind,
            location,
            base,
            ours,
            theirs,
        }
    }

    /// Unified diff from the ours value to the theirs value, for display.
    pub fn render_diff(&self) -> String {
        let ours = render_side(self.ours.as_ref());
        let theirs = render_side(self.theirs.as_ref());
        diffy::create_patch(&ours, &theirs).to_string()
    }
}

fn render_side(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(Value::String(text)) => ensure_trailing_newline(text.clone()),
        Some(other) => ensure_trailing_newline(
            serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        ),
    }
}

fn ensure_trailing_newline(mut text: String) -> String {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

/// Which version a user picked for a conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Ours,
    Theirs,
    Base,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ours => write!(f, "ours"),
            Self::Theirs => write!(f, "theirs"),
            Self::Base => write!(f, "base"),
        }
    }
}

/// A user decision for one conflict.
///
/// `kind` is kept as the raw wire string so that decisions of a type this
/// version does not understand can be skipped instead of rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Decision {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub location: ConflictLocation,
    pub choice: Side,
}

impl Decision {
    /// Decide `conflict` in favour of `choice`.
    pub fn for_conflict(conflict: &Conflict, choice: Side) -> Self {
        Self {
            kind: conflict.kind.to_string(),
            location: conflict.location.clone(),
            choice,
        }
    }
}

// ---------------------------------------------------------------------------
// Three-way classification
// ---------------------------------------------------------------------------

/// How one key/field/stop changed relative to the merge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pick {
    /// Neither side changed it.
    Base,
    /// Only ours changed it, or both changed it identically.
    Ours,
    /// Only theirs changed it.
    Theirs,
    /// Both sides changed it differently.
    Conflict,
}

/// Classify a value by equality against base. `None` is absence.
pub(crate) fn pick<T: PartialEq>(base: Option<&T>, ours: Option<&T>, theirs: Option<&T>) -> Pick {
    let ours_changed = ours != base;
    let theirs_changed = theirs != base;
    match (ours_changed, theirs_changed) {
        (false, false) => Pick::Base,
        (true, false) => Pick::Ours,
        (false, true) => Pick::Theirs,
        (true, true) if ours == theirs => Pick::Ours,
        (true, true) => Pick::Conflict,
    }
}

/// |A ∩ B| / |A ∪ B|. Two empty sets are identical (1.0).
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
