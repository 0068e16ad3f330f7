//! Itinerary snapshot document model.
//!
//! A snapshot is the full state captured by one commit: a map of text files
//! plus the itinerary plan produced by the scheduler. The core only needs a
//! handful of well-known fields (day ids/dates, stop ids/names/coordinates
//! and arrive/depart times); every other field is carried through verbatim.
//!
//! Parsing is lenient. Missing or wrong-shaped fields become empty values
//! rather than errors, so a damaged document never blocks a merge or commit.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stop fields holding the scheduled timing.
pub const TIME_FIELDS: [&str; 2] = ["arrive", "depart"];

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// The complete document stored by a commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub struct Snapshot {
    /// Text files keyed by path. Absent keys are deleted files.
    pub files: BTreeMap<String, String>,
    /// The itinerary plan.
    pub plan: Plan,
}

impl Snapshot {
    pub fn new(files: BTreeMap<String, String>, plan: Plan) -> Self {
        Self { files, plan }
    }

    /// Parse a snapshot from JSON text. Only a syntactically invalid
    /// document is an error; shape problems degrade to empty values.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from(value))
    }
}

impl From<Value> for Snapshot {
    fn from(value: Value) -> Self {
        let files = value
            .get("files")
            .and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter_map(|(path, text)| {
                        text.as_str().map(|t| (path.clone(), t.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let plan = value.get("plan").map(Plan::from_value).unwrap_or_default();

        Self { files, plan }
    }
}

impl From<Snapshot> for Value {
    fn from(snapshot: Snapshot) -> Self {
        let files: Map<String, Value> = snapshot
            .files
            .into_iter()
            .map(|(path, text)| (path, Value::String(text)))
            .collect();
        let mut root = Map::new();
        root.insert("files".into(), Value::Object(files));
        root.insert("plan".into(), snapshot.plan.into_value());
        Value::Object(root)
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// The itinerary plan: an ordered list of days plus any other top-level
/// keys (transport mode, scheduler settings, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub days: Vec<Day>,
    /// Top-level keys other than `days`.
    pub extra: Map<String, Value>,
}

impl Plan {
    pub fn new(days: Vec<Day>, extra: Map<String, Value>) -> Self {
        Self { days, extra }
    }

    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        let days = obj
            .get("days")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .enumerate()
                    .map(|(index, day)| Day::from_value(day, index))
                    .collect()
            })
            .unwrap_or_default();
        let extra = obj
            .iter()
            .filter(|(key, _)| key.as_str() != "days")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self { days, extra }
    }

    pub fn into_value(self) -> Value {
        let mut obj = self.extra;
        obj.insert(
            "days".into(),
            Value::Array(self.days.into_iter().map(Day::into_value).collect()),
        );
        Value::Object(obj)
    }

    pub fn to_value(&self) -> Value {
        self.clone().into_value()
    }

    pub fn day(&self, id: &str) -> Option<&Day> {
        self.days.iter().find(|d| d.id == id)
    }

    pub fn stop_count(&self) -> usize {
        self.days.iter().map(|d| d.stops.len()).sum()
    }

    /// The set of `date::stopIdentity` strings describing which stops exist,
    /// ignoring timing and order.
    pub fn fingerprint(&self) -> BTreeSet<String> {
        self.days
            .iter()
            .flat_map(|day| {
                let label = day.label();
                day.stops
                    .iter()
                    .map(move |stop| format!("{}::{}", label, stop.identity()))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Day
// ---------------------------------------------------------------------------

/// One day of the itinerary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Day {
    /// Stable identity. Falls back to the date, then to `day-<index>`.
    pub id: String,
    pub date: String,
    pub stops: Vec<Stop>,
    /// Day fields other than `id`, `date` and `stops`.
    pub extra: Map<String, Value>,
}

impl Day {
    pub fn new(id: impl Into<String>, date: impl Into<String>, stops: Vec<Stop>) -> Self {
        Self {
            id: id.into(),
            date: date.into(),
            stops,
            extra: Map::new(),
        }
    }

    fn from_value(value: &Value, index: usize) -> Self {
        let empty = Map::new();
        let obj = value.as_object().unwrap_or(&empty);
        let date = obj
            .get("date")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let id = obj
            .get("id")
            .and_then(scalar_to_string)
            .unwrap_or_else(|| {
                if date.is_empty() {
                    format!("day-{index}")
                } else {
                    date.clone()
                }
            });
        let stops = obj
            .get("stops")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|s| s.as_object().cloned().map(Stop::from_fields))
                    .collect()
            })
            .unwrap_or_default();
        let extra = obj
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "id" | "date" | "stops"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            id,
            date,
            stops,
            extra,
        }
    }

    fn into_value(self) -> Value {
        let mut obj = self.extra;
        obj.insert("id".into(), Value::String(self.id));
        if !self.date.is_empty() {
            obj.insert("date".into(), Value::String(self.date));
        }
        obj.insert(
            "stops".into(),
            Value::Array(self.stops.into_iter().map(|s| Value::Object(s.into_fields())).collect()),
        );
        Value::Object(obj)
    }

    /// The date used in fingerprints; the id stands in for undated days.
    pub fn label(&self) -> &str {
        if self.date.is_empty() {
            &self.id
        } else {
            &self.date
        }
    }

    /// Return a copy of this day with a different stop list.
    pub fn with_stops(&self, stops: Vec<Stop>) -> Self {
        Self {
            id: self.id.clone(),
            date: self.date.clone(),
            stops,
            extra: self.extra.clone(),
        }
    }

    /// Day fields other than `stops`, as one map. Used for field-level merging.
    pub(crate) fn header(&self) -> Map<String, Value> {
        let mut obj = self.extra.clone();
        if !self.date.is_empty() {
            obj.insert("date".into(), Value::String(self.date.clone()));
        }
        obj
    }

    pub(crate) fn from_header(id: &str, header: Map<String, Value>, stops: Vec<Stop>) -> Self {
        let mut extra = header;
        let date = match extra.remove("date") {
            Some(Value::String(date)) => date,
            _ => String::new(),
        };
        Self {
            id: id.to_string(),
            date,
            stops,
            extra,
        }
    }
}

// ---------------------------------------------------------------------------
// Stop
// ---------------------------------------------------------------------------

/// A single itinerary stop, kept as its full field map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stop {
    fields: Map<String, Value>,
}

impl Stop {
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Build a stop from a JSON object; anything else yields an empty stop.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self { fields },
            _ => Self::default(),
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Return a copy with `key` set to `value`.
    pub fn with_field(&self, key: &str, value: Value) -> Self {
        let mut fields = self.fields.clone();
        fields.insert(key.to_string(), value);
        Self { fields }
    }

    /// Return a copy with `key` removed.
    pub fn without_field(&self, key: &str) -> Self {
        let mut fields = self.fields.clone();
        fields.remove(key);
        Self { fields }
    }

    pub fn id(&self) -> Option<String> {
        self.fields.get("id").and_then(scalar_to_string)
    }

    pub fn name(&self) -> Option<&str> {
        self.fields.get("name").and_then(Value::as_str)
    }

    pub fn lat(&self) -> Option<f64> {
        self.fields.get("lat").and_then(Value::as_f64)
    }

    pub fn lng(&self) -> Option<f64> {
        self.fields.get("lng").and_then(Value::as_f64)
    }

    /// Identity used in fingerprints: the explicit id, else the name.
    pub fn identity(&self) -> String {
        self.id()
            .or_else(|| self.name().map(str::to_string))
            .unwrap_or_default()
    }

    /// The `(arrive, depart)` pair, compared as raw JSON values.
    pub fn timing(&self) -> (Option<&Value>, Option<&Value>) {
        (self.fields.get(TIME_FIELDS[0]), self.fields.get(TIME_FIELDS[1]))
    }
}

/// Accept string or numeric ids.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
