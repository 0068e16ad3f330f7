//! TOML-based configuration system for TripVCS.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration. The merge and classifier sections expose the
//! thresholds used by [`ThreeWayMerger`](crate::conflict::ThreeWayMerger)
//! and [`ChangeClassifier`](crate::classify::ChangeClassifier).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Persistence settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Three-way merge settings.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Significant-change classifier settings.
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Where commits, branches and repos are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("tripvcs.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Structural merge tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeConfig {
    /// Plans whose stop fingerprints have a Jaccard similarity below this
    /// value are not reconciled stop by stop; a single whole-plan conflict
    /// is raised instead.
    #[serde(default = "default_whole_plan_threshold")]
    pub whole_plan_threshold: f64,

    /// Decimal places kept from lat/lng when building synthetic stop keys.
    #[serde(default = "default_coordinate_precision")]
    pub coordinate_precision: u32,
}

fn default_whole_plan_threshold() -> f64 {
    0.4
}
fn default_coordinate_precision() -> u32 {
    5
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            whole_plan_threshold: default_whole_plan_threshold(),
            coordinate_precision: default_coordinate_precision(),
        }
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Trigger thresholds for flagging a commit as a significant change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifierConfig {
    /// Added + removed stops at or above this count trigger a flag.
    #[serde(default = "default_stop_churn")]
    pub stop_churn_threshold: usize,

    /// Absolute change in day count at or above this value triggers a flag.
    #[serde(default = "default_day_delta")]
    pub day_delta_threshold: usize,

    /// Percentage change in total stop count at or above this value
    /// triggers a flag.
    #[serde(default = "default_stop_pct")]
    pub stop_count_pct_threshold: f64,
}

fn default_stop_churn() -> usize {
    3
}
fn default_day_delta() -> usize {
    1
}
fn default_stop_pct() -> f64 {
    30.0
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            stop_churn_threshold: default_stop_churn(),
            day_delta_threshold: default_day_delta(),
            stop_count_pct_threshold: default_stop_pct(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all values are within range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.merge.whole_plan_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidValue {
                field: "merge.whole_plan_threshold".into(),
                detail: format!("must be within 0.0..=1.0, got {threshold}"),
            });
        }
        if self.merge.coordinate_precision > 12 {
            return Err(ConfigError::InvalidValue {
                field: "merge.coordinate_precision".into(),
                detail: "at most 12 decimal places are supported".into(),
            });
        }
        if self.classifier.stop_count_pct_threshold < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "classifier.stop_count_pct_threshold".into(),
                detail: "percentage must not be negative".into(),
            });
        }
        if self.store.database_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "store.database_path".into(),
                detail: "database path must not be empty".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the default configuration as TOML, for `tripvcs init`.
    pub fn default_toml() -> Result<String, ConfigError> {
        toml::to_string_pretty(&Self::default()).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[store]
database_path = "/tmp/tripvcs/trips.db"

[merge]
whole_plan_threshold = 0.5
coordinate_precision = 4

[classifier]
stop_churn_threshold = 5
day_delta_threshold = 2
stop_count_pct_threshold = 50.0

[log]
level = "debug"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.store.database_path, PathBuf::from("/tmp/tripvcs/trips.db"));
        assert_eq!(config.merge.whole_plan_threshold, 0.5);
        assert_eq!(config.merge.coordinate_precision, 4);
        assert_eq!(config.classifier.stop_churn_threshold, 5);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_and_validate(&path).expect("load failed");
        assert_eq!(config.classifier.day_delta_threshold, 2);
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/tripvcs.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_threshold_out_of_range() {
        let mut config = AppConfig::default();
        config.merge.whole_plan_threshold = 1.5;
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "merge.whole_plan_threshold"
        ));
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.merge.whole_plan_threshold, 0.4);
        assert_eq!(config.merge.coordinate_precision, 5);
        assert_eq!(config.classifier.stop_churn_threshold, 3);
        assert_eq!(config.classifier.day_delta_threshold, 1);
        assert_eq!(config.classifier.stop_count_pct_threshold, 30.0);
        assert_eq!(config.log.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_toml_round_trips() {
        let rendered = AppConfig::default_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.merge, MergeConfig::default());
        assert_eq!(parsed.classifier, ClassifierConfig::default());
    }
}
