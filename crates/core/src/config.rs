//! TOML-based configuration system for passgate.
//!
//! One file describes the logging level, the tracker defaults, which snapshot
//! backend to use, and the pattern rules used for violation detection.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::models::Severity;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging and data-directory settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Pass tracker defaults.
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Snapshot backend selection.
    #[serde(default)]
    pub store: StoreConfig,

    /// Pattern rules used by the built-in violation detector.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

// ---------------------------------------------------------------------------
// General
// ---------------------------------------------------------------------------

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for persistent data (the SQLite database by default).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(".passgate")
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Defaults applied when constructing a pass tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Job identifier used when none is given on the command line.
    #[serde(default = "default_job_id")]
    pub job_id: String,

    /// Discard a pass's output when its delta calls for a revert.
    #[serde(default = "default_true")]
    pub auto_revert: bool,
}

fn default_job_id() -> String {
    "default".into()
}
fn default_true() -> bool {
    true
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            job_id: default_job_id(),
            auto_revert: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Which snapshot backend to use.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local map; snapshots vanish on exit.
    Memory,
    /// SQLite file under the data directory.
    #[default]
    Sqlite,
}

/// Snapshot storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Explicit database path. Defaults to `<data_dir>/passgate.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// One `[[rules]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Unique rule identifier.
    pub id: String,

    /// Regular expression; every match is one violation.
    pub pattern: String,

    #[serde(default = "default_severity")]
    pub severity: Severity,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub case_insensitive: bool,
}

fn default_severity() -> Severity {
    Severity::Warning
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;

        debug!(rules = config.rules.len(), "configuration parsed successfully");
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".into(),
                detail: format!(
                    "'{}' is not one of {}",
                    self.general.log_level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }
        if self.tracker.job_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tracker.job_id".into(),
                detail: "job id must not be empty".into(),
            });
        }

        let mut seen = HashSet::new();
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.id.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("rules[{i}].id"),
                    detail: "rule id must not be empty".into(),
                });
            }
            if rule.pattern.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("rules[{i}].pattern"),
                    detail: format!("rule '{}' has an empty pattern", rule.id),
                });
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("rules[{i}].id"),
                    detail: format!("duplicate rule id '{}'", rule.id),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolved path of the SQLite database.
    pub fn database_path(&self) -> PathBuf {
        self.store
            .database_path
            .clone()
            .unwrap_or_else(|| self.general.data_dir.join("passgate.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[general]
log_level = "debug"
data_dir = "/tmp/passgate"

[tracker]
job_id = "article-42"
auto_revert = false

[store]
backend = "memory"

[[rules]]
id = "banned-term"
pattern = '\bsynergy\b'
severity = "error"
message = "banned marketing term"
case_insensitive = true

[[rules]]
id = "filler"
pattern = '\b(very|really)\b'
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::from_toml_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.tracker.job_id, "article-42");
        assert!(!config.tracker.auto_revert);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].severity, Severity::Error);
        assert!(config.rules[0].case_insensitive);
        assert_eq!(config.rules[1].severity, Severity::Warning);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.tracker.job_id, "default");
        assert!(config.tracker.auto_revert);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert!(config.rules.is_empty());
        assert_eq!(config.database_path(), PathBuf::from(".passgate/passgate.db"));
    }

    #[test]
    fn test_explicit_database_path() {
        let config = AppConfig::from_toml_str(
            r#"
[store]
database_path = "/var/lib/passgate/snapshots.db"
"#,
        )
        .unwrap();
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/passgate/snapshots.db")
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passgate.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_and_validate(&path).expect("load failed");
        assert_eq!(config.general.data_dir, PathBuf::from("/tmp/passgate"));
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/passgate.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_parse_error() {
        let result = AppConfig::from_toml_str("[tracker]\nauto_revert = \"maybe\"");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut config = AppConfig::from_toml_str(sample_toml()).unwrap();
        config.general.log_level = "loud".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "general.log_level"
        ));
    }

    #[test]
    fn test_validate_rejects_empty_job_id() {
        let mut config = AppConfig::from_toml_str(sample_toml()).unwrap();
        config.tracker.job_id = "  ".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "tracker.job_id"
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_rule_ids() {
        let mut config = AppConfig::from_toml_str(sample_toml()).unwrap();
        config.rules[1].id = "banned-term".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "rules[1].id"
        ));
    }
}
