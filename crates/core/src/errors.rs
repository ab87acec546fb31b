//! Error types for the passgate core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

use crate::models::Phase;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Tracker errors
// ---------------------------------------------------------------------------

/// Errors raised out of [`PassTracker::track_pass`](crate::tracker::PassTracker::track_pass).
///
/// Any of these means the pass did not complete and the caller's working
/// content must stay at the pre-pass value.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The pass executor failed. `source` is the executor's own error.
    #[error("pass {pass_number} execution failed: {source}")]
    Execution {
        pass_number: u32,
        #[source]
        source: anyhow::Error,
    },

    /// The violation detector failed while inspecting one side of the pass.
    #[error("violation detection failed for pass {pass_number} ({phase}): {source}")]
    Detection {
        pass_number: u32,
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },

    /// Snapshots written by this very call could not be read back.
    #[error("snapshot integrity failure for job '{job_id}' pass {pass_number}: missing {missing}")]
    Integrity {
        job_id: String,
        pass_number: u32,
        missing: String,
    },

    /// Another `track_pass` call for the same pass is still running.
    #[error("pass {pass_number} of job '{job_id}' is already being tracked")]
    PassInFlight { job_id: String, pass_number: u32 },

    /// The snapshot backend failed.
    #[error("tracker store error: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Snapshot store errors
// ---------------------------------------------------------------------------

/// Errors from a [`SnapshotStore`](crate::snapshot::SnapshotStore) backend.
///
/// Absence of a snapshot is never an error; lookups return `Option`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure (durable backends only).
    #[error("snapshot store database error: {0}")]
    Database(#[from] DatabaseError),

    /// A persisted snapshot could not be decoded.
    #[error("corrupt snapshot record for {key}: {detail}")]
    Corrupt { key: String, detail: String },
}

// ---------------------------------------------------------------------------
// Rule errors
// ---------------------------------------------------------------------------

/// Errors from building a pattern rule set.
#[derive(Debug, Error)]
pub enum RuleError {
    /// The rule's regular expression failed to compile.
    #[error("invalid pattern for rule '{rule_id}': {detail}")]
    InvalidPattern { rule_id: String, detail: String },

    /// Two rules share the same identifier.
    #[error("duplicate rule id '{0}'")]
    DuplicateId(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A stored row holds a value outside its column's domain.
    #[error("corrupt {table} record {id}: {detail}")]
    CorruptRecord {
        table: String,
        id: String,
        detail: String,
    },

    /// A stored JSON column could not be encoded or decoded.
    #[error("database payload error: {0}")]
    PayloadError(#[from] serde_json::Error),

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
