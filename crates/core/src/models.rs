//! Domain model types used throughout passgate.
//!
//! These types bridge the snapshot stores, the conflict detector, the pass
//! tracker, and the CLI. All of them serialize to JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Severity of a single rule violation.
///
/// Ordered so that `Info < Warning < Error`; the worst severity of a group is
/// its maximum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Parse a severity string (as stored in config or the database).
    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            "info" => Some(Self::Info),
            _ => None,
        }
    }

    /// `true` for severities whose regression always triggers a revert.
    pub fn is_critical(self) -> bool {
        self == Self::Error
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

// ---------------------------------------------------------------------------
// Violation
// ---------------------------------------------------------------------------

/// A detected rule infraction, as reported by a violation detector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Violation {
    pub rule_id: String,
    pub severity: Severity,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Byte offset of the offending text, when the detector knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl Violation {
    pub fn new(rule_id: impl Into<String>, severity: Severity) -> Self {
        Self {
            rule_id: rule_id.into(),
            severity,
            message: None,
            offset: None,
        }
    }

    pub fn error(rule_id: impl Into<String>) -> Self {
        Self::new(rule_id, Severity::Error)
    }

    pub fn warning(rule_id: impl Into<String>) -> Self {
        Self::new(rule_id, Severity::Warning)
    }

    pub fn info(rule_id: impl Into<String>) -> Self {
        Self::new(rule_id, Severity::Info)
    }
}

// ---------------------------------------------------------------------------
// Snapshot identity
// ---------------------------------------------------------------------------

/// Which side of a pass a snapshot was captured on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Before,
    After,
}

impl Phase {
    /// Parse a phase string into a `Phase`.
    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "before" => Some(Self::Before),
            "after" => Some(Self::After),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite identity of a snapshot.
///
/// A struct key rather than a joined string, so no component can collide
/// with a delimiter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotKey {
    pub job_id: String,
    pub pass_number: u32,
    pub phase: Phase,
}

impl SnapshotKey {
    pub fn new(job_id: impl Into<String>, pass_number: u32, phase: Phase) -> Self {
        Self {
            job_id: job_id.into(),
            pass_number,
            phase,
        }
    }
}

impl std::fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}/{}", self.job_id, self.pass_number, self.phase)
    }
}

// ---------------------------------------------------------------------------
// Rule status & snapshot
// ---------------------------------------------------------------------------

/// Compliance state of one failing rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleStatus {
    /// Always `false`: only failing rules are recorded.
    pub passed: bool,
    /// Worst severity among this rule's violations.
    pub severity: Severity,
    pub violation_count: usize,
}

/// Failing rules keyed by rule id. A missing id means the rule passes.
pub type StatusMap = BTreeMap<String, RuleStatus>;

/// Rule-compliance state of a content string at one pass boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentSnapshot {
    pub job_id: String,
    pub pass_number: u32,
    pub phase: Phase,
    /// Hex-encoded SHA-256 of the content at capture time.
    pub content_hash: String,
    pub rule_statuses: StatusMap,
    pub created_at: DateTime<Utc>,
}

impl ContentSnapshot {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.job_id.clone(), self.pass_number, self.phase)
    }

    /// Number of failing rules.
    pub fn failing_rule_count(&self) -> usize {
        self.rule_statuses.len()
    }

    /// `true` if `rule_id` is failing in this snapshot with `error` severity.
    pub fn is_critical(&self, rule_id: &str) -> bool {
        self.rule_statuses
            .get(rule_id)
            .map(|s| s.severity.is_critical())
            .unwrap_or(false)
    }
}

/// Both sides of a pass, each independently present or absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotPair {
    pub before: Option<ContentSnapshot>,
    pub after: Option<ContentSnapshot>,
}

impl SnapshotPair {
    pub fn is_complete(&self) -> bool {
        self.before.is_some() && self.after.is_some()
    }
}

// ---------------------------------------------------------------------------
// Pass delta & result
// ---------------------------------------------------------------------------

/// Policy outcome attached to a delta.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Accept,
    Revert,
}

impl Recommendation {
    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "accept" => Some(Self::Accept),
            "revert" => Some(Self::Revert),
            _ => None,
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Revert => write!(f, "revert"),
        }
    }
}

/// Difference between the before and after snapshots of one pass.
///
/// Classification is presence-only: a rule failing on both sides lands in
/// `rules_unchanged` even if its violation count moved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PassDelta {
    pub pass_number: u32,
    pub rules_fixed: Vec<String>,
    pub rules_regressed: Vec<String>,
    pub rules_unchanged: Vec<String>,
    pub net_change: i64,
    pub recommendation: Recommendation,
}

/// What [`PassTracker::track_pass`](crate::tracker::PassTracker::track_pass) returns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PassExecutionResult {
    pub pass_number: u32,
    /// Final content: the executor's output, or `content_before_pass` when reverted.
    pub content: String,
    pub content_before_pass: String,
    pub delta: PassDelta,
    pub was_reverted: bool,
    pub revert_reason: Option<String>,
}
