//! Compliance snapshot capture and storage.
//!
//! The snapshot subsystem is responsible for:
//! 1. **Hashing**: a deterministic fixed-width digest of content for
//!    integrity comparison.
//! 2. **Status maps**: collapsing a violation list into per-rule failing
//!    status.
//! 3. **Storage**: the [`SnapshotStore`] trait, keyed by
//!    `(job_id, pass_number, phase)`, with in-memory and SQLite backends.

pub mod memory;
pub mod sqlite;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::StoreError;
use crate::models::{ContentSnapshot, Phase, RuleStatus, SnapshotKey, SnapshotPair, StatusMap, Violation};

pub use memory::MemorySnapshotStore;
pub use sqlite::SqliteSnapshotStore;

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// Hex-encoded SHA-256 digest of `content`.
///
/// Always 64 lowercase hex characters; stable across processes.
pub fn hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Group violations by rule id into a map of failing rules.
///
/// Each entry takes the worst severity among its violations and counts them.
pub fn build_status_map(violations: &[Violation]) -> StatusMap {
    let mut map = StatusMap::new();
    for violation in violations {
        map.entry(violation.rule_id.clone())
            .and_modify(|status: &mut RuleStatus| {
                status.violation_count += 1;
                status.severity = status.severity.max(violation.severity);
            })
            .or_insert(RuleStatus {
                passed: false,
                severity: violation.severity,
                violation_count: 1,
            });
    }
    map
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Key-value storage for compliance snapshots.
///
/// Backends implement the primitives [`put`](Self::put), [`get`](Self::get)
/// and [`reset`](Self::reset). [`create`](Self::create) and
/// [`get_pair`](Self::get_pair) are shared so every backend builds records
/// the same way.
///
/// Writes are last-write-wins: putting a snapshot under an existing key
/// replaces it. Re-running a pass number overwrites its earlier snapshots;
/// the tracker removes a stale "after" side before executing so a failed
/// retry never leaves a mismatched pair behind.
pub trait SnapshotStore: Send + Sync {
    /// Store `snapshot` under its key, replacing any previous record.
    fn put(&self, snapshot: ContentSnapshot) -> Result<(), StoreError>;

    /// Fetch the current snapshot for `key`, if one exists.
    fn get(&self, key: &SnapshotKey) -> Result<Option<ContentSnapshot>, StoreError>;

    /// Remove the snapshot stored under `key`. Returns whether one existed.
    fn remove(&self, key: &SnapshotKey) -> Result<bool, StoreError>;

    /// Remove every stored snapshot.
    fn reset(&self) -> Result<(), StoreError>;

    /// Build, store and return a snapshot for `content` at a pass boundary.
    fn create(
        &self,
        job_id: &str,
        pass_number: u32,
        phase: Phase,
        content: &str,
        violations: &[Violation],
    ) -> Result<ContentSnapshot, StoreError> {
        let snapshot = ContentSnapshot {
            job_id: job_id.to_string(),
            pass_number,
            phase,
            content_hash: hash(content),
            rule_statuses: build_status_map(violations),
            created_at: Utc::now(),
        };
        debug!(
            job_id,
            pass_number,
            %phase,
            failing_rules = snapshot.rule_statuses.len(),
            hash = &snapshot.content_hash[..12],
            "creating snapshot"
        );
        self.put(snapshot.clone())?;
        Ok(snapshot)
    }

    /// Fetch both sides of a pass. Either side may be missing.
    fn get_pair(&self, job_id: &str, pass_number: u32) -> Result<SnapshotPair, StoreError> {
        Ok(SnapshotPair {
            before: self.get(&SnapshotKey::new(job_id, pass_number, Phase::Before))?,
            after: self.get(&SnapshotKey::new(job_id, pass_number, Phase::After))?,
        })
    }
}
