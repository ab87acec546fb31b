//! Typed query helpers for every table in the passgate database.

use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{ContentSnapshot, PassDelta, PassExecutionResult, Recommendation};

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A raw row from the `content_snapshots` table.
///
/// `rule_statuses` is still JSON text here; decoding happens in
/// [`SqliteSnapshotStore`](crate::snapshot::SqliteSnapshotStore) so a bad
/// payload can be reported against its key.
#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub job_id: String,
    pub pass_number: u32,
    pub phase: String,
    pub content_hash: String,
    pub rule_statuses: String,
    pub created_at: String,
}

/// A decoded row from the `pass_log` table.
#[derive(Debug, Clone)]
pub struct PassLogEntry {
    pub id: i64,
    pub job_id: String,
    pub delta: PassDelta,
    pub was_reverted: bool,
    pub revert_reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- content_snapshots --------------------------------------------------

    /// Insert or replace the snapshot stored under its composite key.
    pub fn upsert_snapshot(&self, snapshot: &ContentSnapshot) -> Result<(), DatabaseError> {
        let statuses = serde_json::to_string(&snapshot.rule_statuses)?;
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO content_snapshots
             (job_id, pass_number, phase, content_hash, rule_statuses, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                snapshot.job_id,
                snapshot.pass_number,
                snapshot.phase.as_str(),
                snapshot.content_hash,
                statuses,
                snapshot.created_at.to_rfc3339(),
            ],
        )?;
        debug!(
            job_id = %snapshot.job_id,
            pass_number = snapshot.pass_number,
            phase = %snapshot.phase,
            "upserted snapshot"
        );
        Ok(())
    }

    /// Fetch one snapshot row by composite key.
    pub fn get_snapshot_row(
        &self,
        job_id: &str,
        pass_number: u32,
        phase: &str,
    ) -> Result<Option<SnapshotRow>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT job_id, pass_number, phase, content_hash, rule_statuses, created_at
             FROM content_snapshots WHERE job_id = ?1 AND pass_number = ?2 AND phase = ?3",
        )?;
        let mut rows = stmt.query_map(params![job_id, pass_number, phase], map_snapshot_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// All snapshot rows for a job, ordered by pass then phase.
    pub fn list_snapshot_rows(&self, job_id: &str) -> Result<Vec<SnapshotRow>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT job_id, pass_number, phase, content_hash, rule_statuses, created_at
             FROM content_snapshots WHERE job_id = ?1
             ORDER BY pass_number ASC, CASE phase WHEN 'before' THEN 0 ELSE 1 END",
        )?;
        let rows = stmt
            .query_map(params![job_id], map_snapshot_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete the snapshot stored under one composite key. Returns whether a
    /// row was removed.
    pub fn delete_snapshot(
        &self,
        job_id: &str,
        pass_number: u32,
        phase: &str,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let removed = conn.execute(
            "DELETE FROM content_snapshots WHERE job_id = ?1 AND pass_number = ?2 AND phase = ?3",
            params![job_id, pass_number, phase],
        )?;
        debug!(job_id, pass_number, phase, removed, "deleted snapshot");
        Ok(removed > 0)
    }

    /// Delete every snapshot row. Returns the number of rows removed.
    pub fn delete_all_snapshots(&self) -> Result<usize, DatabaseError> {
        let conn = self.conn();
        let removed = conn.execute("DELETE FROM content_snapshots", [])?;
        debug!(removed, "deleted all snapshots");
        Ok(removed)
    }

    // -- pass_log -----------------------------------------------------------

    /// Record the outcome of a completed pass.
    pub fn insert_pass_log(
        &self,
        job_id: &str,
        result: &PassExecutionResult,
    ) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let delta = &result.delta;
        let fixed = serde_json::to_string(&delta.rules_fixed)?;
        let regressed = serde_json::to_string(&delta.rules_regressed)?;
        let unchanged = serde_json::to_string(&delta.rules_unchanged)?;

        let conn = self.conn();
        conn.execute(
            "INSERT INTO pass_log (job_id, pass_number, rules_fixed, rules_regressed,
             rules_unchanged, net_change, recommendation, was_reverted, revert_reason, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                job_id,
                delta.pass_number,
                fixed,
                regressed,
                unchanged,
                delta.net_change,
                delta.recommendation.to_string(),
                result.was_reverted,
                result.revert_reason,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, job_id, pass_number = delta.pass_number, "inserted pass_log entry");
        Ok(id)
    }

    /// The newest `limit` pass-log entries for one job (or all jobs),
    /// returned oldest first.
    pub fn list_pass_log(
        &self,
        job_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<PassLogEntry>, DatabaseError> {
        type RawRow = (
            i64,
            String,
            u32,
            String,
            String,
            String,
            i64,
            String,
            bool,
            Option<String>,
            String,
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, pass_number, rules_fixed, rules_regressed, rules_unchanged,
             net_change, recommendation, was_reverted, revert_reason, recorded_at
             FROM pass_log WHERE (?1 IS NULL OR job_id = ?1)
             ORDER BY id DESC LIMIT ?2",
        )?;
        let raw: Vec<RawRow> = stmt
            .query_map(params![job_id, limit], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                    row.get(10)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .rev()
            .map(
                |(id, job_id, pass_number, fixed, regressed, unchanged, net_change, rec, was_reverted, revert_reason, recorded_at)|
                 -> Result<PassLogEntry, DatabaseError> {
                    let recommendation = Recommendation::from_str_val(&rec).ok_or_else(|| {
                        DatabaseError::CorruptRecord {
                            table: "pass_log".into(),
                            id: id.to_string(),
                            detail: format!("unknown recommendation '{rec}'"),
                        }
                    })?;
                    Ok(PassLogEntry {
                        id,
                        job_id,
                        delta: PassDelta {
                            pass_number,
                            rules_fixed: serde_json::from_str(&fixed)?,
                            rules_regressed: serde_json::from_str(&regressed)?,
                            rules_unchanged: serde_json::from_str(&unchanged)?,
                            net_change,
                            recommendation,
                        },
                        was_reverted,
                        revert_reason,
                        recorded_at: parse_datetime(&recorded_at),
                    })
                },
            )
            .collect()
    }

    /// Number of pass-log entries for a job.
    pub fn count_pass_log(&self, job_id: &str) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pass_log WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn map_snapshot_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SnapshotRow> {
    Ok(SnapshotRow {
        job_id: row.get(0)?,
        pass_number: row.get(1)?,
        phase: row.get(2)?,
        content_hash: row.get(3)?,
        rule_statuses: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Parse a datetime string, returning Utc::now() as a fallback if parsing fails.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
