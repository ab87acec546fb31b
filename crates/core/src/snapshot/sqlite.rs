//! Durable snapshot store on top of the SQLite [`Database`].

use std::sync::Arc;

use tracing::{debug, info};

use super::SnapshotStore;
use crate::db::queries::{parse_datetime, SnapshotRow};
use crate::db::Database;
use crate::errors::StoreError;
use crate::models::{ContentSnapshot, Phase, SnapshotKey, StatusMap};

/// [`SnapshotStore`] persisting to the `content_snapshots` table.
///
/// Rows are keyed by `(job_id, pass_number, phase)` and written with
/// `INSERT OR REPLACE`, which gives the same last-write-wins behaviour as
/// the in-memory store.
#[derive(Clone)]
pub struct SqliteSnapshotStore {
    db: Arc<Database>,
}

impl SqliteSnapshotStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// The underlying database handle.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Every snapshot of a job, ordered by pass then phase.
    pub fn list_job(&self, job_id: &str) -> Result<Vec<ContentSnapshot>, StoreError> {
        self.db
            .list_snapshot_rows(job_id)?
            .into_iter()
            .map(decode_row)
            .collect()
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn put(&self, snapshot: ContentSnapshot) -> Result<(), StoreError> {
        self.db.upsert_snapshot(&snapshot)?;
        Ok(())
    }

    fn get(&self, key: &SnapshotKey) -> Result<Option<ContentSnapshot>, StoreError> {
        self.db
            .get_snapshot_row(&key.job_id, key.pass_number, key.phase.as_str())?
            .map(decode_row)
            .transpose()
    }

    fn remove(&self, key: &SnapshotKey) -> Result<bool, StoreError> {
        Ok(self
            .db
            .delete_snapshot(&key.job_id, key.pass_number, key.phase.as_str())?)
    }

    fn reset(&self) -> Result<(), StoreError> {
        let removed = self.db.delete_all_snapshots()?;
        info!(removed, "reset sqlite snapshot store");
        Ok(())
    }
}

fn decode_row(row: SnapshotRow) -> Result<ContentSnapshot, StoreError> {
    let phase = Phase::from_str_val(&row.phase).ok_or_else(|| StoreError::Corrupt {
        key: format!("{}#{}/{}", row.job_id, row.pass_number, row.phase),
        detail: format!("unknown phase '{}'", row.phase),
    })?;
    let key = SnapshotKey::new(row.job_id, row.pass_number, phase);
    let rule_statuses: StatusMap =
        serde_json::from_str(&row.rule_statuses).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            detail: e.to_string(),
        })?;
    debug!(%key, "decoded snapshot row");

    Ok(ContentSnapshot {
        job_id: key.job_id,
        pass_number: key.pass_number,
        phase: key.phase,
        content_hash: row.content_hash,
        rule_statuses,
        created_at: parse_datetime(&row.created_at),
    })
}
