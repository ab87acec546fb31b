//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The SQLite
//! `user_version` pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "content snapshots",
        r#"
        CREATE TABLE IF NOT EXISTS content_snapshots (
            job_id          TEXT    NOT NULL,
            pass_number     INTEGER NOT NULL,
            phase           TEXT    NOT NULL CHECK (phase IN ('before', 'after')),
            content_hash    TEXT    NOT NULL,
            rule_statuses   TEXT    NOT NULL,
            created_at      TEXT    NOT NULL,
            PRIMARY KEY (job_id, pass_number, phase)
        );
        "#,
    ),
    (
        2,
        "pass log",
        r#"
        CREATE TABLE IF NOT EXISTS pass_log (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id          TEXT    NOT NULL,
            pass_number     INTEGER NOT NULL,
            rules_fixed     TEXT    NOT NULL,
            rules_regressed TEXT    NOT NULL,
            rules_unchanged TEXT    NOT NULL,
            net_change      INTEGER NOT NULL,
            recommendation  TEXT    NOT NULL CHECK (recommendation IN ('accept', 'revert')),
            was_reverted    INTEGER NOT NULL DEFAULT 0,
            revert_reason   TEXT,
            recorded_at     TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_pass_log_job ON pass_log (job_id, pass_number);
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
