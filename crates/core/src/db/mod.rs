//! SQLite persistence for snapshots and the pass log.
//!
//! [`Database`] owns one connection; [`schema`] brings it to the current
//! version and [`queries`] holds the typed reads and writes used by
//! [`SqliteSnapshotStore`](crate::snapshot::SqliteSnapshotStore) and the CLI.

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

pub use queries::PassLogEntry;

/// Shared handle to the passgate database.
///
/// Every query locks the single connection, so one handle behind an `Arc`
/// serves the snapshot store and the pass log together.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database file at `path`, creating it and any missing parent
    /// directories. Migrations are not run; see [`initialize`](Self::initialize).
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening snapshot database");

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let conn = Connection::open(path)?;
        // Concurrent CLI invocations read while a track run writes.
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;

        debug!(path = %path.display(), "snapshot database ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private, process-local database; contents vanish when dropped.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    /// Apply any pending migrations.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        schema::run_migrations(&self.conn())?;
        debug!("snapshot database schema current");
        Ok(())
    }

    /// [`new`](Self::new) followed by [`initialize`](Self::initialize).
    pub fn open_initialized<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let db = Self::new(path)?;
        db.initialize()?;
        Ok(db)
    }

    /// Lock the connection. A poisoned lock is taken over; every query is a
    /// single statement so a panicking holder cannot leave partial writes.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("snapshot database lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
