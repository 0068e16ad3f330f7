//! The commit store's SQLite file.
//!
//! One [`Database`] holds every repo of a TripVCS store: commits with their
//! snapshots and ordered parents, branch heads, the `kv_state` side table
//! and the audit log. Typed queries live in [`queries`], migrations in
//! [`schema`].

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::errors::DatabaseError;

/// How long a writer waits on a locked store before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Shared handle on a TripVCS store.
///
/// Branch heads only move through conditional updates, so the single
/// connection behind the mutex is enough to serialize writers within a
/// process; `busy_timeout` covers other processes on the same file.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the store at `path`, creating the file and its directory if
    /// missing. Call [`initialize`](Self::initialize) before use.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening trip store");

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::with_connection(conn)
    }

    /// A throwaway store that lives as long as the handle.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        // Parent edges and branch heads must point at stored commits.
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Bring the schema up to the latest migration.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        debug!("trip store schema ready");
        Ok(())
    }

    /// Lock the connection. A panic in another holder does not poison the
    /// store for everyone else.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("trip store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run `f` in one transaction, committed only if it returns `Ok`.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn store() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn count(db: &Database, table: &str) -> i64 {
        db.conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_store_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stores").join("trips.db");
        {
            let db = Database::new(&path).unwrap();
            db.initialize().unwrap();
            db.conn()
                .execute(
                    "INSERT INTO repos (id, title, visibility, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params!["r1", "Lisbon", "private", "2025-06-01T00:00:00Z"],
                )
                .unwrap();
        }
        let db = Database::new(&path).unwrap();
        db.initialize().unwrap();
        assert_eq!(count(&db, "repos"), 1);

        let mode: String = db
            .conn()
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_branch_cannot_point_at_unknown_commit() {
        let db = store();
        db.conn()
            .execute(
                "INSERT INTO repos (id, title, visibility, created_at) VALUES (?1, ?2, ?3, ?4)",
                params!["r1", "Lisbon", "private", "2025-06-01T00:00:00Z"],
            )
            .unwrap();
        let err = db.conn().execute(
            "INSERT INTO branches (id, repo_id, name, head_commit_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params!["b1", "r1", "main", "no-such-commit", "2025-06-01T00:00:00Z"],
        );
        assert!(err.is_err());
        assert_eq!(count(&db, "branches"), 0);
    }

    #[test]
    fn test_failed_transaction_leaves_no_rows() {
        let db = store();
        let result: Result<(), DatabaseError> = db.transaction(|conn| {
            conn.execute(
                "INSERT INTO kv_state (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params!["current_branch:r1", "main", "2025-06-01T00:00:00Z"],
            )?;
            Err(DatabaseError::NotFound {
                entity: "branch".into(),
                id: "main".into(),
            })
        });
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
        assert_eq!(count(&db, "kv_state"), 0);
    }
}
