//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `schema_version`
//! user-version pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
/// Versions start at 1. The current schema version is stored in the SQLite
/// `user_version` pragma.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS repos (
            id                  TEXT PRIMARY KEY,
            title               TEXT NOT NULL,
            owner_user_id       TEXT,
            visibility          TEXT NOT NULL DEFAULT 'private'
                                CHECK (visibility IN ('private', 'unlisted', 'public')),
            forked_from_repo_id TEXT REFERENCES repos (id),
            created_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS commits (
            id              TEXT PRIMARY KEY,
            repo_id         TEXT NOT NULL REFERENCES repos (id),
            author          TEXT NOT NULL DEFAULT '',
            message         TEXT NOT NULL DEFAULT '',
            snapshot        TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            key_score       INTEGER NOT NULL DEFAULT 0,
            key_auto_flag   INTEGER NOT NULL DEFAULT 0,
            key_manual_flag INTEGER NOT NULL DEFAULT 0,
            key_reason      TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_commits_repo ON commits (repo_id, created_at);

        CREATE TABLE IF NOT EXISTS commit_parents (
            commit_id   TEXT    NOT NULL REFERENCES commits (id),
            position    INTEGER NOT NULL CHECK (position IN (0, 1)),
            parent_id   TEXT    NOT NULL REFERENCES commits (id),
            PRIMARY KEY (commit_id, position)
        );

        CREATE INDEX IF NOT EXISTS idx_commit_parents_parent ON commit_parents (parent_id);

        CREATE TABLE IF NOT EXISTS branches (
            id              TEXT PRIMARY KEY,
            repo_id         TEXT NOT NULL REFERENCES repos (id),
            name            TEXT NOT NULL,
            head_commit_id  TEXT NOT NULL REFERENCES commits (id),
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            UNIQUE (repo_id, name)
        );

        CREATE TABLE IF NOT EXISTS kv_state (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            action      TEXT NOT NULL,
            repo_id     TEXT,
            commit_id   TEXT,
            author      TEXT,
            details     TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log (created_at);
        CREATE INDEX IF NOT EXISTS idx_audit_log_action ON audit_log (action);
        "#,
    ),
    (
        2,
        "index flagged commits",
        r#"
        CREATE INDEX IF NOT EXISTS idx_commits_flags
            ON commits (repo_id, key_auto_flag, key_manual_flag);
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

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };

        for table in ["repos", "commits", "commit_parents", "branches", "kv_state", "audit_log"] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }
}
