//! Database schema and migrations
//!
//! Uses SQLite with embedded, forward-only migrations. Applied versions are
//! recorded in the `schema_version` table; each migration runs in its own
//! transaction so a failure leaves the database at the previous version.

use crate::error::{Error, Result};
use chrono::Utc;
use rusqlite::{params, Connection};

/// Current schema version
pub const SCHEMA_VERSION: i64 = 3;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: sessions and the per-session event log
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        session_id       TEXT PRIMARY KEY,
        machine_id       TEXT NOT NULL,
        backend_id       TEXT NOT NULL,
        current_revision INTEGER NOT NULL DEFAULT 1,
        cwd              TEXT,
        title            TEXT,
        agent_updated_at TEXT,
        created_at       TEXT NOT NULL,
        updated_at       TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS session_events (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id   TEXT NOT NULL,
        revision     INTEGER NOT NULL,
        seq          INTEGER NOT NULL,
        kind         TEXT NOT NULL,
        payload      TEXT NOT NULL,
        created_at   TEXT NOT NULL,
        acked_at     TEXT,
        compacted_at TEXT,

        UNIQUE(session_id, revision, seq)
    );

    -- Delivery scans walk unacked events in seq order; cleanup scans walk
    -- the acked side. Partial indexes keep both cheap on long sessions.
    CREATE INDEX IF NOT EXISTS idx_events_unacked
        ON session_events(session_id, revision, seq) WHERE acked_at IS NULL;
    CREATE INDEX IF NOT EXISTS idx_events_acked
        ON session_events(session_id, revision, seq) WHERE acked_at IS NOT NULL;

    CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated_at DESC);
    "#,
    // Version 2: discovery catalogue and archive tombstones
    r#"
    CREATE TABLE IF NOT EXISTS discovered_sessions (
        session_id       TEXT PRIMARY KEY,
        backend_id       TEXT NOT NULL,
        cwd              TEXT,
        title            TEXT,
        agent_updated_at TEXT,
        discovered_at    TEXT NOT NULL,
        last_verified_at TEXT,
        is_stale         INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_discovered_backend
        ON discovered_sessions(backend_id, discovered_at DESC);
    CREATE INDEX IF NOT EXISTS idx_discovered_stale
        ON discovered_sessions(is_stale) WHERE is_stale != 0;

    CREATE TABLE IF NOT EXISTS archived_session_ids (
        session_id  TEXT PRIMARY KEY,
        archived_at TEXT NOT NULL
    );
    "#,
    // Version 3: compaction audit log and the consolidation scan index
    r#"
    CREATE TABLE IF NOT EXISTS compaction_log (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id      TEXT NOT NULL,
        revision        INTEGER,
        operation       TEXT NOT NULL,
        events_affected INTEGER NOT NULL DEFAULT 0,
        started_at      TEXT NOT NULL,
        completed_at    TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_compaction_session
        ON compaction_log(session_id, started_at DESC);

    CREATE INDEX IF NOT EXISTS idx_events_kind
        ON session_events(session_id, revision, kind);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )?;

    let current_version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i64;
        if version > current_version {
            tracing::info!(version, "Running migration");
            apply_migration(conn, version, migration)?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: i64, sql: &str) -> Result<()> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|source| Error::Migration { version, source })?;
    tx.execute_batch(sql)
        .map_err(|source| Error::Migration { version, source })?;
    tx.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
        params![version, Utc::now().to_rfc3339()],
    )
    .map_err(|source| Error::Migration { version, source })?;
    tx.commit()
        .map_err(|source| Error::Migration { version, source })?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i64> {
    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        // Run migrations twice - should be idempotent
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = [
            "sessions",
            "session_events",
            "discovered_sessions",
            "archived_session_ids",
            "compaction_log",
            "schema_version",
        ];

        for table in tables {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_unique_triple_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO session_events (session_id, revision, seq, kind, payload, created_at)
             VALUES ('s1', 1, 1, 'user_message', '{}', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO session_events (session_id, revision, seq, kind, payload, created_at)
             VALUES ('s1', 1, 1, 'user_message', '{}', '2026-01-01T00:00:01Z')",
            [],
        );
        assert!(dup.is_err(), "duplicate (session, revision, seq) must fail");
    }

    #[test]
    fn test_version_rows_recorded() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, SCHEMA_VERSION);
    }
}
