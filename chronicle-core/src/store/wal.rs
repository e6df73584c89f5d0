//! WAL store: the durable per-session event log
//!
//! One [`WalStore`] owns one SQLite database file. Every mutation runs under
//! a single lock that also guards the in-memory sequence counters, so seq
//! allocation is atomic with the insert that consumes it. Readers go through
//! the same connection; WAL journalling keeps them cheap.

use crate::error::{Error, Result};
use crate::store::schema;
use crate::store::seq::SequenceGenerator;
use crate::types::{
    CompactionLogEntry, CompactionOperation, EventKind, Session, SessionEvent,
    DEFAULT_QUERY_LIMIT,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

/// Options for opening a [`WalStore`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Reject `append_event` for sessions without a session row.
    ///
    /// Off by default: an append for an unknown session seeds its sequence
    /// counter from the persisted max(seq) and proceeds.
    pub strict_sessions: bool,
}

/// Cursor-based page query over a session's event log.
#[derive(Debug, Clone)]
pub struct EventQuery {
    /// Session to read from
    pub session_id: String,
    /// Revision to read from
    pub revision: i64,
    /// Return events with `seq > after_seq` (0 reads from the beginning)
    pub after_seq: i64,
    /// Page size; [`DEFAULT_QUERY_LIMIT`] when not set
    pub limit: Option<usize>,
}

impl EventQuery {
    /// Query from the beginning of (session, revision) with the default limit
    pub fn new(session_id: impl Into<String>, revision: i64) -> Self {
        Self {
            session_id: session_id.into(),
            revision,
            after_seq: 0,
            limit: None,
        }
    }

    /// Continue after a delivery cursor
    pub fn after_seq(mut self, after_seq: i64) -> Self {
        self.after_seq = after_seq;
        self
    }

    /// Override the page size
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Aggregate store statistics for operator dashboards.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Database size in bytes
    pub database_size_bytes: u64,
    /// Number of live session rows
    pub session_count: i64,
    /// Total event rows across all sessions and revisions
    pub event_count: i64,
    /// Number of archive tombstones
    pub archived_count: i64,
}

/// Paths with a live store handle in this process.
fn open_paths() -> &'static Mutex<HashSet<PathBuf>> {
    static OPEN_PATHS: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    OPEN_PATHS.get_or_init(|| Mutex::new(HashSet::new()))
}

pub(crate) struct Inner {
    /// None once the store is closed
    pub(crate) conn: Option<Connection>,
    /// Seq counters, valid only while the lock is held
    pub(crate) sequences: SequenceGenerator,
}

/// Handle to the session WAL database.
///
/// The handle is `Send + Sync`; clones are not supported, so share it behind
/// an `Arc` instead. Opening the same path twice in one process yields
/// [`Error::AlreadyOpen`].
pub struct WalStore {
    pub(crate) inner: Mutex<Inner>,
    path: Option<PathBuf>,
    options: StoreOptions,
}

impl WalStore {
    /// Open or create a store at the given path with default options
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    /// Open or create a store at the given path
    pub fn open_with(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let canonical = canonical_store_path(path)?;
        {
            let mut open = open_paths().lock().unwrap();
            if !open.insert(canonical.clone()) {
                return Err(Error::AlreadyOpen(canonical));
            }
        }

        match Self::open_registered(&canonical, options) {
            Ok(store) => Ok(store),
            Err(err) => {
                open_paths().lock().unwrap().remove(&canonical);
                Err(err)
            }
        }
    }

    fn open_registered(canonical: &Path, options: StoreOptions) -> Result<Self> {
        let conn = Connection::open(canonical)?;

        // WAL journalling with synchronous=NORMAL: survives process crash,
        // may lose the last transaction on OS crash.
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        schema::run_migrations(&conn)?;
        let sequences = rehydrate_sequences(&conn)?;

        tracing::info!(path = %canonical.display(), "WAL store opened");

        Ok(Self {
            inner: Mutex::new(Inner {
                conn: Some(conn),
                sequences,
            }),
            path: Some(canonical.to_path_buf()),
            options,
        })
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with(StoreOptions::default())
    }

    /// Open an in-memory store with explicit options (for testing)
    pub fn open_in_memory_with(options: StoreOptions) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                conn: Some(conn),
                sequences: SequenceGenerator::default(),
            }),
            path: None,
            options,
        })
    }

    /// Release the database handle. Further operations fail with
    /// [`Error::StoreClosed`]; closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.conn.take().is_some() {
            if let Some(path) = &self.path {
                open_paths().lock().unwrap().remove(path);
            }
            tracing::info!("WAL store closed");
        }
        Ok(())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    // ============================================
    // Session operations
    // ============================================

    /// Create the session if missing, refresh its metadata otherwise.
    ///
    /// Returns the session's current revision and reseeds its sequence
    /// counter from the persisted max(seq). Idempotent.
    pub fn ensure_session(
        &self,
        session_id: &str,
        machine_id: &str,
        backend_id: &str,
        cwd: Option<&str>,
        title: Option<&str>,
    ) -> Result<i64> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let conn = inner.conn.as_ref().ok_or(Error::StoreClosed)?;
        let now = Utc::now().to_rfc3339();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT current_revision FROM sessions WHERE session_id = ?",
                [session_id],
                |r| r.get(0),
            )
            .optional()?;

        if let Some(revision) = existing {
            conn.execute(
                "UPDATE sessions
                 SET cwd = COALESCE(?1, cwd), title = COALESCE(?2, title), updated_at = ?3
                 WHERE session_id = ?4",
                params![cwd, title, now, session_id],
            )?;
            let max_seq = max_seq_for(conn, session_id, revision)?;
            inner.sequences.initialize(session_id, revision, max_seq);
            Ok(revision)
        } else {
            conn.execute(
                "INSERT INTO sessions (session_id, machine_id, backend_id, current_revision,
                                       cwd, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?6)",
                params![session_id, machine_id, backend_id, cwd, title, now],
            )?;
            inner.sequences.initialize(session_id, 1, 0);
            tracing::debug!(session_id, backend_id, "session created");
            Ok(1)
        }
    }

    /// Get a session by id
    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;
        conn.query_row(
            "SELECT * FROM sessions WHERE session_id = ?",
            [session_id],
            row_to_session,
        )
        .optional()
        .map_err(Error::from)
    }

    /// List all live sessions, most recently updated first
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;
        let mut stmt = conn.prepare("SELECT * FROM sessions ORDER BY updated_at DESC")?;
        let sessions = stmt
            .query_map([], row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Update session metadata; non-null arguments win, nulls leave the
    /// stored value alone. Refreshes `updated_at`.
    pub fn update_session_metadata(
        &self,
        session_id: &str,
        cwd: Option<&str>,
        title: Option<&str>,
        agent_updated_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;
        let affected = conn.execute(
            "UPDATE sessions
             SET cwd = COALESCE(?1, cwd),
                 title = COALESCE(?2, title),
                 agent_updated_at = COALESCE(?3, agent_updated_at),
                 updated_at = ?4
             WHERE session_id = ?5",
            params![
                cwd,
                title,
                agent_updated_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
                session_id
            ],
        )?;
        if affected == 0 {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    /// Bump the session's revision by one and reset its seq counter, so the
    /// next append under the new revision returns seq = 1.
    pub fn increment_revision(&self, session_id: &str) -> Result<i64> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let conn = inner.conn.as_ref().ok_or(Error::StoreClosed)?;

        let tx = conn.unchecked_transaction()?;
        let current: Option<i64> = tx
            .query_row(
                "SELECT current_revision FROM sessions WHERE session_id = ?",
                [session_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Err(Error::SessionNotFound(session_id.to_string()));
        };

        let new_revision = current + 1;
        tx.execute(
            "UPDATE sessions SET current_revision = ?1, updated_at = ?2 WHERE session_id = ?3",
            params![new_revision, Utc::now().to_rfc3339(), session_id],
        )?;
        tx.commit()?;

        inner.sequences.reset(session_id, new_revision);
        tracing::info!(session_id, new_revision, "revision incremented");
        Ok(new_revision)
    }

    // ============================================
    // Event operations
    // ============================================

    /// Append one event under (session, revision), allocating the next seq.
    ///
    /// Returns the stored event including its assigned storage id. The seq
    /// counter only advances when the insert succeeds, so a failed append
    /// leaves no gap.
    pub fn append_event(
        &self,
        session_id: &str,
        revision: i64,
        kind: &EventKind,
        payload: &serde_json::Value,
    ) -> Result<SessionEvent> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let conn = inner.conn.as_ref().ok_or(Error::StoreClosed)?;

        if !inner.sequences.is_initialized(session_id, revision) {
            if self.options.strict_sessions && !session_exists(conn, session_id)? {
                return Err(Error::SessionNotFound(session_id.to_string()));
            }
            let max_seq = max_seq_for(conn, session_id, revision)?;
            inner.sequences.initialize(session_id, revision, max_seq);
        }

        let seq = inner.sequences.next(session_id, revision);
        let created_at = Utc::now();

        let inserted = conn.execute(
            "INSERT INTO session_events (session_id, revision, seq, kind, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                revision,
                seq,
                kind.as_str(),
                payload.to_string(),
                created_at.to_rfc3339()
            ],
        );

        match inserted {
            Ok(_) => Ok(SessionEvent {
                id: conn.last_insert_rowid(),
                session_id: session_id.to_string(),
                revision,
                seq,
                kind: kind.clone(),
                payload: payload.clone(),
                created_at,
                acked_at: None,
                compacted_at: None,
            }),
            Err(err) => {
                inner.sequences.release(session_id, revision, seq);
                Err(err.into())
            }
        }
    }

    /// Page through events with `seq > after_seq`, ascending
    pub fn query_events(&self, query: &EventQuery) -> Result<Vec<SessionEvent>> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;
        let limit = query.limit.unwrap_or(DEFAULT_QUERY_LIMIT);

        let mut stmt = conn.prepare(
            "SELECT * FROM session_events
             WHERE session_id = ?1 AND revision = ?2 AND seq > ?3
             ORDER BY seq ASC LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(
                params![query.session_id, query.revision, query.after_seq, limit as i64],
                row_to_event_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(decode_event).collect()
    }

    /// Events with `from_seq <= seq <= to_seq`; empty when the range is
    /// inverted
    pub fn query_events_by_seq_range(
        &self,
        session_id: &str,
        revision: i64,
        from_seq: i64,
        to_seq: i64,
    ) -> Result<Vec<SessionEvent>> {
        if from_seq > to_seq {
            return Ok(Vec::new());
        }
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;
        let mut stmt = conn.prepare(
            "SELECT * FROM session_events
             WHERE session_id = ?1 AND revision = ?2 AND seq BETWEEN ?3 AND ?4
             ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map(
                params![session_id, revision, from_seq, to_seq],
                row_to_event_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(decode_event).collect()
    }

    /// All undelivered events for (session, revision), ascending by seq
    pub fn get_unacked_events(&self, session_id: &str, revision: i64) -> Result<Vec<SessionEvent>> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;
        let mut stmt = conn.prepare(
            "SELECT * FROM session_events
             WHERE session_id = ?1 AND revision = ?2 AND acked_at IS NULL
             ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id, revision], row_to_event_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(decode_event).collect()
    }

    /// Acknowledge delivery of every event with `seq <= up_to_seq` in this
    /// (session, revision). Idempotent; returns the number of newly acked
    /// rows.
    pub fn ack_events(&self, session_id: &str, revision: i64, up_to_seq: i64) -> Result<usize> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;
        let acked = conn.execute(
            "UPDATE session_events SET acked_at = ?1
             WHERE session_id = ?2 AND revision = ?3 AND seq <= ?4 AND acked_at IS NULL",
            params![Utc::now().to_rfc3339(), session_id, revision, up_to_seq],
        )?;
        Ok(acked)
    }

    /// Current seq counter for (session, revision); 0 when nothing has been
    /// appended yet
    pub fn get_current_seq(&self, session_id: &str, revision: i64) -> Result<i64> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let conn = inner.conn.as_ref().ok_or(Error::StoreClosed)?;

        if let Some(current) = inner.sequences.current(session_id, revision) {
            return Ok(current);
        }
        let max_seq = max_seq_for(conn, session_id, revision)?;
        inner.sequences.initialize(session_id, revision, max_seq);
        Ok(max_seq)
    }

    /// Replace the payload of a single event by storage id.
    ///
    /// A missing id is a no-op by design: consolidation may race with
    /// archival. `seq`, `kind`, `created_at` and `acked_at` are untouched.
    pub fn update_event_payload(&self, event_id: i64, payload: &serde_json::Value) -> Result<()> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;
        conn.execute(
            "UPDATE session_events SET payload = ?1 WHERE id = ?2",
            params![payload.to_string(), event_id],
        )?;
        Ok(())
    }

    /// Replace each referenced event's payload with the canonical stub
    /// `{"_c": true}`, preserving its seq slot, and stamp `compacted_at`.
    pub fn stub_event_payloads(&self, event_ids: &[i64]) -> Result<()> {
        if event_ids.is_empty() {
            return Ok(());
        }
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;
        let tx = conn.unchecked_transaction()?;
        stub_payloads_tx(&tx, event_ids, &Utc::now().to_rfc3339())?;
        tx.commit()?;
        Ok(())
    }

    // ============================================
    // Statistics
    // ============================================

    /// Count event rows for a session across all revisions
    pub fn count_session_events(&self, session_id: &str) -> Result<i64> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM session_events WHERE session_id = ?",
            [session_id],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// Count undelivered events for (session, revision)
    pub fn count_unacked_events(&self, session_id: &str, revision: i64) -> Result<i64> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM session_events
             WHERE session_id = ?1 AND revision = ?2 AND acked_at IS NULL",
            params![session_id, revision],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// Recent compaction audit entries, newest first
    pub fn get_compaction_log(
        &self,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CompactionLogEntry>> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;

        let mut sql = String::from("SELECT * FROM compaction_log WHERE 1=1");
        let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(session_id) = session_id {
            sql.push_str(" AND session_id = ?");
            sql_params.push(Box::new(session_id.to_string()));
        }
        sql.push_str(" ORDER BY started_at DESC, id DESC LIMIT ?");
        sql_params.push(Box::new(limit as i64));

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            sql_params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_refs.as_slice(), row_to_compaction_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Aggregate statistics for operator dashboards
    pub fn stats(&self) -> Result<StoreStats> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;

        let database_size_bytes: i64 = conn.query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |r| r.get(0),
        )?;
        let session_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?;
        let event_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM session_events", [], |r| r.get(0))?;
        let archived_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM archived_session_ids", [], |r| r.get(0))?;

        Ok(StoreStats {
            database_size_bytes: database_size_bytes.max(0) as u64,
            session_count,
            event_count,
            archived_count,
        })
    }
}

impl Drop for WalStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

// ============================================
// Row mapping
// ============================================

/// Raw event row before payload decoding; decoding is split out so a bad
/// payload surfaces as a typed error carrying the event id.
pub(crate) struct EventRow {
    id: i64,
    session_id: String,
    revision: i64,
    seq: i64,
    kind: String,
    payload: String,
    created_at: String,
    acked_at: Option<String>,
    compacted_at: Option<String>,
}

pub(crate) fn row_to_event_row(row: &Row) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        revision: row.get("revision")?,
        seq: row.get("seq")?,
        kind: row.get("kind")?,
        payload: row.get("payload")?,
        created_at: row.get("created_at")?,
        acked_at: row.get("acked_at")?,
        compacted_at: row.get("compacted_at")?,
    })
}

pub(crate) fn decode_event(row: EventRow) -> Result<SessionEvent> {
    let payload = serde_json::from_str(&row.payload).map_err(|source| Error::PayloadEncoding {
        event_id: row.id,
        source,
    })?;
    Ok(SessionEvent {
        id: row.id,
        session_id: row.session_id,
        revision: row.revision,
        seq: row.seq,
        kind: EventKind::from(row.kind.as_str()),
        payload,
        created_at: parse_ts(&row.created_at),
        acked_at: row.acked_at.as_deref().and_then(parse_opt_ts),
        compacted_at: row.compacted_at.as_deref().and_then(parse_opt_ts),
    })
}

pub(crate) fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let agent_updated_at: Option<String> = row.get("agent_updated_at")?;

    Ok(Session {
        session_id: row.get("session_id")?,
        machine_id: row.get("machine_id")?,
        backend_id: row.get("backend_id")?,
        current_revision: row.get("current_revision")?,
        cwd: row.get("cwd")?,
        title: row.get("title")?,
        agent_updated_at: agent_updated_at.as_deref().and_then(parse_opt_ts),
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

fn row_to_compaction_entry(row: &Row) -> rusqlite::Result<CompactionLogEntry> {
    let operation: String = row.get("operation")?;
    let started_at: String = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;

    Ok(CompactionLogEntry {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        revision: row.get("revision")?,
        operation: CompactionOperation::from(operation.as_str()),
        events_affected: row.get("events_affected")?,
        started_at: parse_ts(&started_at),
        completed_at: completed_at.as_deref().and_then(parse_opt_ts),
    })
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_opt_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ============================================
// Shared query helpers
// ============================================

pub(crate) fn max_seq_for(conn: &Connection, session_id: &str, revision: i64) -> Result<i64> {
    let max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) FROM session_events WHERE session_id = ?1 AND revision = ?2",
        params![session_id, revision],
        |r| r.get(0),
    )?;
    Ok(max)
}

pub(crate) fn session_exists(conn: &Connection, session_id: &str) -> Result<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sessions WHERE session_id = ?)",
        [session_id],
        |r| r.get(0),
    )?;
    Ok(exists != 0)
}

pub(crate) fn stub_payloads_tx(
    tx: &rusqlite::Transaction<'_>,
    event_ids: &[i64],
    now: &str,
) -> Result<usize> {
    let stub = crate::consolidate::payload::stub_payload().to_string();
    let mut affected = 0;
    for event_id in event_ids {
        affected += tx.execute(
            "UPDATE session_events SET payload = ?1, compacted_at = ?2 WHERE id = ?3",
            params![stub, now, event_id],
        )?;
    }
    Ok(affected)
}

fn rehydrate_sequences(conn: &Connection) -> Result<SequenceGenerator> {
    let mut sequences = SequenceGenerator::default();
    let mut stmt = conn.prepare(
        "SELECT s.session_id, s.current_revision, COALESCE(MAX(e.seq), 0)
         FROM sessions s
         LEFT JOIN session_events e
           ON e.session_id = s.session_id AND e.revision = s.current_revision
         GROUP BY s.session_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;
    for row in rows {
        let (session_id, revision, max_seq) = row?;
        sequences.initialize(&session_id, revision, max_seq);
    }
    Ok(sequences)
}

fn canonical_store_path(path: &Path) -> Result<PathBuf> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let file = path.file_name().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "store path has no file name",
        ))
    })?;
    Ok(parent.canonicalize()?.join(file))
}
