//! Session archival and tombstones
//!
//! Archiving removes the session row and every event row, then records a
//! tombstone in `archived_session_ids`. The tombstone is the source of
//! truth: read paths that consult it ignore any stray rows, so archival
//! stays deterministic even if a crash interleaves with other writers.

use crate::error::{Error, Result};
use crate::store::wal::WalStore;
use chrono::Utc;
use rusqlite::{params, Transaction};

impl WalStore {
    /// Archive a session: delete its events (all revisions) and its session
    /// row, and leave a tombstone behind.
    ///
    /// Idempotent: archiving an unknown or already-archived session still
    /// ensures the tombstone exists and reports success.
    pub fn archive_session(&self, session_id: &str) -> Result<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let conn = inner.conn.as_ref().ok_or(Error::StoreClosed)?;

        let tx = conn.unchecked_transaction()?;
        let (events_removed, _) = archive_session_tx(&tx, session_id)?;
        tx.commit()?;

        inner.sequences.forget_session(session_id);
        tracing::info!(session_id, events_removed, "session archived");
        Ok(())
    }

    /// Archive several sessions in one transaction.
    ///
    /// Returns how many tombstones were newly created; already-archived ids
    /// succeed but count 0.
    pub fn bulk_archive_sessions(&self, session_ids: &[&str]) -> Result<usize> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let conn = inner.conn.as_ref().ok_or(Error::StoreClosed)?;

        let tx = conn.unchecked_transaction()?;
        let mut newly_archived = 0;
        for session_id in session_ids {
            let (_, tombstones_inserted) = archive_session_tx(&tx, session_id)?;
            newly_archived += tombstones_inserted;
        }
        tx.commit()?;

        for session_id in session_ids {
            inner.sequences.forget_session(session_id);
        }
        tracing::info!(
            requested = session_ids.len(),
            newly_archived,
            "bulk archive complete"
        );
        Ok(newly_archived)
    }

    /// Whether a tombstone exists for this session id
    pub fn is_archived(&self, session_id: &str) -> Result<bool> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM archived_session_ids WHERE session_id = ?)",
            [session_id],
            |r| r.get(0),
        )?;
        Ok(exists != 0)
    }

    /// All archived session ids (unordered)
    pub fn get_archived_session_ids(&self) -> Result<Vec<String>> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;
        let mut stmt = conn.prepare("SELECT session_id FROM archived_session_ids")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

/// Delete rows and ensure the tombstone. Returns (event rows removed,
/// tombstones newly inserted); the latter is 0 or 1 since INSERT OR IGNORE
/// reports no change for an existing tombstone.
fn archive_session_tx(tx: &Transaction<'_>, session_id: &str) -> Result<(usize, usize)> {
    let events_removed = tx.execute(
        "DELETE FROM session_events WHERE session_id = ?",
        [session_id],
    )?;
    tx.execute("DELETE FROM sessions WHERE session_id = ?", [session_id])?;
    let tombstones_inserted = tx.execute(
        "INSERT OR IGNORE INTO archived_session_ids (session_id, archived_at) VALUES (?1, ?2)",
        params![session_id, Utc::now().to_rfc3339()],
    )?;
    Ok((events_removed, tombstones_inserted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;
    use serde_json::json;

    #[test]
    fn test_archive_removes_rows_and_leaves_tombstone() {
        let store = WalStore::open_in_memory().unwrap();
        store
            .ensure_session("s1", "m1", "backend-a", None, None)
            .unwrap();
        store
            .append_event("s1", 1, &EventKind::UserMessage, &json!({}))
            .unwrap();

        store.archive_session("s1").unwrap();

        assert!(store.get_session("s1").unwrap().is_none());
        assert_eq!(store.count_session_events("s1").unwrap(), 0);
        assert!(store.is_archived("s1").unwrap());
    }

    #[test]
    fn test_archive_unknown_session_creates_tombstone() {
        let store = WalStore::open_in_memory().unwrap();
        store.archive_session("never-seen").unwrap();
        assert!(store.is_archived("never-seen").unwrap());

        // Re-archiving is a no-op
        store.archive_session("never-seen").unwrap();
        assert_eq!(store.get_archived_session_ids().unwrap().len(), 1);
    }

    #[test]
    fn test_bulk_archive_counts_new_tombstones_only() {
        let store = WalStore::open_in_memory().unwrap();
        store
            .ensure_session("s1", "m1", "backend-a", None, None)
            .unwrap();
        store
            .ensure_session("s2", "m1", "backend-a", None, None)
            .unwrap();
        store.archive_session("s1").unwrap();

        let newly = store.bulk_archive_sessions(&["s1", "s2", "s3"]).unwrap();
        assert_eq!(newly, 2);
        assert_eq!(store.get_archived_session_ids().unwrap().len(), 3);
    }

    #[test]
    fn test_seq_restarts_after_archive() {
        let store = WalStore::open_in_memory().unwrap();
        store
            .ensure_session("s1", "m1", "backend-a", None, None)
            .unwrap();
        store
            .append_event("s1", 1, &EventKind::UserMessage, &json!({}))
            .unwrap();
        store.archive_session("s1").unwrap();

        store
            .ensure_session("s1", "m1", "backend-a", None, None)
            .unwrap();
        let event = store
            .append_event("s1", 1, &EventKind::UserMessage, &json!({}))
            .unwrap();
        assert_eq!(event.seq, 1);
    }
}
