//! Discovered-session catalogue
//!
//! The host's discovery scanner reports sessions it sees on the machine;
//! the store caches them for the discovery UI. Archived session ids are
//! filtered out of every listing, whether or not a session row exists.

use crate::error::{Error, Result};
use crate::store::wal::{self, WalStore};
use crate::types::DiscoveredSession;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

impl WalStore {
    /// Upsert a batch of discovered sessions.
    ///
    /// Refreshes `last_verified_at` and clears staleness on every entry;
    /// `discovered_at` keeps its original first-seen value on conflict.
    pub fn save_discovered_sessions(&self, sessions: &[DiscoveredSession]) -> Result<()> {
        if sessions.is_empty() {
            return Ok(());
        }
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;
        let now = Utc::now().to_rfc3339();

        let tx = conn.unchecked_transaction()?;
        for session in sessions {
            tx.execute(
                r#"
                INSERT INTO discovered_sessions
                    (session_id, backend_id, cwd, title, agent_updated_at,
                     discovered_at, last_verified_at, is_stale)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)
                ON CONFLICT(session_id) DO UPDATE SET
                    backend_id = excluded.backend_id,
                    cwd = excluded.cwd,
                    title = excluded.title,
                    agent_updated_at = excluded.agent_updated_at,
                    last_verified_at = excluded.last_verified_at,
                    is_stale = 0
                "#,
                params![
                    session.session_id,
                    session.backend_id,
                    session.cwd,
                    session.title,
                    session.agent_updated_at.map(|t| t.to_rfc3339()),
                    session.discovered_at.to_rfc3339(),
                    now,
                ],
            )?;
        }
        tx.commit()?;
        tracing::debug!(count = sessions.len(), "discovered sessions saved");
        Ok(())
    }

    /// Non-stale discovered sessions, newest discovery first, with archived
    /// ids filtered out. Pass a backend id to narrow the listing.
    pub fn get_discovered_sessions(
        &self,
        backend_id: Option<&str>,
    ) -> Result<Vec<DiscoveredSession>> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;

        let mut sql = String::from(
            "SELECT * FROM discovered_sessions
             WHERE is_stale = 0
               AND session_id NOT IN (SELECT session_id FROM archived_session_ids)",
        );
        let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(backend_id) = backend_id {
            sql.push_str(" AND backend_id = ?");
            sql_params.push(Box::new(backend_id.to_string()));
        }
        sql.push_str(" ORDER BY discovered_at DESC");

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            sql_params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let sessions = stmt
            .query_map(params_refs.as_slice(), row_to_discovered)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Mark a discovered session stale (the scanner no longer finds it)
    pub fn mark_discovered_session_stale(&self, session_id: &str) -> Result<()> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;
        conn.execute(
            "UPDATE discovered_sessions SET is_stale = 1 WHERE session_id = ?",
            [session_id],
        )?;
        Ok(())
    }

    /// Remove stale entries discovered before the cutoff; returns the number
    /// deleted
    pub fn delete_stale_discovered_sessions(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;
        let deleted = conn.execute(
            "DELETE FROM discovered_sessions WHERE is_stale != 0 AND discovered_at < ?",
            [older_than.to_rfc3339()],
        )?;
        if deleted > 0 {
            tracing::debug!(deleted, "stale discovered sessions pruned");
        }
        Ok(deleted)
    }
}

fn row_to_discovered(row: &Row) -> rusqlite::Result<DiscoveredSession> {
    let agent_updated_at: Option<String> = row.get("agent_updated_at")?;
    let discovered_at: String = row.get("discovered_at")?;
    let last_verified_at: Option<String> = row.get("last_verified_at")?;
    let is_stale: i64 = row.get("is_stale")?;

    Ok(DiscoveredSession {
        session_id: row.get("session_id")?,
        backend_id: row.get("backend_id")?,
        cwd: row.get("cwd")?,
        title: row.get("title")?,
        agent_updated_at: agent_updated_at.as_deref().and_then(wal::parse_opt_ts),
        discovered_at: wal::parse_ts(&discovered_at),
        last_verified_at: last_verified_at.as_deref().and_then(wal::parse_opt_ts),
        is_stale: is_stale != 0,
    })
}
