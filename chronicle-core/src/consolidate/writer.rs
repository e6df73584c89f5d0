//! Destructive consolidation (writer path)
//!
//! Invoked by the host once a run of events belongs to a completed turn.
//! Consolidation never allocates or moves seq values: it rewrites the run's
//! anchor payload in place and replaces the merged-away rows with the
//! canonical stub, so delivery cursors over the log stay valid. Each call is
//! one transaction; on failure nothing is applied.

use super::payload;
use crate::error::{Error, Result};
use crate::store::wal::{stub_payloads_tx, WalStore};
use crate::types::{CompactionOperation, EventKind};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

impl WalStore {
    /// Merge tool-call updates into their anchor event and stub the updates.
    ///
    /// The caller passes the anchor (`kind = tool_call`) and its updates in
    /// append order; the final update is expected to carry a terminal
    /// status, but the merge proceeds regardless; turn detection is the
    /// host's job. With no updates this is a no-op.
    pub fn consolidate_tool_call(
        &self,
        anchor_id: i64,
        update_ids: &[i64],
        anchor_payload: &Value,
        update_payloads: &[Value],
    ) -> Result<()> {
        if update_ids.is_empty() {
            return Ok(());
        }
        let refs: Vec<&Value> = update_payloads.iter().collect();
        let merged = payload::merge_tool_call(anchor_payload, &refs);
        self.apply_destructive(
            CompactionOperation::ToolCallMerge,
            Some((anchor_id, merged)),
            update_ids,
            anchor_id,
        )
    }

    /// Concatenate a run of same-kind text chunks into the first event and
    /// stub the rest. Runs shorter than two events are left alone.
    pub fn consolidate_chunks(
        &self,
        event_ids: &[i64],
        payloads: &[Value],
        kind: &EventKind,
    ) -> Result<()> {
        if event_ids.len() < 2 || payloads.len() < 2 {
            return Ok(());
        }
        let refs: Vec<&Value> = payloads.iter().collect();
        let merged = payload::merge_chunks(&payloads[0], &refs, kind.as_str());
        self.apply_destructive(
            CompactionOperation::ChunkMerge,
            Some((event_ids[0], merged)),
            &event_ids[1..],
            event_ids[0],
        )
    }

    /// Concatenate a run of terminal-output deltas (same `terminalId`) into
    /// the first event and stub the rest. Runs shorter than two events are
    /// left alone.
    pub fn consolidate_terminal_output(
        &self,
        event_ids: &[i64],
        payloads: &[Value],
    ) -> Result<()> {
        if event_ids.len() < 2 || payloads.len() < 2 {
            return Ok(());
        }
        let refs: Vec<&Value> = payloads.iter().collect();
        let merged = payload::merge_terminal_output(&payloads[0], &refs);
        self.apply_destructive(
            CompactionOperation::TerminalOutputMerge,
            Some((event_ids[0], merged)),
            &event_ids[1..],
            event_ids[0],
        )
    }

    /// Stub every usage-update event except the last, which already carries
    /// the most recent totals and is preserved verbatim.
    pub fn deduplicate_usage_updates(&self, event_ids: &[i64]) -> Result<()> {
        let Some((last, rest)) = event_ids.split_last() else {
            return Ok(());
        };
        if rest.is_empty() {
            return Ok(());
        }
        self.apply_destructive(CompactionOperation::UsageDedup, None, rest, *last)
    }

    /// Run one destructive consolidation transaction: optional anchor
    /// rewrite, stubbing, `compacted_at` stamps, and a compaction-log row
    /// resolved from `log_ref_id` (skipped when that event has been
    /// archived out from under us; the remaining updates are no-ops then).
    fn apply_destructive(
        &self,
        operation: CompactionOperation,
        rewrite: Option<(i64, Value)>,
        stub_ids: &[i64],
        log_ref_id: i64,
    ) -> Result<()> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or(Error::StoreClosed)?;
        let started_at = Utc::now().to_rfc3339();

        let tx = conn.unchecked_transaction()?;

        let scope: Option<(String, i64)> = tx
            .query_row(
                "SELECT session_id, revision FROM session_events WHERE id = ?",
                [log_ref_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let mut affected = 0;
        if let Some((anchor_id, merged)) = &rewrite {
            affected += tx.execute(
                "UPDATE session_events SET payload = ?1, compacted_at = ?2 WHERE id = ?3",
                params![merged.to_string(), started_at, anchor_id],
            )?;
        }
        affected += stub_payloads_tx(&tx, stub_ids, &started_at)?;

        if let Some((session_id, revision)) = &scope {
            tx.execute(
                "INSERT INTO compaction_log
                     (session_id, revision, operation, events_affected, started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session_id,
                    revision,
                    operation.as_str(),
                    affected as i64,
                    started_at,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        tx.commit()?;

        tracing::debug!(
            operation = %operation,
            affected,
            "destructive consolidation applied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::wal::EventQuery;
    use crate::types::SessionEvent;
    use serde_json::json;

    fn chunk(text: &str) -> Value {
        json!({
            "sessionId": "s1",
            "update": {
                "sessionUpdate": "agent_message_chunk",
                "content": { "type": "text", "text": text }
            }
        })
    }

    fn append_chunks(store: &WalStore, texts: &[&str]) -> Vec<SessionEvent> {
        texts
            .iter()
            .map(|t| {
                store
                    .append_event("s1", 1, &EventKind::AgentMessageChunk, &chunk(t))
                    .unwrap()
            })
            .collect()
    }

    fn setup() -> WalStore {
        let store = WalStore::open_in_memory().unwrap();
        store
            .ensure_session("s1", "m1", "backend-a", None, None)
            .unwrap();
        store
    }

    #[test]
    fn test_chunk_merge_preserves_rows_and_seqs() {
        let store = setup();
        let events = append_chunks(&store, &["a", "b", "c"]);
        let ids: Vec<i64> = events.iter().map(|e| e.id).collect();
        let payloads: Vec<Value> = events.iter().map(|e| e.payload.clone()).collect();

        store
            .consolidate_chunks(&ids, &payloads, &EventKind::AgentMessageChunk)
            .unwrap();

        let rows = store.query_events(&EventQuery::new("s1", 1)).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(payload::chunk_text(&rows[0].payload), Some("abc"));
        assert!(payload::is_stub(&rows[1].payload));
        assert!(payload::is_stub(&rows[2].payload));
        assert!(rows.iter().all(|e| e.compacted_at.is_some()));
    }

    #[test]
    fn test_chunk_merge_single_event_is_noop() {
        let store = setup();
        let events = append_chunks(&store, &["only"]);
        store
            .consolidate_chunks(
                &[events[0].id],
                &[events[0].payload.clone()],
                &EventKind::AgentMessageChunk,
            )
            .unwrap();

        let rows = store.query_events(&EventQuery::new("s1", 1)).unwrap();
        assert_eq!(payload::chunk_text(&rows[0].payload), Some("only"));
        assert!(rows[0].compacted_at.is_none());
    }

    #[test]
    fn test_chunk_merge_is_idempotent() {
        let store = setup();
        let events = append_chunks(&store, &["Hello ", "world"]);
        let ids: Vec<i64> = events.iter().map(|e| e.id).collect();
        let payloads: Vec<Value> = events.iter().map(|e| e.payload.clone()).collect();

        store
            .consolidate_chunks(&ids, &payloads, &EventKind::AgentMessageChunk)
            .unwrap();
        let first_pass = store.query_events(&EventQuery::new("s1", 1)).unwrap();

        // Run again over the read-back payloads
        let reread: Vec<Value> = first_pass.iter().map(|e| e.payload.clone()).collect();
        store
            .consolidate_chunks(&ids, &reread, &EventKind::AgentMessageChunk)
            .unwrap();
        let second_pass = store.query_events(&EventQuery::new("s1", 1)).unwrap();

        for (a, b) in first_pass.iter().zip(second_pass.iter()) {
            assert_eq!(a.payload, b.payload);
            assert_eq!(a.seq, b.seq);
        }
    }

    #[test]
    fn test_usage_dedup_keeps_last_verbatim() {
        let store = setup();
        let mut events = Vec::new();
        for used in [100, 200, 300] {
            events.push(
                store
                    .append_event(
                        "s1",
                        1,
                        &EventKind::UsageUpdate,
                        &json!({
                            "sessionId": "s1",
                            "update": { "sessionUpdate": "usage_update", "used": used, "size": 1000 }
                        }),
                    )
                    .unwrap(),
            );
        }
        let ids: Vec<i64> = events.iter().map(|e| e.id).collect();

        store.deduplicate_usage_updates(&ids).unwrap();

        let rows = store.query_events(&EventQuery::new("s1", 1)).unwrap();
        assert!(payload::is_stub(&rows[0].payload));
        assert!(payload::is_stub(&rows[1].payload));
        assert_eq!(rows[2].payload["update"]["used"], 300);
        assert!(rows[2].compacted_at.is_none());
    }

    #[test]
    fn test_usage_dedup_short_runs_are_noops() {
        let store = setup();
        store.deduplicate_usage_updates(&[]).unwrap();
        let event = store
            .append_event("s1", 1, &EventKind::UsageUpdate, &json!({"update": {}}))
            .unwrap();
        store.deduplicate_usage_updates(&[event.id]).unwrap();
        let rows = store.query_events(&EventQuery::new("s1", 1)).unwrap();
        assert!(!payload::is_stub(&rows[0].payload));
    }

    #[test]
    fn test_consolidation_records_compaction_log() {
        let store = setup();
        let events = append_chunks(&store, &["x", "y"]);
        let ids: Vec<i64> = events.iter().map(|e| e.id).collect();
        let payloads: Vec<Value> = events.iter().map(|e| e.payload.clone()).collect();
        store
            .consolidate_chunks(&ids, &payloads, &EventKind::AgentMessageChunk)
            .unwrap();

        let log = store.get_compaction_log(Some("s1"), 10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].operation, CompactionOperation::ChunkMerge);
        assert_eq!(log[0].events_affected, 2);
        assert_eq!(log[0].revision, Some(1));
        assert!(log[0].completed_at.is_some());
    }

    #[test]
    fn test_consolidation_with_archived_events_succeeds() {
        let store = setup();
        let events = append_chunks(&store, &["x", "y"]);
        let ids: Vec<i64> = events.iter().map(|e| e.id).collect();
        let payloads: Vec<Value> = events.iter().map(|e| e.payload.clone()).collect();

        store.archive_session("s1").unwrap();

        // Rows are gone; every update is a no-op but the call succeeds
        store
            .consolidate_chunks(&ids, &payloads, &EventKind::AgentMessageChunk)
            .unwrap();
        assert!(store.get_compaction_log(Some("s1"), 10).unwrap().is_empty());
    }
}
