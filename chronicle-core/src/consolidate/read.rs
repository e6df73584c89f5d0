//! Read-side consolidation (reader path)
//!
//! A pure, order-preserving single pass over a page of events that hides
//! stubs and collapses runs the writer has not (or had not yet) merged. It
//! is the replay path for data written before destructive consolidation
//! existed, and the correctness net for late-arriving chunks.
//!
//! Merge semantics are shared with the writer path through
//! [`payload`](super::payload), so consumers see the same text whether or
//! not the writer has run. Malformed payloads never fail the view; they
//! just contribute nothing to the merged output.

use super::payload;
use crate::types::{EventKind, SessionEvent};
use serde_json::Value;

/// Produce a filtered, merged view of `events` without touching storage.
///
/// Stubs are dropped; runs of mergeable events collapse to one event that
/// carries the identity (`id`, `seq`, `created_at`, `acked_at`) of the run's
/// last member, so pagination cursors derived from the view stay valid.
/// Idempotent: applying the function to its own output changes nothing.
pub fn consolidate_events_for_read(events: Vec<SessionEvent>) -> Vec<SessionEvent> {
    let mut out: Vec<SessionEvent> = Vec::with_capacity(events.len());
    let mut run: Vec<SessionEvent> = Vec::new();

    for event in events {
        if payload::is_stub(&event.payload) {
            continue;
        }
        let extends = match run.first() {
            Some(head) => extends_run(head, &event),
            None => false,
        };
        if run.is_empty() {
            run.push(event);
        } else if extends {
            let closes = run[0].kind == EventKind::ToolCall
                && payload::has_terminal_status(&event.payload);
            run.push(event);
            if closes {
                out.extend(merge_tool_call_run(std::mem::take(&mut run)));
            }
        } else {
            flush_run(&mut out, &mut run);
            run.push(event);
        }
    }
    flush_run(&mut out, &mut run);
    out
}

/// Whether `next` continues the run opened by `head`.
fn extends_run(head: &SessionEvent, next: &SessionEvent) -> bool {
    match &head.kind {
        kind if kind.is_chunk() => next.kind == head.kind,
        EventKind::ToolCall => {
            next.kind == EventKind::ToolCallUpdate
                && matches!(
                    (
                        payload::tool_call_id(&head.payload),
                        payload::tool_call_id(&next.payload),
                    ),
                    (Some(a), Some(b)) if a == b
                )
        }
        EventKind::TerminalOutput => {
            next.kind == EventKind::TerminalOutput
                && matches!(
                    (
                        payload::terminal_id(&head.payload),
                        payload::terminal_id(&next.payload),
                    ),
                    (Some(a), Some(b)) if a == b
                )
        }
        EventKind::UsageUpdate => next.kind == EventKind::UsageUpdate,
        _ => false,
    }
}

/// Emit whatever the open run holds: singletons pass through; chunk,
/// terminal and usage runs merge; a tool-call run that never saw a terminal
/// status is emitted unmerged.
fn flush_run(out: &mut Vec<SessionEvent>, run: &mut Vec<SessionEvent>) {
    let finished = std::mem::take(run);
    if finished.len() <= 1 {
        out.extend(finished);
        return;
    }
    let head_kind = finished[0].kind.clone();
    match head_kind {
        kind if kind.is_chunk() => out.extend(merge_chunk_run(finished)),
        EventKind::TerminalOutput => out.extend(merge_terminal_run(finished)),
        EventKind::UsageUpdate => out.extend(finished.into_iter().last()),
        _ => out.extend(finished),
    }
}

fn merge_chunk_run(mut run: Vec<SessionEvent>) -> Option<SessionEvent> {
    let kind = run.first()?.kind.clone();
    let refs: Vec<&Value> = run.iter().map(|e| &e.payload).collect();
    let merged = payload::merge_chunks(&run[0].payload, &refs, kind.as_str());
    let mut last = run.pop()?;
    last.kind = kind;
    last.payload = merged;
    Some(last)
}

fn merge_terminal_run(mut run: Vec<SessionEvent>) -> Option<SessionEvent> {
    let refs: Vec<&Value> = run.iter().map(|e| &e.payload).collect();
    let merged = payload::merge_terminal_output(&run.first()?.payload, &refs);
    let mut last = run.pop()?;
    last.kind = EventKind::TerminalOutput;
    last.payload = merged;
    Some(last)
}

fn merge_tool_call_run(mut run: Vec<SessionEvent>) -> Option<SessionEvent> {
    let refs: Vec<&Value> = run.iter().skip(1).map(|e| &e.payload).collect();
    let merged = payload::merge_tool_call(&run.first()?.payload, &refs);
    let mut last = run.pop()?;
    last.kind = EventKind::ToolCall;
    last.payload = merged;
    Some(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn ev(seq: i64, kind: EventKind, payload: Value) -> SessionEvent {
        SessionEvent {
            id: seq,
            session_id: "s1".to_string(),
            revision: 1,
            seq,
            kind,
            payload,
            created_at: Utc::now(),
            acked_at: None,
            compacted_at: None,
        }
    }

    fn chunk(seq: i64, text: &str) -> SessionEvent {
        ev(
            seq,
            EventKind::AgentMessageChunk,
            json!({
                "sessionId": "s1",
                "update": {
                    "sessionUpdate": "agent_message_chunk",
                    "content": { "type": "text", "text": text }
                }
            }),
        )
    }

    fn tool_call(seq: i64, id: &str, status: &str) -> SessionEvent {
        ev(
            seq,
            EventKind::ToolCall,
            json!({
                "update": { "sessionUpdate": "tool_call", "toolCallId": id, "status": status }
            }),
        )
    }

    fn tool_update(seq: i64, id: &str, status: &str) -> SessionEvent {
        ev(
            seq,
            EventKind::ToolCallUpdate,
            json!({
                "update": { "sessionUpdate": "tool_call_update", "toolCallId": id, "status": status }
            }),
        )
    }

    #[test]
    fn test_stubs_are_filtered() {
        let events = vec![
            chunk(1, "keep"),
            ev(2, EventKind::AgentMessageChunk, payload::stub_payload()),
            ev(3, EventKind::UserMessage, json!({ "text": "hi" })),
        ];
        let view = consolidate_events_for_read(events);
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].seq, 1);
        assert_eq!(view[1].seq, 3);
    }

    #[test]
    fn test_chunk_run_merges_with_last_identity() {
        let events = vec![chunk(1, "Hello "), chunk(2, "world"), chunk(3, "!")];
        let view = consolidate_events_for_read(events);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].seq, 3);
        assert_eq!(payload::chunk_text(&view[0].payload), Some("Hello world!"));
    }

    #[test]
    fn test_different_chunk_kinds_do_not_merge() {
        let thought = ev(
            2,
            EventKind::AgentThoughtChunk,
            json!({
                "update": {
                    "sessionUpdate": "agent_thought_chunk",
                    "content": { "type": "text", "text": "thinking" }
                }
            }),
        );
        let view = consolidate_events_for_read(vec![chunk(1, "a"), thought, chunk(3, "b")]);
        assert_eq!(view.len(), 3);
    }

    #[test]
    fn test_tool_call_run_closed_by_terminal_status() {
        let events = vec![
            tool_call(1, "tc-1", "pending"),
            tool_update(2, "tc-1", "in_progress"),
            tool_update(3, "tc-1", "completed"),
            chunk(4, "after"),
        ];
        let view = consolidate_events_for_read(events);
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].kind, EventKind::ToolCall);
        assert_eq!(view[0].seq, 3);
        assert_eq!(view[0].payload["update"]["status"], "completed");
        assert_eq!(view[0].payload["update"]["sessionUpdate"], "tool_call");
    }

    #[test]
    fn test_unterminated_tool_call_run_emitted_unmerged() {
        let events = vec![
            tool_call(1, "tc-1", "pending"),
            tool_update(2, "tc-1", "in_progress"),
            ev(3, EventKind::UserMessage, json!({ "text": "interrupt" })),
        ];
        let view = consolidate_events_for_read(events);
        assert_eq!(view.len(), 3);
        assert_eq!(view[0].kind, EventKind::ToolCall);
        assert_eq!(view[1].kind, EventKind::ToolCallUpdate);
    }

    #[test]
    fn test_mismatched_tool_call_id_breaks_run() {
        let events = vec![tool_call(1, "tc-1", "pending"), tool_update(2, "tc-2", "completed")];
        let view = consolidate_events_for_read(events);
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn test_terminal_output_run_merges_by_terminal_id() {
        let term = |seq: i64, tid: &str, delta: &str| {
            ev(
                seq,
                EventKind::TerminalOutput,
                json!({ "terminalId": tid, "delta": delta, "truncated": false }),
            )
        };
        let events = vec![term(1, "t1", "a"), term(2, "t1", "b"), term(3, "t2", "c")];
        let view = consolidate_events_for_read(events);
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].payload["output"], "ab");
        assert_eq!(view[0].payload["truncated"], true);
        assert_eq!(view[0].seq, 2);
        assert_eq!(view[1].payload["delta"], "c");
    }

    #[test]
    fn test_usage_run_keeps_only_last() {
        let usage = |seq: i64, used: i64| {
            ev(
                seq,
                EventKind::UsageUpdate,
                json!({ "update": { "sessionUpdate": "usage_update", "used": used, "size": 100 } }),
            )
        };
        let view = consolidate_events_for_read(vec![usage(1, 10), usage(2, 20), usage(3, 30)]);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].seq, 3);
        assert_eq!(view[0].payload["update"]["used"], 30);
    }

    #[test]
    fn test_malformed_payloads_never_panic() {
        let events = vec![
            ev(1, EventKind::AgentMessageChunk, json!("not an object")),
            ev(2, EventKind::AgentMessageChunk, json!({ "update": 42 })),
            ev(3, EventKind::ToolCall, json!(null)),
            ev(4, EventKind::TerminalOutput, json!({ "delta": 7 })),
        ];
        let view = consolidate_events_for_read(events);
        // The two chunks still form a same-kind run; with no usable text the
        // merged event just carries an empty string. Nothing panics, nothing
        // else merges.
        assert_eq!(view.len(), 3);
        assert_eq!(payload::chunk_text(&view[0].payload), None);
        assert_eq!(view[0].payload["update"]["content"]["text"], "");
        assert_eq!(view[1].kind, EventKind::ToolCall);
        assert_eq!(view[2].kind, EventKind::TerminalOutput);
    }

    #[test]
    fn test_idempotent() {
        let events = vec![
            chunk(1, "Hello "),
            chunk(2, "world"),
            tool_call(3, "tc-1", "pending"),
            tool_update(4, "tc-1", "completed"),
            ev(5, EventKind::UserMessage, json!({ "text": "ok" })),
            ev(6, EventKind::AgentMessageChunk, payload::stub_payload()),
        ];
        let once = consolidate_events_for_read(events);
        let twice = consolidate_events_for_read(once.clone());
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.seq, b.seq);
            assert_eq!(a.payload, b.payload);
            assert_eq!(a.kind, b.kind);
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(consolidate_events_for_read(Vec::new()).is_empty());
    }
}
