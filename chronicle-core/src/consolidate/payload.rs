//! Payload vocabulary shared by both consolidation paths
//!
//! The store treats payloads as opaque JSON, but consolidation depends on a
//! small, stable shape: chunk text under `update.content.text`, tool-call
//! fields under `update`, terminal output at the top level. Every accessor
//! here is total: a missing or wrong-typed field means the event simply
//! contributes nothing to a merge.

use serde_json::{json, Map, Value};

/// Key of the canonical stub marker.
const STUB_KEY: &str = "_c";

/// Terminal tool-call statuses; an update carrying one closes its run.
const TERMINAL_STATUSES: &[&str] = &["completed", "failed"];

/// The placeholder written over merged-away events: exactly `{"_c": true}`.
pub fn stub_payload() -> Value {
    json!({ "_c": true })
}

/// True iff the payload is the canonical stub: `{"_c": true}` with no other
/// keys. Readers rely on the single-key check, so the stub schema must never
/// widen.
pub fn is_stub(payload: &Value) -> bool {
    match payload.as_object() {
        Some(map) => map.len() == 1 && map.get(STUB_KEY) == Some(&Value::Bool(true)),
        None => false,
    }
}

/// Text carried by a chunk payload, or None when this event contributes
/// nothing: no `update.content`, a non-text content block, or an empty
/// string. Whitespace-only strings are preserved.
pub fn chunk_text(payload: &Value) -> Option<&str> {
    let content = payload.get("update")?.get("content")?;
    if content.get("type")?.as_str()? != "text" {
        return None;
    }
    let text = content.get("text")?.as_str()?;
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// `update.toolCallId` of a tool-call anchor or update payload
pub fn tool_call_id(payload: &Value) -> Option<&str> {
    payload.get("update")?.get("toolCallId")?.as_str()
}

/// `update.status` of a tool-call payload
pub fn tool_call_status(payload: &Value) -> Option<&str> {
    payload.get("update")?.get("status")?.as_str()
}

/// Whether the payload's status closes a tool-call run
pub fn has_terminal_status(payload: &Value) -> bool {
    tool_call_status(payload).is_some_and(|s| TERMINAL_STATUSES.contains(&s))
}

/// `terminalId` of a terminal-output payload
pub fn terminal_id(payload: &Value) -> Option<&str> {
    payload.get("terminalId")?.as_str()
}

/// Non-empty `delta` of a terminal-output payload
pub fn terminal_delta(payload: &Value) -> Option<&str> {
    let delta = payload.get("delta")?.as_str()?;
    if delta.is_empty() {
        None
    } else {
        Some(delta)
    }
}

/// `exitStatus` of a terminal-output payload; explicit JSON null counts as
/// absent
pub fn exit_status(payload: &Value) -> Option<&Value> {
    match payload.get("exitStatus") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value),
    }
}

/// Merge tool-call updates into the anchor.
///
/// Starts from the anchor's `update` object and copies over every update
/// field whose value is present and non-null, in order, so later updates
/// win. `sessionUpdate` is forced back to `"tool_call"`; the anchor's outer
/// envelope (`sessionId`, `_meta`, ...) is preserved.
pub fn merge_tool_call(anchor: &Value, updates: &[&Value]) -> Value {
    let mut inner: Map<String, Value> = anchor
        .get("update")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    for update in updates {
        if let Some(fields) = update.get("update").and_then(Value::as_object) {
            for (key, value) in fields {
                if !value.is_null() {
                    inner.insert(key.clone(), value.clone());
                }
            }
        }
    }
    inner.insert(
        "sessionUpdate".to_string(),
        Value::String("tool_call".to_string()),
    );

    let mut merged = anchor.clone();
    match merged.as_object_mut() {
        Some(outer) => {
            outer.insert("update".to_string(), Value::Object(inner));
            merged
        }
        None => json!({ "update": inner }),
    }
}

/// Merge a run of chunk payloads into one.
///
/// The result mirrors the first payload's envelope; its `update.content`
/// becomes a single text block holding the in-order concatenation of every
/// contributing chunk, and `update.sessionUpdate` is set to `kind`.
pub fn merge_chunks(first: &Value, all: &[&Value], kind: &str) -> Value {
    let text: String = all.iter().filter_map(|p| chunk_text(p)).collect();

    let mut inner: Map<String, Value> = first
        .get("update")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    inner.insert(
        "sessionUpdate".to_string(),
        Value::String(kind.to_string()),
    );
    inner.insert(
        "content".to_string(),
        json!({ "type": "text", "text": text }),
    );

    let mut merged = first.clone();
    match merged.as_object_mut() {
        Some(outer) => {
            outer.insert("update".to_string(), Value::Object(inner));
            merged
        }
        None => json!({ "update": inner }),
    }
}

/// Merge a run of terminal-output payloads into one.
///
/// `delta` and `output` both carry the full concatenation (so re-merging a
/// merged payload reproduces itself), `truncated` is set, and `exitStatus`
/// carries the last non-null value across the run, or is removed when none
/// exists.
pub fn merge_terminal_output(first: &Value, all: &[&Value]) -> Value {
    let output: String = all.iter().filter_map(|p| terminal_delta(p)).collect();
    let exit = all.iter().rev().find_map(|p| exit_status(p)).cloned();

    let mut outer: Map<String, Value> = first.as_object().cloned().unwrap_or_default();
    outer.insert("delta".to_string(), Value::String(output.clone()));
    outer.insert("output".to_string(), Value::String(output));
    outer.insert("truncated".to_string(), Value::Bool(true));
    match exit {
        Some(value) => {
            outer.insert("exitStatus".to_string(), value);
        }
        None => {
            outer.remove("exitStatus");
        }
    }
    Value::Object(outer)
}
