//! Core domain types for chronicle
//!
//! These types model the persistent record of an interactive agent session:
//! an append-only event log with per-revision sequence numbering, plus the
//! catalogue of sessions discovered on the host.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Session** | One interactive conversation with an agent, identified by an opaque id |
//! | **Revision** | Monotonically increasing integer per session; bumped when the agent reloads. Each revision has its own seq space starting at 1 |
//! | **Seq** | Per-(session, revision) gap-free counter, assigned on append |
//! | **Event** | One row in the log: an opaque JSON payload plus a kind discriminant |
//! | **Stub** | The placeholder payload `{"_c": true}` left behind by destructive consolidation |
//! | **Tombstone** | A row in `archived_session_ids` marking a session id as archived |
//! | **Ack cursor** | The largest seq a consumer has acknowledged for a (session, revision) |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default page size for [`EventQuery`](crate::store::EventQuery) when the
/// caller does not pass an explicit limit.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

// ============================================
// Session
// ============================================

/// A recorded agent session.
///
/// Created by `ensure_session`, mutated by metadata updates and revision
/// increments, removed only by archival (which leaves a tombstone behind).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session identifier (primary key)
    pub session_id: String,
    /// Opaque label of the machine the session runs on
    pub machine_id: String,
    /// Opaque label of the backend/agent flavour serving the session
    pub backend_id: String,
    /// Current revision; monotonically non-decreasing, never reused
    pub current_revision: i64,
    /// Working directory reported by the agent, if any
    pub cwd: Option<String>,
    /// Human-readable title, if any
    pub title: Option<String>,
    /// Last activity timestamp reported by the agent
    pub agent_updated_at: Option<DateTime<Utc>>,
    /// When the session row was created
    pub created_at: DateTime<Utc>,
    /// When the session row was last mutated
    pub updated_at: DateTime<Utc>,
}

// ============================================
// Events
// ============================================

/// Discriminant for what an event payload carries.
///
/// The closed set below covers everything the agent stream produces today;
/// unknown discriminants round-trip losslessly through [`EventKind::Other`]
/// so a newer writer never breaks an older reader.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A complete user prompt
    UserMessage,
    /// A streamed fragment of a user prompt
    UserMessageChunk,
    /// A streamed fragment of agent response text
    AgentMessageChunk,
    /// A streamed fragment of agent reasoning text
    AgentThoughtChunk,
    /// A tool invocation (run anchor)
    ToolCall,
    /// A field-level update to a previously announced tool call
    ToolCallUpdate,
    /// A chunk of embedded-terminal output
    TerminalOutput,
    /// A context-usage snapshot
    UsageUpdate,
    /// An agent plan revision
    PlanUpdate,
    /// A permission prompt surfaced to the user
    PermissionRequest,
    /// The agent switched operating mode
    CurrentModeUpdate,
    /// Marks the end of a logical turn
    TurnEnd,
    /// Any discriminant this version does not know about
    Other(String),
}

impl EventKind {
    /// Returns the identifier used in database storage
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::UserMessage => "user_message",
            EventKind::UserMessageChunk => "user_message_chunk",
            EventKind::AgentMessageChunk => "agent_message_chunk",
            EventKind::AgentThoughtChunk => "agent_thought_chunk",
            EventKind::ToolCall => "tool_call",
            EventKind::ToolCallUpdate => "tool_call_update",
            EventKind::TerminalOutput => "terminal_output",
            EventKind::UsageUpdate => "usage_update",
            EventKind::PlanUpdate => "plan_update",
            EventKind::PermissionRequest => "permission_request",
            EventKind::CurrentModeUpdate => "current_mode_update",
            EventKind::TurnEnd => "turn_end",
            EventKind::Other(s) => s,
        }
    }

    /// True for the streamed-text kinds that chunk consolidation merges
    pub fn is_chunk(&self) -> bool {
        matches!(
            self,
            EventKind::UserMessageChunk
                | EventKind::AgentMessageChunk
                | EventKind::AgentThoughtChunk
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        match s {
            "user_message" => EventKind::UserMessage,
            "user_message_chunk" => EventKind::UserMessageChunk,
            "agent_message_chunk" => EventKind::AgentMessageChunk,
            "agent_thought_chunk" => EventKind::AgentThoughtChunk,
            "tool_call" => EventKind::ToolCall,
            "tool_call_update" => EventKind::ToolCallUpdate,
            "terminal_output" => EventKind::TerminalOutput,
            "usage_update" => EventKind::UsageUpdate,
            "plan_update" => EventKind::PlanUpdate,
            "permission_request" => EventKind::PermissionRequest,
            "current_mode_update" => EventKind::CurrentModeUpdate,
            "turn_end" => EventKind::TurnEnd,
            other => EventKind::Other(other.to_string()),
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EventKind::from(s))
    }
}

impl Serialize for EventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(EventKind::from(s.as_str()))
    }
}

/// One row in a session's event log.
///
/// The logical identity is the triple (`session_id`, `revision`, `seq`),
/// which is unique; `id` is the global storage key used by consolidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Auto-increment storage id, globally unique
    pub id: i64,
    /// Owning session
    pub session_id: String,
    /// Revision this event was appended under
    pub revision: i64,
    /// Gap-free position within (session, revision), starting at 1
    pub seq: i64,
    /// Payload discriminant
    pub kind: EventKind,
    /// Opaque JSON payload
    pub payload: serde_json::Value,
    /// When the event was appended
    pub created_at: DateTime<Utc>,
    /// When the event was acknowledged by a consumer, if ever
    pub acked_at: Option<DateTime<Utc>>,
    /// When destructive consolidation rewrote this event, if ever
    pub compacted_at: Option<DateTime<Utc>>,
}

// ============================================
// Discovered sessions
// ============================================

/// A session seen on the host, cached for the discovery UI.
///
/// This is an external catalogue: a discovered session may or may not have a
/// [`Session`] row of its own. Archived ids never surface in discovery
/// results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredSession {
    /// Opaque session identifier (primary key)
    pub session_id: String,
    /// Backend the session was discovered under
    pub backend_id: String,
    /// Working directory, if known
    pub cwd: Option<String>,
    /// Title, if known
    pub title: Option<String>,
    /// Last activity reported by the agent, if known
    pub agent_updated_at: Option<DateTime<Utc>>,
    /// When the session was first discovered
    pub discovered_at: DateTime<Utc>,
    /// When the discovery scanner last confirmed the session exists
    pub last_verified_at: Option<DateTime<Utc>>,
    /// Set when a scan no longer finds the session
    pub is_stale: bool,
}

// ============================================
// Compaction audit log
// ============================================

/// Which destructive consolidation produced a [`CompactionLogEntry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOperation {
    /// Tool-call anchor merged with its updates
    ToolCallMerge,
    /// Streamed text chunks concatenated into the first event
    ChunkMerge,
    /// Terminal-output deltas concatenated into the first event
    TerminalOutputMerge,
    /// Usage snapshots deduplicated down to the latest
    UsageDedup,
    /// An operation this version does not know about
    Other(String),
}

impl CompactionOperation {
    /// Returns the identifier used in database storage
    pub fn as_str(&self) -> &str {
        match self {
            CompactionOperation::ToolCallMerge => "tool_call_merge",
            CompactionOperation::ChunkMerge => "chunk_merge",
            CompactionOperation::TerminalOutputMerge => "terminal_output_merge",
            CompactionOperation::UsageDedup => "usage_dedup",
            CompactionOperation::Other(s) => s,
        }
    }
}

impl std::fmt::Display for CompactionOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for CompactionOperation {
    fn from(s: &str) -> Self {
        match s {
            "tool_call_merge" => CompactionOperation::ToolCallMerge,
            "chunk_merge" => CompactionOperation::ChunkMerge,
            "terminal_output_merge" => CompactionOperation::TerminalOutputMerge,
            "usage_dedup" => CompactionOperation::UsageDedup,
            other => CompactionOperation::Other(other.to_string()),
        }
    }
}

/// Audit record for one destructive consolidation call.
///
/// Informational only; no read path depends on it.
#[derive(Debug, Clone)]
pub struct CompactionLogEntry {
    /// Auto-increment id
    pub id: i64,
    /// Session the consolidation ran against
    pub session_id: String,
    /// Revision, when it could be resolved from the anchor event
    pub revision: Option<i64>,
    /// Which consolidation ran
    pub operation: CompactionOperation,
    /// Number of rows whose payload was rewritten (anchor plus stubs)
    pub events_affected: i64,
    /// When the consolidation started
    pub started_at: DateTime<Utc>,
    /// When it committed
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_round_trip() {
        let kinds = [
            "user_message",
            "user_message_chunk",
            "agent_message_chunk",
            "agent_thought_chunk",
            "tool_call",
            "tool_call_update",
            "terminal_output",
            "usage_update",
            "plan_update",
            "permission_request",
            "current_mode_update",
            "turn_end",
        ];
        for s in kinds {
            let kind = EventKind::from(s);
            assert!(!matches!(kind, EventKind::Other(_)), "{} should be known", s);
            assert_eq!(kind.as_str(), s);
        }
    }

    #[test]
    fn test_event_kind_unknown_preserved() {
        let kind = EventKind::from("mystery_update");
        assert_eq!(kind, EventKind::Other("mystery_update".to_string()));
        assert_eq!(kind.as_str(), "mystery_update");
    }

    #[test]
    fn test_chunk_kinds() {
        assert!(EventKind::AgentMessageChunk.is_chunk());
        assert!(EventKind::AgentThoughtChunk.is_chunk());
        assert!(EventKind::UserMessageChunk.is_chunk());
        assert!(!EventKind::ToolCall.is_chunk());
        assert!(!EventKind::UserMessage.is_chunk());
    }

    #[test]
    fn test_event_kind_serde_as_string() {
        let json = serde_json::to_string(&EventKind::ToolCall).unwrap();
        assert_eq!(json, "\"tool_call\"");
        let back: EventKind = serde_json::from_str("\"agent_message_chunk\"").unwrap();
        assert_eq!(back, EventKind::AgentMessageChunk);
    }
}
