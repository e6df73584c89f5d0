//! Event consolidation
//!
//! Long sessions stream thousands of tiny events: text chunks, tool-call
//! updates, terminal deltas, usage snapshots. Consolidation keeps history
//! compact enough to scroll through without materialising every streamed
//! token, in two complementary forms:
//!
//! - **Destructive** ([`writer`]): the writer path merges a completed run in
//!   place (the anchor event receives the merged payload, the rest become
//!   stubs), so row counts, seq numbers and delivery cursors are untouched.
//! - **Read-side** ([`read`]): a pure view for replay that filters stubs and
//!   collapses runs the writer has not merged, with identical merge
//!   semantics.
//!
//! Run grouping on the writer path is the host's job (it tracks turns); the
//! destructive entry points only take the ids and payloads of one run.

pub mod payload;
pub mod read;
mod writer;

pub use read::consolidate_events_for_read;
