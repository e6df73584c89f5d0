//! # chronicle-core
//!
//! Core library for chronicle - a recorder and replayer for interactive
//! agent sessions.
//!
//! This library provides:
//! - A durable per-session write-ahead log with strictly monotonic
//!   (session, revision, seq) numbering and consumer ack cursors
//! - Destructive consolidation that merges completed runs in place behind
//!   stub placeholders, plus an equivalent pure read-side view
//! - Archive tombstones and a discovered-session catalogue for the host's
//!   discovery UI
//!
//! ## Architecture
//!
//! The host service calls [`WalStore::ensure_session`] and then
//! [`WalStore::append_event`] for every event its agent produces. A
//! background task periodically consolidates runs belonging to completed
//! turns; readers page through [`WalStore::query_events`] and may apply
//! [`consolidate_events_for_read`] client-side to hide stubs and collapse
//! legacy runs.
//!
//! ## Example
//!
//! ```rust,no_run
//! use chronicle_core::{Config, WalStore};
//!
//! let config = Config::load().expect("failed to load config");
//! let store = WalStore::open(config.database_path()).expect("failed to open store");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use consolidate::consolidate_events_for_read;
pub use error::{Error, Result};
pub use store::{EventQuery, StoreOptions, StoreStats, WalStore};
pub use types::*;

// Public modules
pub mod config;
pub mod consolidate;
pub mod error;
pub mod logging;
pub mod store;
pub mod types;
