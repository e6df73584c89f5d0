//! Error types for chronicle-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the chronicle-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Operation requires an existing session row and none exists
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Unique or not-null constraint violated; indicates a bug or corruption
    /// when reached through the public API
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Disk or OS failure during read or write
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema migration failed; the database is left at the previous version
    #[error("migration to schema version {version} failed: {source}")]
    Migration {
        version: i64,
        source: rusqlite::Error,
    },

    /// Stored payload is not valid JSON
    #[error("payload of event {event_id} is not valid JSON: {source}")]
    PayloadEncoding {
        event_id: i64,
        source: serde_json::Error,
    },

    /// Operation after `close`
    #[error("store is closed")]
    StoreClosed,

    /// Second open of the same database path in the same process
    #[error("store already open at {}", .0.display())]
    AlreadyOpen(PathBuf),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Any other database error
    #[error("database error: {0}")]
    Database(rusqlite::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, ref message) = err {
            match code.code {
                rusqlite::ErrorCode::ConstraintViolation => {
                    return Error::ConstraintViolation(
                        message.clone().unwrap_or_else(|| code.to_string()),
                    );
                }
                rusqlite::ErrorCode::DiskFull
                | rusqlite::ErrorCode::CannotOpen
                | rusqlite::ErrorCode::PermissionDenied
                | rusqlite::ErrorCode::ReadOnly
                | rusqlite::ErrorCode::SystemIoFailure => {
                    return Error::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        err.to_string(),
                    ));
                }
                _ => {}
            }
        }
        Error::Database(err)
    }
}

/// Result type alias for chronicle-core
pub type Result<T> = std::result::Result<T, Error>;
