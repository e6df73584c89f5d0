//! Logging for the session WAL
//!
//! The store emits structured tracing events as it works: migrations, opens,
//! revision bumps, archival, consolidation summaries. Hosts that want those
//! on disk call [`init`] once at startup; it writes daily-rotated files under
//! the XDG state directory and enforces the retention limit from
//! `[logging] max_files`.

use crate::config::Config;
use crate::error::Result;
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Rotated files are named `chronicle.log.<date>`.
const LOG_FILE_PREFIX: &str = "chronicle.log";

/// Install the global tracing subscriber for a host embedding the store.
///
/// The level comes from `RUST_LOG` when set, otherwise from the config. The
/// returned guard flushes buffered writes on drop; hold it for the process
/// lifetime.
pub fn init(config: &Config) -> Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;
    prune_rotated_logs(&log_dir, config.logging.max_files)?;

    let appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false).with_target(true))
        .init();

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.logging.level,
        database = %config.database_path().display(),
        strict_sessions = config.storage.strict_sessions,
        consolidation_enabled = config.consolidation.enabled,
        consolidation_interval_secs = config.consolidation.interval_secs,
        "logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Delete the oldest rotated log files beyond `max_files`.
///
/// The date suffix the daily rotation appends sorts lexicographically in
/// chronological order, so plain sorting finds the oldest files. Files that
/// do not carry the log prefix are left alone.
fn prune_rotated_logs(log_dir: &Path, max_files: usize) -> Result<()> {
    let mut logs: Vec<_> = std::fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().starts_with(LOG_FILE_PREFIX))
                .unwrap_or(false)
        })
        .collect();
    if logs.len() <= max_files {
        return Ok(());
    }

    logs.sort();
    let excess = logs.len() - max_files;
    for path in logs.into_iter().take(excess) {
        tracing::debug!(path = %path.display(), "pruning rotated log");
        std::fs::remove_file(path)?;
    }
    Ok(())
}

/// Keeps the non-blocking log writer alive; dropping it flushes pending
/// writes.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}
