//! Logging for the store
//!
//! The admin binary logs to `~/.local/state/backpacktrack/backpacktrack.log`
//! (XDG state dir), rotated daily. Tests log through the test writer, with
//! a close event for every span so migration timings show up.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_PREFIX: &str = "backpacktrack.log";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.level`. At most `config.max_files` rotated
/// files are kept. Hold the returned guard until exit or buffered lines are
/// lost.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {}", e)))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter_or(&config.level))
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_span_events(FmtSpan::CLOSE),
        )
        .init();

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        max_files = config.max_files,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Log to the test harness. Safe to call from every test.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_or("backpack_core=debug"))
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

fn filter_or(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Flushes pending log lines when dropped.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

pub fn log_file_path() -> PathBuf {
    Config::log_path()
}
