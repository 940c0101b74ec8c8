use std::{
    path::PathBuf,
    sync::{Mutex, PoisonError},
};

use tokio::sync::RwLock;
use tracing::Level;
use tracing::{debug, info, metadata::LevelFilter, trace};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::prelude::*;

/// The prefix of log files, a date is appended on rotation.
pub const LOG_FILE_PREFIX: &str = "serial-relay.log";

// File logging happens on a background thread until this is dropped.
static FILE_WRITER_GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);

fn file_writer_guard() -> std::sync::MutexGuard<'static, Option<WorkerGuard>> {
    FILE_WRITER_GUARD
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn do_init(stdout_level: Level, file_level: Option<(Level, PathBuf)>) {
    let mut message = String::from("Logging with:");

    // stdout
    message += " stdout";

    let stdout_layer =
        tracing_subscriber::fmt::layer().with_filter(LevelFilter::from(stdout_level));

    let registry = tracing_subscriber::registry().with(stdout_layer);

    let (maybe_file_layer, maybe_guard) = if let Some((level, output_dir)) = file_level {
        message += &format!(", file (in dir {output_dir:?})");

        let file_appender = RollingFileAppender::new(Rotation::DAILY, output_dir, LOG_FILE_PREFIX);
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_filter(LevelFilter::from(level));
        (Some(file_layer), Some(guard))
    } else {
        (None, None)
    };

    // Someone else (e.g. a test harness) might have set a subscriber already.
    if registry.with(maybe_file_layer).try_init().is_err() {
        message += " (a global subscriber was already set, keeping it)";
    } else if let Some(guard) = maybe_guard {
        *file_writer_guard() = Some(guard);
    }

    debug!(message);
}

/// Initialize tracing.
///
/// Will only initialize once, so tests may call this.
pub async fn init(stdout_level: Level, file_logging: Option<(Level, PathBuf)>) {
    static TRACING_IS_INITIALIZED: RwLock<bool> = RwLock::const_new(false);

    let initialized = { *TRACING_IS_INITIALIZED.read().await };

    if !initialized {
        let mut initialized = TRACING_IS_INITIALIZED.write().await;

        // To avoid race condition between the `.read()` and the
        // `.write()`.
        if *initialized {
            return;
        }

        do_init(stdout_level, file_logging);

        *initialized = true;
    }

    info!("Logging initialized");
}

/// Called right before exiting.
///
/// Flushes whatever the file log has buffered. Logging to file stops here,
/// stdout keeps working.
pub fn shutdown() {
    trace!("Shutting down");

    if let Some(guard) = file_writer_guard().take() {
        drop(guard);
        debug!("File log flushed");
    }
}
