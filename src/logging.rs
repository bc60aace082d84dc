//! Tracing subscriber setup.
//!
//! Installs a global subscriber writing to stdout and, when enabled, to one log file per
//! process launch under the application logs directory. Only the newest
//! `max_log_files` launches are kept.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::SystemTime,
};

use time::{OffsetDateTime, UtcOffset, format_description::BorrowedFormatItem, macros::format_description};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use crate::app_dirs::{self, AppDirError};
use crate::config::LoggingSettings;

const LOG_FILE_PREFIX: &str = "mailtriage";
const LOG_EXTENSION: &str = "log";
const FILE_STAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
const LINE_STAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Holds the non-blocking writer guard for the lifetime of the process.
static INSTALLED: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Errors that may occur while initializing logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Log directory unavailable: {0}")]
    LogDir(#[from] AppDirError),
    #[error("Failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to format log filename time: {0}")]
    FormatTime(#[from] time::error::Format),
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

fn io_error(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> LoggingError {
    let path = path.to_path_buf();
    move |source| LoggingError::Io {
        action,
        path,
        source,
    }
}

/// Initialize tracing from the logging settings.
///
/// `RUST_LOG` overrides `settings.level`. Subsequent calls are no-ops.
pub fn init(settings: &LoggingSettings) -> Result<(), LoggingError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }
    let filter = env_filter(&settings.level);
    let stdout = fmt::layer().with_timer(line_timer()).with_writer(std::io::stdout);

    if !settings.log_to_file {
        tracing::subscriber::set_global_default(Registry::default().with(filter).with(stdout))?;
        let _ = INSTALLED.set(None);
        tracing::info!("Logging to stdout only");
        return Ok(());
    }

    let dir = app_dirs::logs_dir()?;
    let file_name = launch_file_name(
        OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc()),
    )?;
    let path = dir.join(&file_name);
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(io_error("create log file", &path))?;
    retain_newest_logs(&dir, settings.max_log_files.max(1))?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::never(&dir, file_name));
    let file = fmt::layer()
        .with_ansi(false)
        .with_timer(line_timer())
        .with_writer(writer);
    tracing::subscriber::set_global_default(
        Registry::default().with(filter).with(stdout).with(file),
    )?;
    let _ = INSTALLED.set(Some(guard));
    tracing::info!("Logging to {}", path.display());
    Ok(())
}

fn launch_file_name(now: OffsetDateTime) -> Result<String, LoggingError> {
    Ok(format!(
        "{LOG_FILE_PREFIX}_{}.{LOG_EXTENSION}",
        now.format(FILE_STAMP)?
    ))
}

/// Delete the least recently modified `.log` files so at most `keep` remain.
fn retain_newest_logs(dir: &Path, keep: usize) -> Result<(), LoggingError> {
    let mut logs: Vec<(SystemTime, PathBuf)> = fs::read_dir(dir)
        .map_err(io_error("read log directory", dir))?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file() && path.extension().is_some_and(|ext| ext == LOG_EXTENSION)
        })
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();
    if logs.len() <= keep {
        return Ok(());
    }
    logs.sort();
    let stale = logs.len() - keep;
    for (_, path) in logs.into_iter().take(stale) {
        fs::remove_file(&path).map_err(io_error("remove old log file", &path))?;
    }
    Ok(())
}

fn line_timer() -> fmt::time::OffsetTime<&'static [BorrowedFormatItem<'static>]> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    fmt::time::OffsetTime::new(offset, LINE_STAMP)
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
