use std::{
    fs::{self, DirEntry},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result, anyhow};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, RollingFileAppender},
};
use tracing::Span;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};
use uuid::Uuid;

use crate::{
    config::{LoggingConfig, LoggingRotation},
    types::OperatingMode,
};

pub const LOG_FILE_PREFIX: &str = "bulk-annotator.log";

/// Keeps the non-blocking file writer alive; drop it only after the run's last event.
pub struct LoggingGuard {
    _worker_guard: WorkerGuard,
    process_id: String,
}

impl LoggingGuard {
    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// Root span for one invocation; events recorded inside it carry the
    /// process id and collection key in the JSON span list.
    pub fn session_span(&self, collection_key: &str, mode: OperatingMode) -> Span {
        tracing::info_span!(
            target: "pipeline",
            "bulk_session",
            process_id = %self.process_id,
            collection_key = %collection_key,
            mode = ?mode
        )
    }
}

pub fn init_tracing(config: &LoggingConfig) -> Result<LoggingGuard> {
    if config.filter.trim().is_empty() {
        return Err(anyhow!("logging.filter cannot be empty"));
    }
    if config.dir.as_os_str().is_empty() {
        return Err(anyhow!("logging.dir cannot be empty"));
    }

    let log_dir = absolute_log_dir(&config.dir)?;
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create logging directory {}", log_dir.display()))?;

    let purge_warnings =
        purge_expired_logs(&log_dir, LOG_FILE_PREFIX, config.retention_days, SystemTime::now());
    let (writer, worker_guard) =
        tracing_appender::non_blocking(rolling_appender(&log_dir, &config.rotation));

    let json_layer = fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(parse_filter(&config.filter)?);

    let stderr_layer = config.stderr_warn_enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(LevelFilter::WARN)
    });

    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .context("failed to initialize tracing subscriber")?;

    let process_id = Uuid::now_v7().to_string();
    tracing::info!(
        target: "logging",
        process_id = %process_id,
        dir = %log_dir.display(),
        filter = %config.filter,
        rotation = ?config.rotation,
        retention_days = config.retention_days,
        "logging_initialized"
    );
    for warning in purge_warnings {
        tracing::warn!(target: "logging", warning = %warning, "log_purge_warning");
    }

    Ok(LoggingGuard {
        _worker_guard: worker_guard,
        process_id,
    })
}

fn parse_filter(filter: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(filter).with_context(|| format!("failed to parse logging.filter '{filter}'"))
}

fn rolling_appender(log_dir: &Path, rotation: &LoggingRotation) -> RollingFileAppender {
    match rotation {
        LoggingRotation::Daily => rolling::daily(log_dir, LOG_FILE_PREFIX),
        LoggingRotation::Hourly => rolling::hourly(log_dir, LOG_FILE_PREFIX),
    }
}

fn absolute_log_dir(dir: &Path) -> Result<PathBuf> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    Ok(std::env::current_dir()
        .context("failed to read current working directory for logging.dir")?
        .join(dir))
}

/// Removes `prefix*` files last modified before `now - retention_days`.
/// Failures never abort start-up; they come back as warnings.
fn purge_expired_logs(
    log_dir: &Path,
    prefix: &str,
    retention_days: usize,
    now: SystemTime,
) -> Vec<String> {
    let retention = Duration::from_secs(retention_days.saturating_mul(86_400) as u64);
    let cutoff = now.checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH);

    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(err) => return vec![format!("failed to scan {}: {err}", log_dir.display())],
    };

    let mut warnings = Vec::new();
    for entry in entries {
        let expired = entry
            .map_err(|err| format!("failed to read directory entry: {err}"))
            .and_then(|entry| expired_path(&entry, prefix, cutoff));
        match expired {
            Ok(Some(path)) => {
                if let Err(err) = fs::remove_file(&path) {
                    warnings.push(format!("failed to remove {}: {err}", path.display()));
                }
            }
            Ok(None) => {}
            Err(warning) => warnings.push(warning),
        }
    }
    warnings
}

fn expired_path(
    entry: &DirEntry,
    prefix: &str,
    cutoff: SystemTime,
) -> Result<Option<PathBuf>, String> {
    if !entry.file_name().to_string_lossy().starts_with(prefix) {
        return Ok(None);
    }

    let path = entry.path();
    let metadata = entry
        .metadata()
        .map_err(|err| format!("failed to stat {}: {err}", path.display()))?;
    if !metadata.is_file() {
        return Ok(None);
    }
    let modified = metadata
        .modified()
        .map_err(|err| format!("failed to read mtime for {}: {err}", path.display()))?;

    Ok((modified <= cutoff).then_some(path))
}
