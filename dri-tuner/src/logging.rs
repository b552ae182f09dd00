//! Log output with console and rotated file sinks.
//!
//! The core logs through the `log` facade. Hosts that want the standard
//! output call [`init_logging`], which installs a `tracing` subscriber and
//! bridges `log` records into it.

use std::fs;
use std::io;
use std::path::Path;

use chrono::Local;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Base file name of the rotated log.
const LOG_FILE_NAME: &str = "dri-tuner.log";

/// Install the global subscriber.
///
/// Console output is compact; the daily file carries thread ids and source
/// locations. Files older than `retention_days` are removed first.
pub fn init_logging(
    log_dir: &Path,
    retention_days: u64,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    install(log_dir, retention_days, env_filter)
}

/// [`init_logging`] driven by the `[logging]` configuration section.
///
/// A configured `level` takes precedence over `RUST_LOG`.
pub fn init_from_config(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    install(&config.log_dir, config.retention_days, config_filter(config)?)
}

/// Filter for a `[logging]` section: its `level` directives when set,
/// otherwise `RUST_LOG`, otherwise `info`.
fn config_filter(config: &LoggingConfig) -> Result<EnvFilter, Box<dyn std::error::Error>> {
    match &config.level {
        Some(level) => EnvFilter::try_new(level)
            .map_err(|e| Box::<dyn std::error::Error>::from(format!("Invalid log level {:?}: {}", level, e))),
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
    }
}

fn install(
    log_dir: &Path,
    retention_days: u64,
    env_filter: EnvFilter,
) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(log_dir)?;
    clean_old_logs(log_dir, retention_days)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // The writer must outlive every log call.
    Box::leak(Box::new(guard));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(io::stdout)
                .with_target(true)
                .with_level(true)
                .with_timer(LocalTimeTimer),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_timer(LocalTimeTimer),
        );

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to set default subscriber: {}", e))?;
    tracing_log::LogTracer::init().map_err(|e| format!("Failed to initialize LogTracer: {}", e))?;

    Ok(())
}

/// Remove rotated log files last modified before the retention window.
pub fn clean_old_logs(log_dir: &Path, retention_days: u64) -> io::Result<()> {
    if !log_dir.exists() {
        return Ok(());
    }

    let cutoff = Local::now() - chrono::Duration::days(retention_days as i64);

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.contains(LOG_FILE_NAME));
        if !path.is_file() || !is_log {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => chrono::DateTime::<Local>::from(modified),
            Err(_) => continue,
        };
        if modified < cutoff {
            if let Err(e) = fs::remove_file(&path) {
                eprintln!("Failed to remove old log file {:?}: {}", path, e);
            }
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct LocalTimeTimer;

impl fmt::time::FormatTime for LocalTimeTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.6f"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_keeps_fresh_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join(format!("{}.2026-10-19", LOG_FILE_NAME));
        let foreign = dir.path().join("notes.txt");
        fs::write(&fresh, b"x").unwrap();
        fs::write(&foreign, b"y").unwrap();

        clean_old_logs(dir.path(), 7).unwrap();
        assert!(fresh.exists());
        assert!(foreign.exists());
    }

    #[test]
    fn test_configured_level_builds_filter() {
        let config = LoggingConfig {
            level: Some("dri_tuner=debug".to_string()),
            ..LoggingConfig::default()
        };
        let filter = config_filter(&config).unwrap();
        assert_eq!(
            filter.max_level_hint(),
            Some(tracing_subscriber::filter::LevelFilter::DEBUG)
        );

        let config = LoggingConfig {
            level: Some("dri_tuner=loud".to_string()),
            ..LoggingConfig::default()
        };
        assert!(config_filter(&config).is_err());
    }

    #[test]
    fn test_clean_missing_dir_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(clean_old_logs(&dir.path().join("absent"), 7).is_ok());
    }
}
