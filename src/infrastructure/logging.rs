//! Logging system configuration and initialization
//!
//! - console and/or file output, plain or JSON
//! - file output through `tracing_appender` with rotation and startup cleanup
//! - `RUST_LOG` overrides the configured level and module filters

use anyhow::{Result, anyhow};
use chrono::Local;
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

// Global guard to keep the log file writer alive
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

/// Local wall-clock timestamps with milliseconds
struct LocalTimeFormatter;

impl FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f %:z"))
    }
}

/// Get the log directory relative to the executable location
pub fn get_log_directory() -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    exe_dir.join("logs")
}

/// Initialize the logging system with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(LoggingConfig::default())
}

/// Build the filter: `RUST_LOG` if set, otherwise the configured level with
/// the module overrides layered on top.
pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(&config.level).map_err(|e| anyhow!("Invalid log level '{}': {}", config.level, e))?;

    // Verbose dependencies stay quiet unless TRACE is requested
    if !config.level.eq_ignore_ascii_case("trace") {
        let mut targets: Vec<_> = config.module_filters.iter().collect();
        targets.sort();
        for (target, level) in targets {
            let directive = format!("{target}={level}")
                .parse()
                .map_err(|e| anyhow!("Invalid log filter '{}={}': {}", target, level, e))?;
            filter = filter.add_directive(directive);
        }
    }

    Ok(filter)
}

fn file_appender(log_dir: &Path, config: &LoggingConfig) -> rolling::RollingFileAppender {
    match config.rotation.as_str() {
        "never" => rolling::never(log_dir, &config.file_name),
        "hourly" => rolling::hourly(log_dir, &config.file_name),
        _ => rolling::daily(log_dir, &config.file_name),
    }
}

/// Initialize logging with custom configuration
///
/// Call once per process; a second call fails because a global subscriber
/// is already installed.
pub fn init_logging_with_config(config: LoggingConfig) -> Result<()> {
    if !config.file_output && !config.console_output {
        return Err(anyhow!("No logging output configured"));
    }

    let env_filter = build_env_filter(&config)?;
    let log_dir = config.log_dir.clone().unwrap_or_else(get_log_directory);

    let file_layer = if config.file_output {
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;
        if config.auto_cleanup_logs {
            cleanup_old_logs(&log_dir, &config)?;
        }

        let (file_writer, file_guard) = non_blocking(file_appender(&log_dir, &config));
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("Log guard registry poisoned"))?
            .push(file_guard);

        let layer = if config.json_format {
            fmt::Layer::new()
                .json()
                .with_writer(file_writer)
                .with_timer(LocalTimeFormatter)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .boxed()
        } else {
            fmt::Layer::new()
                .with_writer(file_writer)
                .with_timer(LocalTimeFormatter)
                .with_target(false)
                .with_ansi(false)
                .boxed()
        };
        Some(layer)
    } else {
        None
    };

    // Console goes to stderr so stdout stays reserved for report output
    let console_layer = config.console_output.then(|| {
        fmt::Layer::new()
            .with_writer(std::io::stderr)
            .with_timer(LocalTimeFormatter)
            .with_target(false)
            .boxed()
    });

    Registry::default()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    info!("Logging system initialized");
    info!("Log level: {}", config.level);
    if config.file_output {
        info!("Log directory: {:?}", log_dir);
        info!("JSON format: {}", config.json_format);
    }

    Ok(())
}

/// Remove the oldest rotated log files beyond `max_files`
fn cleanup_old_logs(log_dir: &Path, config: &LoggingConfig) -> Result<()> {
    let mut log_files = Vec::new();

    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_ours = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&config.file_name));
        if !path.is_file() || !is_ours {
            continue;
        }
        if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
            log_files.push((path, modified));
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(config.max_files) {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove old log file {:?}: {}", path, e);
        }
    }

    Ok(())
}

/// Log system information for diagnostics
pub fn log_system_info() {
    info!("=== pricewatch {} ===", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {:?}", current_dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.console_output);
        assert!(!config.file_output);
    }

    #[test]
    fn test_log_directory_is_deterministic() {
        assert!(get_log_directory().to_string_lossy().ends_with("logs"));
    }

    #[test]
    fn test_no_output_is_rejected() {
        let config = LoggingConfig {
            console_output: false,
            file_output: false,
            ..Default::default()
        };
        assert!(init_logging_with_config(config).is_err());
    }

    #[test]
    fn test_bad_module_filter_is_reported() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let mut config = LoggingConfig::default();
        config.module_filters.insert("reqwest".to_string(), "loud".to_string());
        assert!(build_env_filter(&config).is_err());
    }

    #[test]
    fn test_cleanup_keeps_newest_files() {
        let dir = TempDir::new().unwrap();
        let config = LoggingConfig {
            max_files: 2,
            ..Default::default()
        };
        for day in 1..=4 {
            std::fs::write(dir.path().join(format!("pricewatch.log.2026-01-0{day}")), "x").unwrap();
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        std::fs::write(dir.path().join("unrelated.txt"), "x").unwrap();

        cleanup_old_logs(dir.path(), &config).unwrap();

        let remaining: Vec<_> = std::fs::read_dir(dir.path()).unwrap().filter_map(|e| e.ok()).collect();
        assert_eq!(remaining.len(), 3);
        assert!(dir.path().join("pricewatch.log.2026-01-04").exists());
        assert!(dir.path().join("unrelated.txt").exists());
    }
}
