// Unified logger - forwards to the `log` facade AND optionally persists to file
//
// Usage (anywhere in the crate):
//      ulog_info!("[pool] Created client {}", key);
//      ulog_warn!("[feishu] Token invalid: {}", err);
//
// Features:
// - Always forwards to the `log` crate; the embedding application picks the backend
// - Persists to {log_dir}/im-parrot-{YYYY-MM-DD}.log once `init_log_dir` has been called

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO ",
            LogLevel::Warn => "WARN ",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Single persisted log record
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: String,
}

/// Directory for persisted logs. Unset means stdout-only (via `log`).
static LOG_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Enable file persistence. Call once; later calls are ignored.
pub fn init_log_dir(dir: impl Into<PathBuf>) {
    if LOG_DIR.set(dir.into()).is_err() {
        log::warn!("[logger] Log directory already initialized");
    }
}

/// Get a day's log file path inside `dir`
fn log_file_path(dir: &Path, date: &str) -> PathBuf {
    dir.join(format!("im-parrot-{}.log", date))
}

fn format_line(entry: &LogEntry) -> String {
    format!(
        "{} [PARROT] [{}] {}\n",
        entry.timestamp,
        entry.level.as_str(),
        entry.message
    )
}

/// Append log entry to the day's log file
fn persist_log(dir: &Path, entry: &LogEntry) {
    if let Err(e) = fs::create_dir_all(dir) {
        log::error!("Failed to create logs directory: {}", e);
        return;
    }

    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let path = log_file_path(dir, &today);

    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(mut file) => {
            if let Err(e) = file.write_all(format_line(entry).as_bytes()) {
                log::error!("Failed to write to log file: {}", e);
            }
        }
        Err(e) => {
            log::error!("Failed to open log file: {}", e);
        }
    }
}

/// Create a log entry with current timestamp
pub fn create_log_entry(level: LogLevel, message: String) -> LogEntry {
    LogEntry {
        level,
        message,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

/// Log to the `log` facade, then to file when persistence is enabled.
pub fn unified_log(level: LogLevel, message: String) {
    match level {
        LogLevel::Info => log::info!("{}", message),
        LogLevel::Warn => log::warn!("{}", message),
        LogLevel::Error => log::error!("{}", message),
        LogLevel::Debug => log::debug!("{}", message),
    }
    if let Some(dir) = LOG_DIR.get() {
        persist_log(dir, &create_log_entry(level, message));
    }
}

/// Usage: ulog_info!("[module] message {}", arg);
#[macro_export]
macro_rules! ulog_info {
    ($($arg:tt)*) => {{
        $crate::logger::unified_log($crate::logger::LogLevel::Info, format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! ulog_warn {
    ($($arg:tt)*) => {{
        $crate::logger::unified_log($crate::logger::LogLevel::Warn, format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! ulog_error {
    ($($arg:tt)*) => {{
        $crate::logger::unified_log($crate::logger::LogLevel::Error, format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! ulog_debug {
    ($($arg:tt)*) => {{
        $crate::logger::unified_log($crate::logger::LogLevel::Debug, format!($($arg)*));
    }};
}
