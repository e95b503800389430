//! Run logging for batch jobs
//!
//! This module provides structured logging for one-shot batch runs with:
//! - JSONL disk storage, appended and never truncated
//! - A cloneable `Logger` handle carrying component and run context
//! - Console output through the bentley level functions (silent mode support)
//! - Timing of fallible async operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

// Types and Data Structures
// =========================

/// Severity of a log entry, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
  Verbose,
  Debug,
  Info,
  Success,
  Warn,
  Error,
}

impl Level {
  pub fn as_str(&self) -> &'static str {
    match self {
      Level::Verbose => "verbose",
      Level::Debug => "debug",
      Level::Info => "info",
      Level::Success => "success",
      Level::Warn => "warn",
      Level::Error => "error",
    }
  }
}

/// Where in a run a message was produced
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct LogContext {
  /// Identifier shared by every entry of one run
  #[serde(skip_serializing_if = "Option::is_none")]
  pub run_id: Option<String>,

  /// Feed date being processed
  #[serde(skip_serializing_if = "Option::is_none")]
  pub date: Option<String>,

  /// Category being processed
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,

  /// Operation in progress (read, select, record, rotate, ...)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub operation: Option<String>,
}

impl LogContext {
  pub fn is_empty(&self) -> bool {
    self.run_id.is_none()
      && self.date.is_none()
      && self.category.is_none()
      && self.operation.is_none()
  }

  /// Short human-readable tag for console lines, e.g. `[2025-01-02/ai]`
  fn console_tag(&self) -> Option<String> {
    match (&self.date, &self.category) {
      (Some(date), Some(category)) => Some(format!("[{date}/{category}]")),
      (None, Some(category)) => Some(format!("[{category}]")),
      (Some(date), None) => Some(format!("[{date}]")),
      (None, None) => None,
    }
  }
}

/// A structured log entry, one JSON object per line on disk
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogEntry {
  pub timestamp: DateTime<Utc>,
  pub level: Level,
  pub component: String,
  pub message: String,

  #[serde(default, skip_serializing_if = "LogContext::is_empty")]
  pub context: LogContext,
}

struct RunLogInner {
  log_file_path: PathBuf,
}

/// Thread-safe append-only JSONL log file
#[derive(Clone)]
pub struct RunLog {
  inner: Arc<Mutex<RunLogInner>>,
}

// Run Log Storage
// ===============

impl RunLogInner {
  fn new(log_file_path: &Path) -> std::io::Result<Self> {
    if let Some(parent) = log_file_path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    // Create file if it doesn't exist (but don't truncate if it does)
    OpenOptions::new().create(true).append(true).open(log_file_path)?;

    Ok(Self { log_file_path: log_file_path.to_path_buf() })
  }

  fn append(&mut self, entry: &LogEntry) -> std::io::Result<()> {
    let json_line = serde_json::to_string(entry)
      .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let mut file = OpenOptions::new().create(true).append(true).open(&self.log_file_path)?;
    writeln!(file, "{json_line}")?;
    file.flush()
  }

  fn read_entries(
    &self,
    limit: Option<usize>,
    level_filter: Option<Level>,
  ) -> std::io::Result<Vec<LogEntry>> {
    if !self.log_file_path.exists() {
      return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(&self.log_file_path)?);
    let mut entries = Vec::new();

    for line in reader.lines() {
      let line = line?;
      if line.trim().is_empty() {
        continue;
      }

      // Skip malformed lines
      let Ok(entry) = serde_json::from_str::<LogEntry>(&line) else {
        continue;
      };

      if level_filter.is_none_or(|level| entry.level >= level) {
        entries.push(entry);
      }
    }

    // Keep the most recent N entries, oldest first
    if let Some(limit) = limit {
      let skip = entries.len().saturating_sub(limit);
      entries.drain(..skip);
    }

    Ok(entries)
  }
}

impl RunLog {
  /// Open (or create) a run log at the given path, creating parent directories
  pub fn open<P: AsRef<Path>>(log_file_path: P) -> std::io::Result<Self> {
    let inner = RunLogInner::new(log_file_path.as_ref())?;
    Ok(Self { inner: Arc::new(Mutex::new(inner)) })
  }

  /// Append one entry to the log file
  pub fn append(&self, entry: &LogEntry) -> std::io::Result<()> {
    let mut guard = self.inner.lock().map_err(|_| poisoned())?;
    guard.append(entry)
  }

  /// Read entries back, optionally keeping only the most recent `limit`
  /// entries at or above `min_level`
  pub fn read_entries(
    &self,
    limit: Option<usize>,
    min_level: Option<Level>,
  ) -> std::io::Result<Vec<LogEntry>> {
    let guard = self.inner.lock().map_err(|_| poisoned())?;
    guard.read_entries(limit, min_level)
  }

  /// Path of the underlying log file
  pub fn path(&self) -> PathBuf {
    self
      .inner
      .lock()
      .map(|guard| guard.log_file_path.clone())
      .unwrap_or_default()
  }
}

fn poisoned() -> std::io::Error {
  std::io::Error::other("run log lock poisoned")
}

// Logger Handle
// =============

/// Context-carrying logger handed to each component at construction.
///
/// Cloning is cheap; derived loggers (`component`, `with_category`, ...) share
/// the same run log file.
#[derive(Clone)]
pub struct Logger {
  sink: Option<RunLog>,
  component: String,
  context: LogContext,
  verbose: bool,
  silent: bool,
}

impl Logger {
  /// Console-only logger for the named component
  pub fn new(component: &str) -> Self {
    Self {
      sink: None,
      component: component.to_string(),
      context: LogContext::default(),
      verbose: false,
      silent: false,
    }
  }

  /// Also append every message to the given run log
  pub fn with_run_log(mut self, run_log: RunLog) -> Self {
    self.sink = Some(run_log);
    self
  }

  /// Show debug and verbose messages on the console
  pub fn with_verbosity(mut self, verbose: bool) -> Self {
    self.verbose = verbose;
    self
  }

  /// Suppress console output; the run log still receives every entry
  pub fn silenced(mut self) -> Self {
    self.silent = true;
    self
  }

  pub fn with_run_id(&self, run_id: &str) -> Self {
    let mut logger = self.clone();
    logger.context.run_id = Some(run_id.to_string());
    logger
  }

  pub fn with_date(&self, date: impl Display) -> Self {
    let mut logger = self.clone();
    logger.context.date = Some(date.to_string());
    logger
  }

  pub fn with_category(&self, category: &str) -> Self {
    let mut logger = self.clone();
    logger.context.category = Some(category.to_string());
    logger
  }

  pub fn with_operation(&self, operation: &str) -> Self {
    let mut logger = self.clone();
    logger.context.operation = Some(operation.to_string());
    logger
  }

  /// Derive a logger for another component, keeping the context
  pub fn component(&self, component: &str) -> Self {
    let mut logger = self.clone();
    logger.component = component.to_string();
    logger
  }

  pub fn verbose(&self, message: &str) {
    self.emit(Level::Verbose, message);
  }

  pub fn debug(&self, message: &str) {
    self.emit(Level::Debug, message);
  }

  pub fn info(&self, message: &str) {
    self.emit(Level::Info, message);
  }

  pub fn success(&self, message: &str) {
    self.emit(Level::Success, message);
  }

  pub fn warn(&self, message: &str) {
    self.emit(Level::Warn, message);
  }

  pub fn error(&self, message: &str) {
    self.emit(Level::Error, message);
  }

  /// Run `operation`, logging entry and elapsed time, and the error on failure
  pub async fn timed<F, T, E>(&self, operation: &str, work: F) -> Result<T, E>
  where
    F: Future<Output = Result<T, E>>,
    E: Display,
  {
    let logger = self.with_operation(operation);
    logger.debug(&format!("Entering {operation}"));
    let started = Instant::now();

    let result = work.await;
    let elapsed = started.elapsed().as_secs_f64();

    match &result {
      Ok(_) => logger.debug(&format!("Completed {operation} in {elapsed:.2}s")),
      Err(e) => logger.error(&format!("Error in {operation} after {elapsed:.2}s: {e}")),
    }

    result
  }

  fn emit(&self, level: Level, message: &str) {
    if let Some(sink) = &self.sink {
      let entry = LogEntry {
        timestamp: Utc::now(),
        level,
        component: self.component.clone(),
        message: message.to_string(),
        context: self.context.clone(),
      };
      // Sink errors are dropped; console output still happens
      let _ = sink.append(&entry);
    }

    if self.silent || (!self.verbose && level < Level::Info) {
      return;
    }

    let line = match self.context.console_tag() {
      Some(tag) => format!("{tag} {message}"),
      None => message.to_string(),
    };

    match level {
      Level::Verbose => {
        crate::verbose!(&line);
      }
      Level::Debug => {
        crate::debug!(&line);
      }
      Level::Info => {
        crate::info!(&line);
      }
      Level::Success => {
        crate::success!(&line);
      }
      Level::Warn => {
        crate::warn!(&line);
      }
      Level::Error => {
        crate::error!(&line);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn temp_log_path() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let log_path = temp_dir.path().join("logs").join("run.log");
    (temp_dir, log_path)
  }

  #[test]
  fn test_open_creates_parent_directories_and_file() {
    let (_temp, path) = temp_log_path();
    let run_log = RunLog::open(&path).unwrap();
    assert!(path.exists());
    assert_eq!(run_log.path(), path);
  }

  #[test]
  fn test_open_does_not_truncate_existing_file() {
    let (_temp, path) = temp_log_path();
    let logger = Logger::new("test").silenced().with_run_log(RunLog::open(&path).unwrap());
    logger.info("first");

    let reopened = RunLog::open(&path).unwrap();
    let entries = reopened.read_entries(None, None).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "first");
  }

  #[test]
  fn test_logger_writes_context_to_file() {
    let (_temp, path) = temp_log_path();
    let run_log = RunLog::open(&path).unwrap();
    let logger = Logger::new("pipeline")
      .silenced()
      .with_run_log(run_log.clone())
      .with_run_id("run-1")
      .with_date("2025-03-01")
      .with_category("ai");

    logger.component("files").with_operation("rotate").warn("rotation incomplete");

    let entries = run_log.read_entries(None, None).unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.level, Level::Warn);
    assert_eq!(entry.component, "files");
    assert_eq!(entry.context.run_id.as_deref(), Some("run-1"));
    assert_eq!(entry.context.date.as_deref(), Some("2025-03-01"));
    assert_eq!(entry.context.category.as_deref(), Some("ai"));
    assert_eq!(entry.context.operation.as_deref(), Some("rotate"));
  }

  #[test]
  fn test_debug_entries_reach_file_even_when_not_verbose() {
    let (_temp, path) = temp_log_path();
    let run_log = RunLog::open(&path).unwrap();
    let logger = Logger::new("test").with_run_log(run_log.clone());

    logger.debug("diagnostic detail");

    let entries = run_log.read_entries(None, None).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].level, Level::Debug);
  }

  #[test]
  fn test_read_entries_level_filter_and_limit() {
    let (_temp, path) = temp_log_path();
    let run_log = RunLog::open(&path).unwrap();
    let logger = Logger::new("test").silenced().with_run_log(run_log.clone());

    logger.debug("d1");
    logger.info("i1");
    logger.warn("w1");
    logger.error("e1");
    logger.info("i2");

    let warnings = run_log.read_entries(None, Some(Level::Warn)).unwrap();
    let messages: Vec<_> = warnings.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["w1", "e1"]);

    let latest = run_log.read_entries(Some(2), None).unwrap();
    let messages: Vec<_> = latest.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["e1", "i2"]);
  }

  #[test]
  fn test_read_entries_skips_malformed_lines() {
    let (_temp, path) = temp_log_path();
    let run_log = RunLog::open(&path).unwrap();
    Logger::new("test").silenced().with_run_log(run_log.clone()).info("valid");

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    writeln!(file, "not json at all").unwrap();

    let entries = run_log.read_entries(None, None).unwrap();
    assert_eq!(entries.len(), 1);
  }

  #[test]
  fn test_empty_context_is_not_serialized() {
    let entry = LogEntry {
      timestamp: Utc::now(),
      level: Level::Info,
      component: "test".to_string(),
      message: "hello".to_string(),
      context: LogContext::default(),
    };
    let json = serde_json::to_string(&entry).unwrap();
    assert!(!json.contains("context"));
    assert!(json.contains("\"level\":\"info\""));
  }

  #[tokio::test]
  async fn test_timed_passes_result_through_and_logs_failure() {
    let (_temp, path) = temp_log_path();
    let run_log = RunLog::open(&path).unwrap();
    let logger = Logger::new("test").silenced().with_run_log(run_log.clone());

    let ok: Result<u32, String> = logger.timed("select", async { Ok(7) }).await;
    assert_eq!(ok.unwrap(), 7);

    let err: Result<u32, String> =
      logger.timed("rotate", async { Err("disk full".to_string()) }).await;
    assert!(err.is_err());

    let errors = run_log.read_entries(None, Some(Level::Error)).unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("Error in rotate"));
    assert!(errors[0].message.contains("disk full"));
    assert_eq!(errors[0].context.operation.as_deref(), Some("rotate"));
  }
}
