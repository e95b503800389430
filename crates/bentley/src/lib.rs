//! ## Features
//!
//! - Standard logging levels (verbose, debug, info, success, warn, error)
//! - Multi-line message support with consistent formatting
//! - All console output to stderr
//! - Append-only JSONL run logs with per-message context (see [`run_log`])
//!
//! ## Usage
//!
//! Console functions: `info()`, `warn()`, `error()`, `debug()`, `verbose()`, `success()`
//!
//! Components of a batch job take a [`run_log::Logger`] at construction and log
//! through it so every line carries the run, date and category it belongs to.

use colored::*;

pub mod run_log;

pub use run_log::{Level, LogContext, LogEntry, Logger, RunLog};

/// Core logging function that handles the actual output
pub fn log(message: &str) {
  for line in message.lines() {
    eprintln!("{line}");
  }
}

/// Format a colored prefix for log messages
fn format_prefix(color: Color, prefix: &str) -> String {
  let width = 7usize.saturating_sub(prefix.len() + 2);
  format!("[{}]{:<width$}", prefix.color(color).bold(), "")
}

fn log_with_prefix(color: Color, prefix: &str, message: &str) {
  let prefix = format_prefix(color, prefix);
  for line in message.lines() {
    log(&format!("{prefix} {line}"));
  }
}

pub fn verbose(message: &str) {
  log_with_prefix(Color::Cyan, "verb", message);
}

/// Info level logging - general information
pub fn info(message: &str) {
  log_with_prefix(Color::Blue, "info", message);
}

/// Warning level logging - something needs attention
pub fn warn(message: &str) {
  log_with_prefix(Color::Yellow, "warn", message);
}

/// Error level logging - something went wrong
pub fn error(message: &str) {
  log_with_prefix(Color::Red, "error", message);
}

/// Debug level logging - detailed diagnostic information
pub fn debug(message: &str) {
  log_with_prefix(Color::Magenta, "debug", message);
}

/// Success level logging - something completed successfully
pub fn success(message: &str) {
  log_with_prefix(Color::Green, "sccs", message);
}

/// Macros for coverage-excluded logging - these expand with LCOV_EXCL_LINE at call sites
#[macro_export]
macro_rules! info {
  ($msg:expr) => {
    $crate::info($msg); // LCOV_EXCL_LINE
  };
}

#[macro_export]
macro_rules! warn {
  ($msg:expr) => {
    $crate::warn($msg); // LCOV_EXCL_LINE
  };
}

#[macro_export]
macro_rules! error {
  ($msg:expr) => {
    $crate::error($msg); // LCOV_EXCL_LINE
  };
}

#[macro_export]
macro_rules! verbose {
  ($msg:expr) => {
    $crate::verbose($msg); // LCOV_EXCL_LINE
  };
}

#[macro_export]
macro_rules! debug {
  ($msg:expr) => {
    $crate::debug($msg); // LCOV_EXCL_LINE
  };
}

#[macro_export]
macro_rules! success {
  ($msg:expr) => {
    $crate::success($msg); // LCOV_EXCL_LINE
  };
}
