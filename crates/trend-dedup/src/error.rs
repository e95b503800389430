//! Error types for trend deduplication

use thiserror::Error;

/// Result type alias for deduplication operations
pub type Result<T> = std::result::Result<T, DedupError>;

/// Errors that can occur while deduplicating a run
#[derive(Error, Debug)]
pub enum DedupError {
  /// Invalid or missing configuration; aborts the run before any category is touched
  #[error("configuration error: {0}")]
  Configuration(String),

  /// Malformed input or output file; the category is skipped
  #[error("validation error: {0}")]
  Validation(String),

  /// Embedding provider failed after exhausting its retries
  #[error("embedding error: {0}")]
  Embedding(String),

  /// Vector store failure
  #[error("store error: {0}")]
  Store(String),

  /// Filesystem failure with the operation that caused it
  #[error("{context}: {source}")]
  Io {
    context: String,
    #[source]
    source: std::io::Error,
  },
}

impl DedupError {
  /// Only configuration problems stop a whole run
  pub fn is_fatal(&self) -> bool {
    matches!(self, DedupError::Configuration(_))
  }

  pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
    DedupError::Io { context: context.into(), source }
  }
}
