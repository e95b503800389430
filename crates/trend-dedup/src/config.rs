//! Configuration management for the deduplication run
//!
//! Handles loading and validating the YAML run configuration. Keys are
//! kebab-case and split across the `deduplication` and `tech-trend-analysis`
//! sections shared with the upstream analysis stage.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dedup::CheckFailurePolicy;
use crate::embeddings::RetryPolicy;
use crate::history::MatchScope;
use crate::store::StoreBackend;
use crate::{DedupError, Result};

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
  pub deduplication: DeduplicationSettings,
  pub tech_trend_analysis: AnalysisSettings,
}

/// Settings owned by the deduplication stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeduplicationSettings {
  /// Directory holding the persistent history store
  pub history_keywords: PathBuf,
  /// Name of the history collection (table name / log file stem)
  pub collection_name: String,
  /// Base directory for deduplicated output
  pub dedup_analysis_report: PathBuf,
  /// Similarity above which a candidate counts as a duplicate, in (0, 1]
  pub similarity_threshold: f32,
  /// Days a history record stays eligible for matching
  pub lookback_days: u32,
  /// Maximum number of trends selected per category
  pub target_count: usize,
  /// Log directory
  pub log: PathBuf,
  pub embedding_provider: String,
  pub embedding_model: String,
  /// Per-attempt embedding timeout in seconds
  #[serde(default = "default_timeout")]
  pub timeout: u64,
  /// Embedding attempts before giving up
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  /// Seconds to wait between attempts; the last value repeats
  #[serde(default = "default_retry_delays")]
  pub retry_delays: Vec<u64>,
  /// Vector size produced by the local hashing provider
  #[serde(default = "default_embedding_dimensions")]
  pub embedding_dimensions: usize,
  #[serde(default)]
  pub vector_store: StoreBackend,
  #[serde(default)]
  pub match_scope: MatchScope,
  #[serde(default)]
  pub on_check_failure: CheckFailurePolicy,
}

/// Paths shared with the analysis stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AnalysisSettings {
  /// Primary input location, replaced in place by rotation
  pub analysis_report: PathBuf,
  /// Backup location for pre-rotation originals
  pub org_analysis_report: PathBuf,
}

// Default value functions
fn default_timeout() -> u64 {
  60
}
fn default_max_retries() -> u32 {
  3
}
fn default_retry_delays() -> Vec<u64> {
  vec![1, 3, 5]
}
fn default_embedding_dimensions() -> usize {
  384
}

impl Config {
  /// Load and validate configuration from a YAML file
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
    let path = path.as_ref();

    if !path.exists() {
      return Err(DedupError::Configuration(format!(
        "Configuration file not found: {}",
        path.display()
      )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
      DedupError::Configuration(format!("Failed to read {}: {e}", path.display()))
    })?;

    Self::from_yaml_str(&content)
  }

  /// Parse and validate configuration from YAML text
  pub fn from_yaml_str(content: &str) -> Result<Self> {
    if content.trim().is_empty() {
      return Err(DedupError::Configuration("Configuration file is empty".to_string()));
    }

    let config: Config = serde_yaml::from_str(content)
      .map_err(|e| DedupError::Configuration(format!("Invalid configuration: {e}")))?;

    config.validate()?;
    Ok(config)
  }

  /// Check value ranges that the type system cannot express
  pub fn validate(&self) -> Result<()> {
    let settings = &self.deduplication;

    let threshold = settings.similarity_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
      return Err(DedupError::Configuration(format!(
        "deduplication.similarity-threshold must be in (0, 1], got {threshold}"
      )));
    }

    if settings.target_count == 0 {
      return Err(DedupError::Configuration(
        "deduplication.target-count must be greater than 0".to_string(),
      ));
    }

    if settings.max_retries == 0 {
      return Err(DedupError::Configuration(
        "deduplication.max-retries must be at least 1".to_string(),
      ));
    }

    if settings.embedding_dimensions == 0 {
      return Err(DedupError::Configuration(
        "deduplication.embedding-dimensions must be greater than 0".to_string(),
      ));
    }

    if settings.collection_name.trim().is_empty() {
      return Err(DedupError::Configuration(
        "deduplication.collection-name must not be empty".to_string(),
      ));
    }

    Ok(())
  }

  /// Retry policy applied at the embedding provider boundary
  pub fn retry_policy(&self) -> RetryPolicy {
    let delays =
      self.deduplication.retry_delays.iter().map(|secs| Duration::from_secs(*secs)).collect();
    RetryPolicy::new(self.deduplication.max_retries, delays)
      .with_timeout(Duration::from_secs(self.deduplication.timeout))
  }

  /// Path of the JSONL run log
  pub fn log_file(&self) -> PathBuf {
    self.deduplication.log.join("deduplication.log")
  }
}
