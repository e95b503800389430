//! Trend file layout and the rotation protocol
//!
//! Three trees share the `{base}/{date}/{category}.json` layout:
//! - analysis: the primary input, replaced in place by rotation
//! - dedup: filtered output, plus a `.{category}.done` marker once rotation
//!   has finished
//! - org: backups of the pre-rotation originals
//!
//! Every write goes through a temp file that is fsynced and renamed into
//! place, so readers never observe a partially written file.

use chrono::{NaiveDate, Utc};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::models::TrendBatch;
use crate::{DedupError, Result};

/// Write `bytes` to `path` atomically, creating parent directories
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
  write_staged(path, bytes, "tmp")
}

fn write_staged(path: &Path, bytes: &[u8], suffix: &str) -> Result<()> {
  let parent = path.parent().unwrap_or_else(|| Path::new("."));
  fs::create_dir_all(parent)
    .map_err(|e| DedupError::io(format!("creating directory {}", parent.display()), e))?;

  let file_name = path.file_name().map(|name| name.to_string_lossy()).unwrap_or_default();
  let staged = parent.join(format!(".{file_name}.{suffix}"));

  let mut file = File::create(&staged)
    .map_err(|e| DedupError::io(format!("creating {}", staged.display()), e))?;
  file.write_all(bytes).map_err(|e| DedupError::io(format!("writing {}", staged.display()), e))?;
  file.sync_all().map_err(|e| DedupError::io(format!("syncing {}", staged.display()), e))?;
  drop(file);

  if let Err(e) = fs::rename(&staged, path) {
    let _ = fs::remove_file(&staged);
    return Err(DedupError::io(format!("replacing {}", path.display()), e));
  }

  sync_dir(parent);
  Ok(())
}

/// Make a rename durable. Not every platform can open a directory for syncing.
fn sync_dir(dir: &Path) {
  if let Ok(handle) = File::open(dir) {
    let _ = handle.sync_all();
  }
}

pub struct TrendFiles {
  analysis_base: PathBuf,
  dedup_base: PathBuf,
  org_base: PathBuf,
  log: bentley::Logger,
}

impl TrendFiles {
  pub fn new(
    analysis_base: impl Into<PathBuf>,
    dedup_base: impl Into<PathBuf>,
    org_base: impl Into<PathBuf>,
    log: &bentley::Logger,
  ) -> Self {
    Self {
      analysis_base: analysis_base.into(),
      dedup_base: dedup_base.into(),
      org_base: org_base.into(),
      log: log.component("files"),
    }
  }

  pub fn from_config(config: &Config, log: &bentley::Logger) -> Self {
    Self::new(
      &config.tech_trend_analysis.analysis_report,
      &config.deduplication.dedup_analysis_report,
      &config.tech_trend_analysis.org_analysis_report,
      log,
    )
  }

  pub fn input_path(&self, date: NaiveDate, category: &str) -> PathBuf {
    date_dir(&self.analysis_base, date).join(format!("{category}.json"))
  }

  pub fn output_path(&self, date: NaiveDate, category: &str) -> PathBuf {
    date_dir(&self.dedup_base, date).join(format!("{category}.json"))
  }

  pub fn backup_path(&self, date: NaiveDate, category: &str) -> PathBuf {
    date_dir(&self.org_base, date).join(format!("{category}.json"))
  }

  pub fn marker_path(&self, date: NaiveDate, category: &str) -> PathBuf {
    date_dir(&self.dedup_base, date).join(format!(".{category}.done"))
  }

  /// Category names with an input file for `date`, sorted
  pub fn categories(&self, date: NaiveDate) -> Result<Vec<String>> {
    let dir = date_dir(&self.analysis_base, date);
    if !dir.is_dir() {
      self.log.warn(&format!("No analysis directory found for {date}"));
      return Ok(Vec::new());
    }

    let entries =
      fs::read_dir(&dir).map_err(|e| DedupError::io(format!("listing {}", dir.display()), e))?;

    let mut categories = Vec::new();
    for entry in entries {
      let path = entry.map_err(|e| DedupError::io(format!("listing {}", dir.display()), e))?.path();
      if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("json") {
        continue;
      }
      match path.file_stem().and_then(|stem| stem.to_str()) {
        Some(stem) if !stem.starts_with('.') => categories.push(stem.to_string()),
        _ => {}
      }
    }

    categories.sort();
    self.log.info(&format!("Found {} categories for {date}", categories.len()));
    Ok(categories)
  }

  /// Read the input batch, `None` when there is no input file
  pub fn read_batch(&self, date: NaiveDate, category: &str) -> Result<Option<TrendBatch>> {
    let path = self.input_path(date, category);
    if !path.exists() {
      self.log.warn(&format!("Input file not found: {}", path.display()));
      return Ok(None);
    }

    let batch = read_json(&path)?;
    self.log.info(&format!("Read {} trends from {category} ({date})", batch.len()));
    Ok(Some(batch))
  }

  /// Read a previously written dedup output, `None` when absent
  pub fn read_output(&self, date: NaiveDate, category: &str) -> Result<Option<TrendBatch>> {
    let path = self.output_path(date, category);
    if !path.exists() {
      return Ok(None);
    }
    read_json(&path).map(Some)
  }

  /// Write the filtered batch to the dedup tree for `(date, category)`
  pub fn write_output(
    &self,
    date: NaiveDate,
    category: &str,
    batch: &TrendBatch,
  ) -> Result<PathBuf> {
    let path = self.output_path(date, category);
    let json = serde_json::to_string_pretty(batch)
      .map_err(|e| DedupError::Validation(format!("Failed to serialize {category}: {e}")))?;

    write_atomic(&path, json.as_bytes())?;
    self.log.info(&format!("Wrote {} trends to {}", batch.len(), path.display()));
    Ok(path)
  }

  /// Publish the dedup output into the input location.
  ///
  /// 1. Back up the input to the org tree, unless a backup already exists.
  /// 2. Atomically replace the input with a staged copy of the output.
  /// 3. Write the completion marker.
  ///
  /// Safe to re-run after a crash at any point: an existing backup is never
  /// overwritten, and the input path holds either the original or the
  /// filtered content at every instant.
  pub fn rotate(&self, date: NaiveDate, category: &str) -> Result<()> {
    let input = self.input_path(date, category);
    let output = self.output_path(date, category);
    let backup = self.backup_path(date, category);

    if backup.exists() {
      self.log.info(&format!("Keeping existing backup {}", backup.display()));
    } else {
      let original = fs::read(&input)
        .map_err(|e| DedupError::io(format!("reading original {}", input.display()), e))?;
      write_atomic(&backup, &original)?;
      self.log.info(&format!("Backed up original to {}", backup.display()));
    }

    let filtered =
      fs::read(&output).map_err(|e| DedupError::io(format!("reading {}", output.display()), e))?;
    write_staged(&input, &filtered, "rotating")?;
    self.log.info(&format!("Replaced {} with deduplicated output", input.display()));

    write_atomic(&self.marker_path(date, category), Utc::now().to_rfc3339().as_bytes())?;
    self.log.info(&format!("Rotation complete for {category} ({date})"));
    Ok(())
  }

  /// Whether the dedup output exists; says nothing about rotation
  pub fn category_completed(&self, date: NaiveDate, category: &str) -> bool {
    self.output_path(date, category).exists()
  }

  /// Whether rotation for `(date, category)` ran to completion
  pub fn rotation_finished(&self, date: NaiveDate, category: &str) -> bool {
    self.marker_path(date, category).exists()
  }
}

fn date_dir(base: &Path, date: NaiveDate) -> PathBuf {
  base.join(date.format("%Y-%m-%d").to_string())
}

fn read_json(path: &Path) -> Result<TrendBatch> {
  let content = fs::read_to_string(path)
    .map_err(|e| DedupError::io(format!("reading {}", path.display()), e))?;
  serde_json::from_str(&content)
    .map_err(|e| DedupError::Validation(format!("Invalid trend file {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::Trend;
  use tempfile::TempDir;

  fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
  }

  fn files(root: &Path) -> TrendFiles {
    let log = bentley::Logger::new("test").silenced();
    TrendFiles::new(root.join("analysis"), root.join("dedup"), root.join("org"), &log)
  }

  fn trend(topic: &str, score: i64) -> Trend {
    Trend {
      topic: topic.to_string(),
      reason: "über wichtig".to_string(),
      score,
      links: vec!["https://example.com".to_string()],
      search_keywords: vec!["k".to_string()],
    }
  }

  fn write_input(files: &TrendFiles, category: &str, content: &str) {
    let path = files.input_path(date(), category);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
  }

  const INPUT: &str = r#"{
  "feed_date": "2025-03-10",
  "category": "ai",
  "trends": [
    {"topic": "Agents", "reason": "r", "score": 9, "links": [], "search_keywords": ["llm"]},
    {"topic": "RAG", "reason": "r", "score": 4, "links": [], "search_keywords": []}
  ]
}"#;

  #[test]
  fn test_paths_follow_date_layout() {
    let temp = TempDir::new().unwrap();
    let files = files(temp.path());
    assert_eq!(files.input_path(date(), "ai"), temp.path().join("analysis/2025-03-10/ai.json"));
    assert_eq!(files.output_path(date(), "ai"), temp.path().join("dedup/2025-03-10/ai.json"));
    assert_eq!(files.backup_path(date(), "ai"), temp.path().join("org/2025-03-10/ai.json"));
    assert_eq!(files.marker_path(date(), "ai"), temp.path().join("dedup/2025-03-10/.ai.done"));
  }

  #[test]
  fn test_categories_sorted_json_stems() {
    let temp = TempDir::new().unwrap();
    let files = files(temp.path());
    write_input(&files, "web", "{}");
    write_input(&files, "ai", "{}");
    let dir = files.input_path(date(), "x").parent().unwrap().to_path_buf();
    fs::write(dir.join("notes.txt"), "").unwrap();
    fs::write(dir.join(".ai.json.rotating"), "").unwrap();

    assert_eq!(files.categories(date()).unwrap(), vec!["ai", "web"]);
  }

  #[test]
  fn test_categories_missing_directory_is_empty() {
    let temp = TempDir::new().unwrap();
    assert!(files(temp.path()).categories(date()).unwrap().is_empty());
  }

  #[test]
  fn test_read_batch() {
    let temp = TempDir::new().unwrap();
    let files = files(temp.path());
    assert!(files.read_batch(date(), "ai").unwrap().is_none());

    write_input(&files, "ai", INPUT);
    let batch = files.read_batch(date(), "ai").unwrap().unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.trends[0].topic, "Agents");
  }

  #[test]
  fn test_malformed_input_is_validation_error() {
    let temp = TempDir::new().unwrap();
    let files = files(temp.path());

    write_input(&files, "ai", "{\"feed_date\": \"2025-03-10\"");
    let err = files.read_batch(date(), "ai").unwrap_err();
    assert!(matches!(err, DedupError::Validation(_)));

    write_input(&files, "ai", r#"{"feed_date": "2025-03-10", "category": "ai"}"#);
    assert!(matches!(files.read_batch(date(), "ai").unwrap_err(), DedupError::Validation(_)));

    write_input(&files, "ai", r#"{"feed_date": "10/03/2025", "category": "ai", "trends": []}"#);
    assert!(matches!(files.read_batch(date(), "ai").unwrap_err(), DedupError::Validation(_)));
  }

  #[test]
  fn test_write_output_is_pretty_unescaped_json() {
    let temp = TempDir::new().unwrap();
    let files = files(temp.path());
    let batch = TrendBatch::new(date(), "ai", vec![trend("Agents", 9)]);

    let path = files.write_output(date(), "ai", &batch).unwrap();
    let written = fs::read_to_string(&path).unwrap();
    assert!(written.contains("\n  \"feed_date\": \"2025-03-10\""));
    assert!(written.contains("über wichtig"));
    assert!(files.category_completed(date(), "ai"));
    assert_eq!(files.read_output(date(), "ai").unwrap().unwrap(), batch);
  }

  #[test]
  fn test_rotation_round_trip_is_bit_exact() {
    let temp = TempDir::new().unwrap();
    let files = files(temp.path());
    write_input(&files, "ai", INPUT);
    let batch = TrendBatch::new(date(), "ai", vec![trend("Agents", 9)]);
    files.write_output(date(), "ai", &batch).unwrap();

    let original = fs::read(files.input_path(date(), "ai")).unwrap();
    let filtered = fs::read(files.output_path(date(), "ai")).unwrap();
    assert!(!files.rotation_finished(date(), "ai"));

    files.rotate(date(), "ai").unwrap();

    assert_eq!(fs::read(files.backup_path(date(), "ai")).unwrap(), original);
    assert_eq!(fs::read(files.input_path(date(), "ai")).unwrap(), filtered);
    assert!(files.rotation_finished(date(), "ai"));
  }

  #[test]
  fn test_rerun_after_swap_keeps_original_backup() {
    let temp = TempDir::new().unwrap();
    let files = files(temp.path());
    write_input(&files, "ai", INPUT);
    let batch = TrendBatch::new(date(), "ai", vec![trend("Agents", 9)]);
    files.write_output(date(), "ai", &batch).unwrap();
    files.rotate(date(), "ai").unwrap();

    // Simulate a crash before the marker: rotating again must not back up
    // the already-filtered input over the original
    fs::remove_file(files.marker_path(date(), "ai")).unwrap();
    files.rotate(date(), "ai").unwrap();

    assert_eq!(fs::read_to_string(files.backup_path(date(), "ai")).unwrap(), INPUT);
    assert!(files.rotation_finished(date(), "ai"));
  }

  #[test]
  fn test_rotation_without_output_leaves_input_alone() {
    let temp = TempDir::new().unwrap();
    let files = files(temp.path());
    write_input(&files, "ai", INPUT);

    assert!(files.rotate(date(), "ai").is_err());
    assert_eq!(fs::read_to_string(files.input_path(date(), "ai")).unwrap(), INPUT);
    assert!(!files.rotation_finished(date(), "ai"));
  }

  #[test]
  fn test_write_atomic_leaves_no_staging_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested/out.json");
    write_atomic(&path, b"{}").unwrap();

    assert_eq!(fs::read(&path).unwrap(), b"{}");
    assert!(!temp.path().join("nested/.out.json.tmp").exists());
  }
}
