//! Per-category orchestration of read, select, write, record and rotate
//!
//! Categories are processed one after another so that each category's checks
//! see every record written for the categories before it. A failure is
//! confined to its category; the run moves on to the next one.

use chrono::NaiveDate;
use std::fmt;

use crate::config::Config;
use crate::dedup::Deduplicator;
use crate::embeddings::create_provider;
use crate::files::TrendFiles;
use crate::history::HistoryStore;
use crate::models::TrendBatch;
use crate::store::open_store;
use crate::{DedupError, Result};

/// Progress of one category through the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryState {
  Pending,
  Skipped,
  Read,
  Deduplicated,
  Written,
  Recorded,
  Rotated,
  Failed,
}

impl CategoryState {
  pub fn is_terminal(&self) -> bool {
    matches!(self, CategoryState::Skipped | CategoryState::Rotated | CategoryState::Failed)
  }
}

impl fmt::Display for CategoryState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      CategoryState::Pending => "pending",
      CategoryState::Skipped => "skipped",
      CategoryState::Read => "read",
      CategoryState::Deduplicated => "deduplicated",
      CategoryState::Written => "written",
      CategoryState::Recorded => "recorded",
      CategoryState::Rotated => "rotated",
      CategoryState::Failed => "failed",
    };
    f.write_str(name)
  }
}

/// What happened to one category
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryOutcome {
  pub category: String,
  pub state: CategoryState,
  /// Last state reached before failing
  pub failed_at: Option<CategoryState>,
  pub selected: usize,
  pub duplicates: usize,
  pub failed_checks: usize,
  pub recorded: usize,
  pub record_failures: usize,
  /// Finished a rotation left incomplete by an earlier run
  pub resumed: bool,
  pub reason: Option<String>,
}

impl CategoryOutcome {
  fn pending(category: &str) -> Self {
    Self {
      category: category.to_string(),
      state: CategoryState::Pending,
      failed_at: None,
      selected: 0,
      duplicates: 0,
      failed_checks: 0,
      recorded: 0,
      record_failures: 0,
      resumed: false,
      reason: None,
    }
  }

  fn skip(&mut self, reason: &str) {
    self.state = CategoryState::Skipped;
    self.reason = Some(reason.to_string());
  }
}

impl fmt::Display for CategoryOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.state {
      CategoryState::Rotated => {
        write!(
          f,
          "{}: {} selected, {} duplicates, {} recorded",
          self.category, self.selected, self.duplicates, self.recorded
        )?;
        if self.resumed {
          write!(f, " (resumed)")?;
        }
        Ok(())
      }
      CategoryState::Failed => write!(
        f,
        "{}: failed after {}: {}",
        self.category,
        self.failed_at.unwrap_or(CategoryState::Pending),
        self.reason.as_deref().unwrap_or("unknown error")
      ),
      state => match &self.reason {
        Some(reason) => write!(f, "{}: {state} ({reason})", self.category),
        None => write!(f, "{}: {state}", self.category),
      },
    }
  }
}

/// Result of one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
  pub date: NaiveDate,
  pub outcomes: Vec<CategoryOutcome>,
  /// History size after the run, when it could be read
  pub total_records: Option<usize>,
}

impl RunSummary {
  fn count(&self, state: CategoryState) -> usize {
    self.outcomes.iter().filter(|outcome| outcome.state == state).count()
  }

  pub fn completed(&self) -> usize {
    self.count(CategoryState::Rotated)
  }

  pub fn skipped(&self) -> usize {
    self.count(CategoryState::Skipped)
  }

  pub fn failed(&self) -> usize {
    self.count(CategoryState::Failed)
  }

  pub fn outcome(&self, category: &str) -> Option<&CategoryOutcome> {
    self.outcomes.iter().find(|outcome| outcome.category == category)
  }
}

pub struct Pipeline {
  files: TrendFiles,
  deduplicator: Deduplicator,
  target_count: usize,
  log: bentley::Logger,
}

impl Pipeline {
  pub fn new(
    files: TrendFiles,
    deduplicator: Deduplicator,
    target_count: usize,
    log: &bentley::Logger,
  ) -> Self {
    Self { files, deduplicator, target_count, log: log.component("pipeline") }
  }

  /// Wire provider, store, history, deduplicator and file layout from
  /// configuration. Any failure here is a configuration error.
  pub async fn from_config(config: &Config, log: &bentley::Logger) -> Result<Self> {
    let settings = &config.deduplication;

    let provider = create_provider(settings, config.retry_policy(), log)?;
    let store = open_store(settings, log).await.map_err(|e| match e {
      DedupError::Configuration(_) => e,
      other => DedupError::Configuration(format!("Failed to open history store: {other}")),
    })?;

    let history = HistoryStore::new(
      store,
      settings.similarity_threshold,
      settings.lookback_days,
      settings.match_scope,
      log,
    );
    let deduplicator = Deduplicator::new(provider, history, settings.on_check_failure, log);
    let files = TrendFiles::from_config(config, log);

    Ok(Self::new(files, deduplicator, settings.target_count, log))
  }

  /// Process one category, or every category found for `date`
  pub async fn run(&self, date: NaiveDate, category: Option<&str>) -> RunSummary {
    let log = self.log.with_date(date);
    log.info(&format!("Running pipeline for date: {date}"));

    let categories = match category {
      Some(category) => vec![category.to_string()],
      None => self.files.categories(date).unwrap_or_else(|e| {
        log.error(&format!("Could not list categories for {date}: {e}"));
        Vec::new()
      }),
    };

    if categories.is_empty() {
      log.warn(&format!("No categories found for {date}"));
    }

    let mut outcomes = Vec::with_capacity(categories.len());
    for category in &categories {
      outcomes.push(self.process_category(date, category).await);
    }

    let total_records = match self.deduplicator.history().total_records().await {
      Ok(total) => {
        log.info(&format!("History now holds {total} records"));
        Some(total)
      }
      Err(e) => {
        log.warn(&format!("Could not count history records: {e}"));
        None
      }
    };

    RunSummary { date, outcomes, total_records }
  }

  async fn process_category(&self, date: NaiveDate, category: &str) -> CategoryOutcome {
    let log = self.log.with_date(date).with_category(category);
    let mut outcome = CategoryOutcome::pending(category);

    let result =
      log.timed("process_category", self.advance(date, category, &log, &mut outcome)).await;

    if let Err(e) = result {
      log.warn(&format!(
        "Giving up on {category} after {}. Continuing with next category.",
        outcome.state
      ));
      outcome.failed_at = Some(outcome.state);
      outcome.state = CategoryState::Failed;
      outcome.reason = Some(e.to_string());
    }

    outcome
  }

  async fn advance(
    &self,
    date: NaiveDate,
    category: &str,
    log: &bentley::Logger,
    outcome: &mut CategoryOutcome,
  ) -> Result<()> {
    log.info(&format!("Processing category: {category}"));

    if self.files.category_completed(date, category) {
      if self.files.rotation_finished(date, category) {
        log.info(&format!("Output already exists for {category}. Skipping..."));
        outcome.skip("already processed");
        return Ok(());
      }
      return self.resume(date, category, log, outcome).await;
    }

    let Some(batch) = self.files.read_batch(date, category)? else {
      log.warn(&format!("No input found for {category}"));
      outcome.skip("no input");
      return Ok(());
    };
    outcome.state = CategoryState::Read;

    if batch.date != date || batch.category != category {
      log.warn(&format!(
        "Input declares {}/{}; processing as {date}/{category}",
        batch.date, batch.category
      ));
    }
    let batch = TrendBatch::new(date, category, batch.trends);

    let selection = self.deduplicator.select(&batch, self.target_count).await;
    outcome.selected = selection.batch.len();
    outcome.duplicates = selection.duplicates.len();
    outcome.failed_checks = selection.failed_checks;
    outcome.state = CategoryState::Deduplicated;

    let output = selection.batch;
    self.files.write_output(date, category, &output)?;
    outcome.state = CategoryState::Written;

    self.record_and_rotate(date, category, &output, log, outcome).await?;
    log.success(&format!("Completed processing for {category}"));
    Ok(())
  }

  /// Output was written by an earlier run whose rotation never finished
  async fn resume(
    &self,
    date: NaiveDate,
    category: &str,
    log: &bentley::Logger,
    outcome: &mut CategoryOutcome,
  ) -> Result<()> {
    log.warn(&format!("Output exists for {category} but rotation did not finish. Resuming..."));
    outcome.resumed = true;

    let output = self.files.read_output(date, category)?.ok_or_else(|| {
      DedupError::Validation(format!("Output for {category} disappeared while resuming"))
    })?;
    outcome.selected = output.len();
    outcome.state = CategoryState::Written;

    self.record_and_rotate(date, category, &output, log, outcome).await?;
    log.success(&format!("Resumed and completed {category}"));
    Ok(())
  }

  async fn record_and_rotate(
    &self,
    date: NaiveDate,
    category: &str,
    output: &TrendBatch,
    log: &bentley::Logger,
    outcome: &mut CategoryOutcome,
  ) -> Result<()> {
    let report = self.deduplicator.record_all(output).await;
    outcome.recorded = report.recorded;
    outcome.record_failures = report.failed;
    outcome.state = CategoryState::Recorded;

    log.timed("rotate", async { self.files.rotate(date, category) }).await?;
    outcome.state = CategoryState::Rotated;
    Ok(())
  }
}
