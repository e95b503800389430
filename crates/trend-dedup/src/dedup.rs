//! Greedy, score-ranked selection of unique trends
//!
//! Candidates are walked highest score first and each one is checked against
//! persisted history only. Candidates accepted earlier in the same batch are
//! not compared with each other, so two near-identical fresh trends can both
//! be selected.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::embeddings::EmbeddingProvider;
use crate::history::HistoryStore;
use crate::models::{DuplicateMatch, Trend, TrendBatch};
use crate::{DedupError, Result};

/// Outcome of checking one candidate against history
#[derive(Debug)]
pub enum Uniqueness {
  Unique,
  Duplicate(DuplicateMatch),
  /// The check itself could not be completed
  CheckFailed(DedupError),
}

/// How a [`Uniqueness::CheckFailed`] candidate is treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckFailurePolicy {
  /// Keep the candidate rather than lose potentially good content
  #[default]
  FailOpen,
  /// Drop the candidate
  FailClosed,
}

impl CheckFailurePolicy {
  pub fn accepts(&self, uniqueness: &Uniqueness) -> bool {
    match uniqueness {
      Uniqueness::Unique => true,
      Uniqueness::Duplicate(_) => false,
      Uniqueness::CheckFailed(_) => *self == CheckFailurePolicy::FailOpen,
    }
  }
}

/// Result of [`Deduplicator::select`]
#[derive(Debug)]
pub struct Selection {
  /// Accepted trends, highest score first
  pub batch: TrendBatch,
  /// Candidates rejected as duplicates, with the history record they matched
  pub duplicates: Vec<(Trend, DuplicateMatch)>,
  /// Candidates whose check failed, whether or not they were kept
  pub failed_checks: usize,
}

/// Result of [`Deduplicator::record_all`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordReport {
  pub recorded: usize,
  pub failed: usize,
}

pub struct Deduplicator {
  provider: Box<dyn EmbeddingProvider>,
  history: HistoryStore,
  on_check_failure: CheckFailurePolicy,
  log: bentley::Logger,
}

impl Deduplicator {
  pub fn new(
    provider: Box<dyn EmbeddingProvider>,
    history: HistoryStore,
    on_check_failure: CheckFailurePolicy,
    log: &bentley::Logger,
  ) -> Self {
    Self { provider, history, on_check_failure, log: log.component("deduplicator") }
  }

  pub fn history(&self) -> &HistoryStore {
    &self.history
  }

  /// Embed the candidate and look for an in-window duplicate
  pub async fn check(&self, trend: &Trend, date: NaiveDate, category: &str) -> Uniqueness {
    let embedding = match self.provider.embed(&trend.embedding_text()).await {
      Ok(embedding) => embedding,
      Err(e) => return Uniqueness::CheckFailed(e),
    };

    match self.history.check_duplicate(trend, &embedding, date, category).await {
      Ok(Some(found)) => Uniqueness::Duplicate(found),
      Ok(None) => Uniqueness::Unique,
      Err(e) => Uniqueness::CheckFailed(e),
    }
  }

  /// Highest-scoring prefix of individually unique candidates, at most
  /// `target_count` long
  pub async fn select(&self, batch: &TrendBatch, target_count: usize) -> Selection {
    let log = self.log.with_date(batch.date).with_category(&batch.category);
    let mut selection =
      Selection { batch: batch.with_trends(Vec::new()), duplicates: Vec::new(), failed_checks: 0 };

    if batch.is_empty() {
      log.warn(&format!("No trends found in {}", batch.category));
      return selection;
    }

    log.info(&format!(
      "Starting deduplication for {} ({} trends)",
      batch.category,
      batch.len()
    ));

    for trend in batch.sorted_by_score() {
      if selection.batch.len() >= target_count {
        break;
      }

      let uniqueness = self.check(trend, batch.date, &batch.category).await;
      let accepted = self.on_check_failure.accepts(&uniqueness);

      match uniqueness {
        Uniqueness::Unique => {}
        Uniqueness::Duplicate(found) => {
          log.debug(&format!("Skipped duplicate: '{}' matches {found}", trend.topic));
          selection.duplicates.push((trend.clone(), found));
        }
        Uniqueness::CheckFailed(e) => {
          selection.failed_checks += 1;
          log.error(&format!("Error checking uniqueness for '{}': {e}", trend.topic));
          if accepted {
            log.warn(&format!("Treating '{}' as unique due to error", trend.topic));
          } else {
            log.warn(&format!("Dropping '{}' due to error", trend.topic));
          }
        }
      }

      if accepted {
        log.info(&format!("Selected: '{}' (Score: {})", trend.topic, trend.score));
        selection.batch.trends.push(trend.clone());
      }
    }

    log.info(&format!("Selected {} unique trends", selection.batch.len()));
    selection
  }

  /// Persist every trend of `batch` into history. A trend that cannot be
  /// embedded or stored is logged and skipped.
  pub async fn record_all(&self, batch: &TrendBatch) -> RecordReport {
    let log = self.log.with_date(batch.date).with_category(&batch.category);
    let mut report = RecordReport::default();

    if batch.is_empty() {
      log.warn("No trends to record");
      return report;
    }

    log.info(&format!("Recording {} trends to history", batch.len()));

    for trend in &batch.trends {
      match self.record_one(trend, batch.date, &batch.category).await {
        Ok(()) => report.recorded += 1,
        Err(e) => {
          report.failed += 1;
          log.error(&format!("Failed to record trend '{}': {e}", trend.topic));
        }
      }
    }

    log.info(&format!(
      "Completed recording trends ({} recorded, {} failed)",
      report.recorded, report.failed
    ));
    report
  }

  async fn record_one(&self, trend: &Trend, date: NaiveDate, category: &str) -> Result<()> {
    let embedding = self.provider.embed(&trend.embedding_text()).await?;
    self.history.record(trend, embedding, date, category).await
  }
}
