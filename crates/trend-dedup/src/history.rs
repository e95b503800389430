//! Time-windowed trend history
//!
//! Wraps a [`VectorStore`] and answers whether a candidate is a near-duplicate
//! of anything recorded in the last `lookback_days`. Records are never deleted;
//! freshness is enforced at query time by the window filter alone, so a topic
//! becomes eligible again once its last occurrence ages out of the window.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{DuplicateMatch, Trend};
use crate::store::{
  HistoryMetadata, HistoryRecord, StoreFilter, VectorStore, FIELD_CATEGORY, FIELD_DATE_TIMESTAMP,
};
use crate::Result;

/// Which history records a candidate is compared against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchScope {
  /// Every record in the window, regardless of category
  #[default]
  Global,
  /// Only records of the candidate's own category
  Category,
}

/// Deterministic record id: `{date}|{category}|{first 8 hex of sha256(topic)}`
pub fn record_id(date: NaiveDate, category: &str, topic: &str) -> String {
  let digest = Sha256::digest(topic.as_bytes());
  let hash: String = digest.iter().take(4).map(|byte| format!("{byte:02x}")).collect();
  format!("{}|{category}|{hash}", date.format("%Y-%m-%d"))
}

/// Seconds since the epoch at UTC midnight of `date`
pub fn date_timestamp(date: NaiveDate) -> i64 {
  date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp()).unwrap_or_default()
}

/// Map cosine distance in `[0, 2]` onto similarity in `[0, 1]`
pub fn similarity_from_distance(distance: f32) -> f32 {
  1.0 - distance.clamp(0.0, 2.0) / 2.0
}

pub struct HistoryStore {
  store: Box<dyn VectorStore>,
  similarity_threshold: f32,
  lookback_days: u32,
  scope: MatchScope,
  log: bentley::Logger,
}

impl HistoryStore {
  pub fn new(
    store: Box<dyn VectorStore>,
    similarity_threshold: f32,
    lookback_days: u32,
    scope: MatchScope,
    log: &bentley::Logger,
  ) -> Self {
    Self { store, similarity_threshold, lookback_days, scope, log: log.component("history") }
  }

  /// Records strictly newer than this timestamp are inside the window
  pub fn cutoff_timestamp(&self, as_of: NaiveDate) -> i64 {
    date_timestamp(as_of - Duration::days(i64::from(self.lookback_days)))
  }

  /// Nearest in-window record, if it is similar enough to count as a duplicate
  pub async fn check_duplicate(
    &self,
    trend: &Trend,
    embedding: &[f32],
    as_of: NaiveDate,
    category: &str,
  ) -> Result<Option<DuplicateMatch>> {
    let cutoff = self.cutoff_timestamp(as_of);
    let mut filter = StoreFilter::new().greater_than(FIELD_DATE_TIMESTAMP, cutoff);
    if self.scope == MatchScope::Category {
      filter = filter.equals(FIELD_CATEGORY, category);
    }

    let hits = self.store.query(embedding, 1, &filter).await?;
    let Some(nearest) = hits.into_iter().next() else {
      return Ok(None);
    };

    let similarity = similarity_from_distance(nearest.distance);
    self.log.debug(&format!(
      "Nearest to '{}' is '{}' from {} (similarity {similarity:.3})",
      trend.topic, nearest.metadata.topic, nearest.metadata.date
    ));

    if similarity > self.similarity_threshold {
      return Ok(Some(DuplicateMatch {
        matched_topic: nearest.metadata.topic,
        matched_date: nearest.metadata.date,
        similarity_score: similarity,
      }));
    }

    Ok(None)
  }

  /// Persist an accepted trend. Re-recording the same (date, category, topic)
  /// replaces the earlier record.
  pub async fn record(
    &self,
    trend: &Trend,
    embedding: Vec<f32>,
    date: NaiveDate,
    category: &str,
  ) -> Result<()> {
    let id = record_id(date, category, &trend.topic);
    let record = HistoryRecord {
      id: id.clone(),
      document: trend.embedding_text(),
      vector: embedding,
      metadata: HistoryMetadata {
        topic: trend.topic.clone(),
        date: date.format("%Y-%m-%d").to_string(),
        date_timestamp: date_timestamp(date),
        keywords: trend.search_keywords.join(", "),
        category: category.to_string(),
      },
    };

    self.store.upsert(record).await?;
    self.log.debug(&format!("Added trend to history: {} ({id})", trend.topic));
    Ok(())
  }

  pub async fn total_records(&self) -> Result<usize> {
    self.store.count().await
  }
}
