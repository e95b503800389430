//! Data models for trends and duplicate matches

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single candidate trend as produced by the analysis stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
  pub topic: String,
  /// Justification text; never part of the embedding input
  pub reason: String,
  /// Impact score used for ranking, higher first
  pub score: i64,
  pub links: Vec<String>,
  pub search_keywords: Vec<String>,
}

impl Trend {
  /// Text handed to the embedding provider, built from topic and keywords only
  pub fn embedding_text(&self) -> String {
    if self.search_keywords.is_empty() {
      return format!("Topic: {}", self.topic);
    }
    format!("Topic: {}. Keywords: {}", self.topic, self.search_keywords.join(", "))
  }
}

/// All trends for one (date, category) pair; the unit read and written per file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendBatch {
  #[serde(rename = "feed_date", alias = "date")]
  pub date: NaiveDate,
  pub category: String,
  pub trends: Vec<Trend>,
}

impl TrendBatch {
  pub fn new(date: NaiveDate, category: &str, trends: Vec<Trend>) -> Self {
    Self { date, category: category.to_string(), trends }
  }

  /// A batch for the same date and category holding different trends
  pub fn with_trends(&self, trends: Vec<Trend>) -> Self {
    Self { date: self.date, category: self.category.clone(), trends }
  }

  /// Trends ordered by score, highest first; ties keep their input order
  pub fn sorted_by_score(&self) -> Vec<&Trend> {
    let mut sorted: Vec<&Trend> = self.trends.iter().collect();
    sorted.sort_by(|a, b| b.score.cmp(&a.score));
    sorted
  }

  pub fn is_empty(&self) -> bool {
    self.trends.is_empty()
  }

  pub fn len(&self) -> usize {
    self.trends.len()
  }
}

/// Nearest history record that made a candidate a duplicate. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateMatch {
  pub matched_topic: String,
  pub matched_date: String,
  pub similarity_score: f32,
}

impl fmt::Display for DuplicateMatch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "'{}' from {} (Score: {:.2})",
      self.matched_topic, self.matched_date, self.similarity_score
    )
  }
}
