//! Vector storage backends for trend history
//!
//! This module provides a generic interface for the persistent nearest-neighbor
//! index behind the history store, so backends (JSONL log, in-memory,
//! LanceDB) can be swapped without changing the deduplication logic.
//!
//! # Storage Model
//!
//! Each stored item is a [`HistoryRecord`]:
//! - id: deterministic `(date, category, topic hash)` key; inserting an existing
//!   id replaces the stored record
//! - document and vector: the embedding text and its embedding
//! - metadata: topic, date, numeric date timestamp, keywords, category
//!
//! Distances are cosine distances in `[0, 2]`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::DeduplicationSettings;
use crate::Result;

mod file;
mod filter;
#[cfg(feature = "lancedb")]
mod lance;
mod memory;

pub use file::FileStore;
pub use filter::{Condition, FieldValue, StoreFilter};
#[cfg(feature = "lancedb")]
pub use lance::LanceStore;
pub use memory::{cosine_distance, MemoryStore};

pub const FIELD_TOPIC: &str = "topic";
pub const FIELD_DATE: &str = "date";
pub const FIELD_DATE_TIMESTAMP: &str = "date_timestamp";
pub const FIELD_KEYWORDS: &str = "keywords";
pub const FIELD_CATEGORY: &str = "category";

/// Searchable attributes stored with every history record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMetadata {
  pub topic: String,
  /// Human-readable `YYYY-MM-DD`
  pub date: String,
  /// UTC midnight of `date`, in seconds; used for window filtering
  pub date_timestamp: i64,
  /// Search keywords joined with ", "
  pub keywords: String,
  pub category: String,
}

impl HistoryMetadata {
  /// Look up a metadata field by name, as used in filters
  pub fn value(&self, field: &str) -> Option<FieldValue> {
    match field {
      FIELD_TOPIC => Some(FieldValue::Text(self.topic.clone())),
      FIELD_DATE => Some(FieldValue::Text(self.date.clone())),
      FIELD_DATE_TIMESTAMP => Some(FieldValue::Integer(self.date_timestamp)),
      FIELD_KEYWORDS => Some(FieldValue::Text(self.keywords.clone())),
      FIELD_CATEGORY => Some(FieldValue::Text(self.category.clone())),
      _ => None,
    }
  }
}

/// One accepted trend as persisted in the vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
  pub id: String,
  /// The embedding text the vector was computed from
  pub document: String,
  pub vector: Vec<f32>,
  pub metadata: HistoryMetadata,
}

/// A query result, nearest first
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHit {
  pub id: String,
  /// Cosine distance, 0 = identical direction, 2 = opposite
  pub distance: f32,
  pub metadata: HistoryMetadata,
}

/// Trait for vector storage backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorStore: Send + Sync {
  /// Insert a record. A record with the same id is replaced (upsert).
  async fn upsert(&self, record: HistoryRecord) -> Result<()>;

  /// Up to `k` records matching `filter`, nearest to `vector` first
  async fn query(&self, vector: &[f32], k: usize, filter: &StoreFilter) -> Result<Vec<StoreHit>>;

  /// Total number of stored records
  async fn count(&self) -> Result<usize>;
}

/// Which backend persists the history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
  /// Append-only JSONL log under the history directory
  #[default]
  File,
  /// Process-local, nothing persisted
  Memory,
  /// LanceDB table under the history directory
  Lancedb,
}

impl fmt::Display for StoreBackend {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      StoreBackend::File => "file",
      StoreBackend::Memory => "memory",
      StoreBackend::Lancedb => "lancedb",
    };
    f.write_str(name)
  }
}

/// Open the configured backend. Called once per run; the store is a
/// single-writer resource.
pub async fn open_store(
  settings: &DeduplicationSettings,
  log: &bentley::Logger,
) -> Result<Box<dyn VectorStore>> {
  let log = log.component("store");

  match settings.vector_store {
    StoreBackend::File => {
      let store = FileStore::open(&settings.history_keywords, &settings.collection_name)?;
      log.info(&format!("Opened history log at {}", store.path().display()));
      Ok(Box::new(store))
    }
    StoreBackend::Memory => {
      log.warn("Using in-memory history; nothing will be persisted across runs");
      Ok(Box::new(MemoryStore::new()))
    }
    StoreBackend::Lancedb => open_lance_store(settings, &log).await,
  }
}

#[cfg(feature = "lancedb")]
async fn open_lance_store(
  settings: &DeduplicationSettings,
  log: &bentley::Logger,
) -> Result<Box<dyn VectorStore>> {
  let store =
    LanceStore::open(&settings.history_keywords, &settings.collection_name, log).await?;
  log.info(&format!("Initialized LanceDB at {}", settings.history_keywords.display()));
  Ok(Box::new(store))
}

#[cfg(not(feature = "lancedb"))]
async fn open_lance_store(
  _settings: &DeduplicationSettings,
  _log: &bentley::Logger,
) -> Result<Box<dyn VectorStore>> {
  Err(crate::DedupError::Configuration(
    "vector-store 'lancedb' requires building with the `lancedb` feature".to_string(),
  ))
}
