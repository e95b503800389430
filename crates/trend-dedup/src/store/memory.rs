use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{HistoryRecord, StoreFilter, StoreHit, VectorStore};
use crate::{DedupError, Result};

/// In-memory vector store.
///
/// Brute-force cosine search over every record that passes the filter. Records
/// are keyed by id in a sorted map, so iteration order and tie-breaking are
/// deterministic.
#[derive(Default)]
pub struct MemoryStore {
  records: Mutex<BTreeMap<String, HistoryRecord>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Copy of every record, ordered by id
  pub fn records(&self) -> Result<Vec<HistoryRecord>> {
    Ok(self.lock()?.values().cloned().collect())
  }

  /// Insert and hand back whatever the id previously held.
  ///
  /// Every stored vector has the same width; a record of another width is
  /// rejected so later queries keep working.
  pub(super) fn replace(&self, record: HistoryRecord) -> Result<Option<HistoryRecord>> {
    let mut records = self.lock()?;
    let width = records.values().find(|stored| stored.id != record.id).map(|s| s.vector.len());
    if let Some(width) = width {
      if record.vector.len() != width {
        return Err(DedupError::Store(format!(
          "dimension mismatch: record {} has {} dimensions, history has {width}",
          record.id,
          record.vector.len()
        )));
      }
    }
    Ok(records.insert(record.id.clone(), record))
  }

  /// Undo a [`MemoryStore::replace`]
  pub(super) fn restore(&self, id: &str, previous: Option<HistoryRecord>) -> Result<()> {
    let mut records = self.lock()?;
    match previous {
      Some(record) => {
        records.insert(id.to_string(), record);
      }
      None => {
        records.remove(id);
      }
    }
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, HistoryRecord>>> {
    self.records.lock().map_err(|_| DedupError::Store("history store lock poisoned".to_string()))
  }

  pub(super) fn search(
    &self,
    vector: &[f32],
    k: usize,
    filter: &StoreFilter,
  ) -> Result<Vec<StoreHit>> {
    let records = self.lock()?;
    let mut hits = Vec::new();

    for record in records.values().filter(|record| filter.matches(&record.metadata)) {
      if record.vector.len() != vector.len() {
        return Err(DedupError::Store(format!(
          "dimension mismatch: record {} has {} dimensions, query has {}",
          record.id,
          record.vector.len(),
          vector.len()
        )));
      }

      hits.push(StoreHit {
        id: record.id.clone(),
        distance: cosine_distance(vector, &record.vector),
        metadata: record.metadata.clone(),
      });
    }

    // Stable sort over id-ordered input keeps ties deterministic
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    hits.truncate(k);
    Ok(hits)
  }
}

#[async_trait]
impl VectorStore for MemoryStore {
  async fn upsert(&self, record: HistoryRecord) -> Result<()> {
    self.replace(record)?;
    Ok(())
  }

  async fn query(&self, vector: &[f32], k: usize, filter: &StoreFilter) -> Result<Vec<StoreHit>> {
    self.search(vector, k, filter)
  }

  async fn count(&self) -> Result<usize> {
    Ok(self.lock()?.len())
  }
}

/// Cosine distance `1 - cos(a, b)`, in `[0, 2]`.
///
/// A zero vector has no direction; it is treated as orthogonal (distance 1).
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
  let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
  let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
  let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

  if norm_a == 0.0 || norm_b == 0.0 {
    return 1.0;
  }

  (1.0 - dot / (norm_a * norm_b)).clamp(0.0, 2.0)
}
