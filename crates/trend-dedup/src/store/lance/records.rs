//! Arrow RecordBatch conversion for history records

use arrow::array::{
  Array, ArrayRef, FixedSizeListBuilder, Float32Array, Float32Builder, Int64Array, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

use crate::store::{
  HistoryMetadata, HistoryRecord, FIELD_CATEGORY, FIELD_DATE, FIELD_DATE_TIMESTAMP,
  FIELD_KEYWORDS, FIELD_TOPIC,
};
use crate::{DedupError, Result};

pub const ID_COLUMN: &str = "id";
pub const DOCUMENT_COLUMN: &str = "document";
pub const VECTOR_COLUMN: &str = "vector";
pub const DISTANCE_COLUMN: &str = "_distance";

/// Arrow schema of the history table for vectors of `dimension` floats
pub fn history_schema(dimension: usize) -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new(ID_COLUMN, DataType::Utf8, false),
    Field::new(DOCUMENT_COLUMN, DataType::Utf8, false),
    Field::new(FIELD_TOPIC, DataType::Utf8, false),
    Field::new(FIELD_DATE, DataType::Utf8, false),
    Field::new(FIELD_DATE_TIMESTAMP, DataType::Int64, false),
    Field::new(FIELD_KEYWORDS, DataType::Utf8, false),
    Field::new(FIELD_CATEGORY, DataType::Utf8, false),
    Field::new(
      VECTOR_COLUMN,
      DataType::FixedSizeList(
        Arc::new(Field::new("item", DataType::Float32, true)),
        dimension as i32,
      ),
      false,
    ),
  ]))
}

/// Convert one history record into a single-row batch
pub fn record_to_batch(record: &HistoryRecord) -> Result<RecordBatch> {
  let dimension = record.vector.len();
  if dimension == 0 {
    return Err(DedupError::Store(format!("record {} has an empty vector", record.id)));
  }

  let meta = &record.metadata;
  let mut vectors =
    FixedSizeListBuilder::new(Float32Builder::with_capacity(dimension), dimension as i32);
  vectors.values().append_slice(&record.vector);
  vectors.append(true);

  let columns: Vec<ArrayRef> = vec![
    Arc::new(StringArray::from(vec![record.id.as_str()])),
    Arc::new(StringArray::from(vec![record.document.as_str()])),
    Arc::new(StringArray::from(vec![meta.topic.as_str()])),
    Arc::new(StringArray::from(vec![meta.date.as_str()])),
    Arc::new(Int64Array::from(vec![meta.date_timestamp])),
    Arc::new(StringArray::from(vec![meta.keywords.as_str()])),
    Arc::new(StringArray::from(vec![meta.category.as_str()])),
    Arc::new(vectors.finish()),
  ];

  RecordBatch::try_new(history_schema(dimension), columns)
    .map_err(|e| DedupError::Store(format!("Failed to create RecordBatch: {e}")))
}

/// Columns of a search result batch
pub struct ResultColumns<'a> {
  pub id: &'a StringArray,
  pub topic: &'a StringArray,
  pub date: &'a StringArray,
  pub date_timestamp: &'a Int64Array,
  pub keywords: &'a StringArray,
  pub category: &'a StringArray,
  pub distance: &'a Float32Array,
}

impl<'a> ResultColumns<'a> {
  pub fn extract(batch: &'a RecordBatch) -> Result<Self> {
    Ok(Self {
      id: column(batch, ID_COLUMN)?,
      topic: column(batch, FIELD_TOPIC)?,
      date: column(batch, FIELD_DATE)?,
      date_timestamp: column(batch, FIELD_DATE_TIMESTAMP)?,
      keywords: column(batch, FIELD_KEYWORDS)?,
      category: column(batch, FIELD_CATEGORY)?,
      distance: column(batch, DISTANCE_COLUMN)?,
    })
  }

  pub fn metadata(&self, row: usize) -> HistoryMetadata {
    HistoryMetadata {
      topic: self.topic.value(row).to_string(),
      date: self.date.value(row).to_string(),
      date_timestamp: self.date_timestamp.value(row),
      keywords: self.keywords.value(row).to_string(),
      category: self.category.value(row).to_string(),
    }
  }

  /// Distance at `row`; a null distance sorts last
  pub fn distance(&self, row: usize) -> f32 {
    if self.distance.is_null(row) {
      2.0
    } else {
      self.distance.value(row)
    }
  }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
  batch
    .column_by_name(name)
    .ok_or_else(|| DedupError::Store(format!("Missing '{name}' column")))?
    .as_any()
    .downcast_ref::<T>()
    .ok_or_else(|| DedupError::Store(format!("Unexpected type for '{name}' column")))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record() -> HistoryRecord {
    HistoryRecord {
      id: "2025-03-01|ai|deadbeef".to_string(),
      document: "Topic: Agents".to_string(),
      vector: vec![0.6, 0.8, 0.0],
      metadata: HistoryMetadata {
        topic: "Agents".to_string(),
        date: "2025-03-01".to_string(),
        date_timestamp: 1_740_787_200,
        keywords: "llm".to_string(),
        category: "ai".to_string(),
      },
    }
  }

  #[test]
  fn test_record_to_batch_shape() {
    let batch = record_to_batch(&record()).unwrap();
    assert_eq!(batch.num_rows(), 1);
    assert_eq!(batch.num_columns(), 8);
    assert_eq!(batch.schema(), history_schema(3));
  }

  #[test]
  fn test_empty_vector_rejected() {
    let mut r = record();
    r.vector.clear();
    assert!(record_to_batch(&r).is_err());
  }
}
