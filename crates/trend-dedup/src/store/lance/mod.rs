//! LanceDB-backed history store
//!
//! The table is created lazily on the first upsert, since its vector width is
//! only known once the first embedding exists.

use arrow::record_batch::{RecordBatch, RecordBatchIterator};
use async_trait::async_trait;
use futures::stream::StreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType, Table};
use std::path::Path;
use tokio::sync::Mutex;

use super::{HistoryRecord, StoreFilter, StoreHit, VectorStore};
use crate::{DedupError, Result};

mod records;

use records::{record_to_batch, ResultColumns, ID_COLUMN, VECTOR_COLUMN};

fn store_error(context: &str, error: lancedb::Error) -> DedupError {
  DedupError::Store(format!("{context}: {error}"))
}

pub struct LanceStore {
  connection: Connection,
  table_name: String,
  table: Mutex<Option<Table>>,
  log: bentley::Logger,
}

impl LanceStore {
  /// Connect to the database directory and open the table if it exists
  pub async fn open(dir: &Path, table_name: &str, log: &bentley::Logger) -> Result<Self> {
    std::fs::create_dir_all(dir)
      .map_err(|e| DedupError::io(format!("creating data directory {}", dir.display()), e))?;

    let connection = connect(&dir.to_string_lossy())
      .execute()
      .await
      .map_err(|e| store_error("Failed to connect to LanceDB", e))?;

    let tables = connection
      .table_names()
      .execute()
      .await
      .map_err(|e| store_error("Failed to list tables", e))?;

    let table = if tables.iter().any(|name| name == table_name) {
      let table = connection
        .open_table(table_name)
        .execute()
        .await
        .map_err(|e| store_error(&format!("Failed to open table '{table_name}'"), e))?;
      Some(table)
    } else {
      None
    };

    Ok(Self {
      connection,
      table_name: table_name.to_string(),
      table: Mutex::new(table),
      log: log.component("lancedb"),
    })
  }

  async fn create_table(&self, batch: RecordBatch) -> Result<Table> {
    let schema = batch.schema();
    let table = self
      .connection
      .create_table(&self.table_name, RecordBatchIterator::new(vec![Ok(batch)], schema))
      .execute()
      .await
      .map_err(|e| store_error("Failed to create table with first record", e))?;

    self.log.info(&format!("Created table '{}'", self.table_name));
    Ok(table)
  }
}

#[async_trait]
impl VectorStore for LanceStore {
  async fn upsert(&self, record: HistoryRecord) -> Result<()> {
    let batch = record_to_batch(&record)?;
    let mut guard = self.table.lock().await;

    let Some(table) = guard.as_ref() else {
      *guard = Some(self.create_table(batch).await?);
      return Ok(());
    };

    let schema = batch.schema();
    let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
    let mut merge = table.merge_insert(&[ID_COLUMN]);
    merge.when_matched_update_all(None).when_not_matched_insert_all();
    merge
      .execute(Box::new(reader))
      .await
      .map_err(|e| store_error(&format!("Failed to upsert {}", record.id), e))?;

    self.log.debug(&format!("Upserted {}", record.id));
    Ok(())
  }

  async fn query(&self, vector: &[f32], k: usize, filter: &StoreFilter) -> Result<Vec<StoreHit>> {
    let guard = self.table.lock().await;
    let Some(table) = guard.as_ref() else {
      return Ok(Vec::new());
    };

    let mut query = table
      .vector_search(vector)
      .map_err(|e| store_error("Invalid query vector", e))?
      .column(VECTOR_COLUMN)
      .distance_type(DistanceType::Cosine)
      .limit(k);
    if let Some(predicate) = filter.to_sql() {
      query = query.only_if(predicate);
    }

    let mut stream = query.execute().await.map_err(|e| store_error("Vector search failed", e))?;

    let mut hits = Vec::new();
    while let Some(batch) = stream.next().await {
      let batch = batch.map_err(|e| store_error("Error reading batch", e))?;
      let columns = ResultColumns::extract(&batch)?;
      for row in 0..batch.num_rows() {
        hits.push(StoreHit {
          id: columns.id.value(row).to_string(),
          distance: columns.distance(row),
          metadata: columns.metadata(row),
        });
      }
    }

    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    hits.truncate(k);
    Ok(hits)
  }

  async fn count(&self) -> Result<usize> {
    let guard = self.table.lock().await;
    match guard.as_ref() {
      Some(table) => {
        table.count_rows(None).await.map_err(|e| store_error("Failed to count rows", e))
      }
      None => Ok(0),
    }
  }
}
