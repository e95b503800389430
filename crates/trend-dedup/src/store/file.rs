use async_trait::async_trait;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{HistoryRecord, MemoryStore, StoreFilter, StoreHit, VectorStore};
use crate::files::write_atomic;
use crate::{DedupError, Result};

/// [`MemoryStore`] backed by an append-only JSONL log.
///
/// Every upsert appends and syncs one record line. Opening replays the log
/// with the last line per id winning, then compacts the file down to one line
/// per record when it holds superseded or partial lines.
pub struct FileStore {
  path: PathBuf,
  memory: MemoryStore,
}

impl FileStore {
  /// Open `{dir}/{collection}.jsonl`, creating the directory if needed
  pub fn open(dir: &Path, collection: &str) -> Result<Self> {
    fs::create_dir_all(dir)
      .map_err(|e| DedupError::io(format!("creating history directory {}", dir.display()), e))?;

    let store = Self { path: dir.join(format!("{collection}.jsonl")), memory: MemoryStore::new() };
    if !store.path.exists() {
      return Ok(store);
    }

    let lines = store.replay()?;
    let records = store.memory.records()?;
    if lines != records.len() {
      store.compact(&records)?;
      tracing::info!(
        path = %store.path.display(),
        lines,
        records = records.len(),
        "compacted history log"
      );
    }
    Ok(store)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Load the log into memory, returning how many non-empty lines it held
  fn replay(&self) -> Result<usize> {
    let content = fs::read_to_string(&self.path)
      .map_err(|e| DedupError::io(format!("reading history log {}", self.path.display()), e))?;
    let lines: Vec<&str> = content.lines().filter(|line| !line.trim().is_empty()).collect();

    for (index, line) in lines.iter().enumerate() {
      match serde_json::from_str::<HistoryRecord>(line) {
        Ok(record) => {
          self.memory.replace(record)?;
        }
        // An append cut short by a crash leaves an unterminated last line
        Err(e) if index + 1 == lines.len() && !content.ends_with('\n') => {
          tracing::warn!(path = %self.path.display(), "dropping partial history line: {e}");
        }
        Err(e) => {
          return Err(DedupError::Store(format!(
            "corrupt history log {} at line {}: {e}",
            self.path.display(),
            index + 1
          )));
        }
      }
    }
    Ok(lines.len())
  }

  fn compact(&self, records: &[HistoryRecord]) -> Result<()> {
    let mut content = String::new();
    for record in records {
      content.push_str(&encode(record)?);
    }
    write_atomic(&self.path, content.as_bytes())
  }

  fn append(&self, record: &HistoryRecord) -> Result<()> {
    let line = encode(record)?;
    let context = || format!("appending to history log {}", self.path.display());

    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)
      .map_err(|e| DedupError::io(context(), e))?;
    let length = file.metadata().map_err(|e| DedupError::io(context(), e))?.len();

    if let Err(e) = file.write_all(line.as_bytes()).and_then(|()| file.sync_data()) {
      // Leave no partial line for the next append to run into
      let _ = file.set_len(length);
      return Err(DedupError::io(context(), e));
    }

    tracing::debug!(path = %self.path.display(), id = %record.id, "history record appended");
    Ok(())
  }
}

fn encode(record: &HistoryRecord) -> Result<String> {
  let mut line = serde_json::to_string(record)
    .map_err(|e| DedupError::Store(format!("serializing history record {}: {e}", record.id)))?;
  line.push('\n');
  Ok(line)
}

#[async_trait]
impl VectorStore for FileStore {
  async fn upsert(&self, record: HistoryRecord) -> Result<()> {
    let id = record.id.clone();
    let previous = self.memory.replace(record.clone())?;

    if let Err(e) = self.append(&record) {
      self.memory.restore(&id, previous)?;
      return Err(e);
    }
    Ok(())
  }

  async fn query(&self, vector: &[f32], k: usize, filter: &StoreFilter) -> Result<Vec<StoreHit>> {
    self.memory.search(vector, k, filter)
  }

  async fn count(&self) -> Result<usize> {
    self.memory.count().await
  }
}
