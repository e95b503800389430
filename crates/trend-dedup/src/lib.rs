//! # Trend Dedup
//!
//! Semantic deduplication of daily trend batches against a time-windowed
//! history.
//!
//! For each category of a feed date the pipeline reads the candidate batch,
//! selects the highest-scoring trends that are not near-duplicates of anything
//! recorded within the lookback window, writes the selection, records it in
//! history for future runs and finally rotates the filtered file into the
//! input location.
//!
//! ## Modules
//!
//! - [`models`]: trends, batches and duplicate matches
//! - [`embeddings`]: embedding providers behind one retry policy
//! - [`store`]: vector store backends
//! - [`history`]: the time-windowed duplicate check
//! - [`dedup`]: greedy selection and recording
//! - [`files`]: file layout and rotation
//! - [`pipeline`]: per-category orchestration

pub mod config;
pub mod dedup;
pub mod embeddings;
pub mod error;
pub mod files;
pub mod history;
pub mod models;
pub mod pipeline;
pub mod store;

pub use config::Config;
pub use dedup::{CheckFailurePolicy, Deduplicator, RecordReport, Selection, Uniqueness};
pub use error::{DedupError, Result};
pub use history::{HistoryStore, MatchScope};
pub use models::{DuplicateMatch, Trend, TrendBatch};
pub use pipeline::{CategoryOutcome, CategoryState, Pipeline, RunSummary};
