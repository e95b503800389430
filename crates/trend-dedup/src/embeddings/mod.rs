//! Text embedding providers
//!
//! Providers turn a trend's embedding text into a fixed-length vector. Every
//! provider is wrapped in a [`RetryingProvider`] at construction, so retry and
//! timeout handling lives in one place instead of in each backend.
//!
//! # Usage
//!
//! ```ignore
//! use trend_dedup::embeddings::{create_provider, EmbeddingProvider};
//!
//! let provider = create_provider(&config.deduplication, config.retry_policy(), &log)?;
//! let vector = provider.embed("Topic: WebGPU. Keywords: gpu, browser").await?;
//! ```

use async_trait::async_trait;

use crate::config::DeduplicationSettings;
use crate::{DedupError, Result};

mod hashing;
mod retry;

pub use hashing::HashingEmbedder;
pub use retry::{RetryExhausted, RetryPolicy, RetryingProvider};

/// A vector embedding
pub type Embedding = Vec<f32>;

/// Providers this build knows by name but does not ship a client for
const EXTERNAL_PROVIDERS: [&str; 4] = ["openai", "voyageai", "gemini", "sentence-transformers"];

/// Trait for text embedding backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
  /// Embed a single text. Identical input must yield comparable vectors
  /// across process runs.
  async fn embed(&self, text: &str) -> Result<Embedding>;

  /// Provider name as given in configuration
  fn name(&self) -> String;

  /// Model identifier the vectors come from
  fn model(&self) -> String;
}

#[async_trait]
impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<T> {
  async fn embed(&self, text: &str) -> Result<Embedding> {
    (**self).embed(text).await
  }

  fn name(&self) -> String {
    (**self).name()
  }

  fn model(&self) -> String {
    (**self).model()
  }
}

/// Create the configured provider, wrapped in the retry policy
pub fn create_provider(
  settings: &DeduplicationSettings,
  policy: RetryPolicy,
  log: &bentley::Logger,
) -> Result<Box<dyn EmbeddingProvider>> {
  let name = settings.embedding_provider.to_lowercase();

  match name.as_str() {
    "hashing" => {
      let embedder = HashingEmbedder::new(&settings.embedding_model, settings.embedding_dimensions);
      log.info(&format!(
        "Creating hashing embedding provider ({}, {} dimensions)",
        settings.embedding_model, settings.embedding_dimensions
      ));
      Ok(Box::new(RetryingProvider::new(embedder, policy, log)))
    }
    external if EXTERNAL_PROVIDERS.contains(&external) => Err(DedupError::Configuration(format!(
      "Embedding provider '{external}' is not built into this binary. Supported: hashing"
    ))),
    other => Err(DedupError::Configuration(format!(
      "Unsupported embedding provider: {other}. Supported: hashing"
    ))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;

  fn settings_with_provider(provider: &str) -> DeduplicationSettings {
    let yaml = format!(
      r#"
deduplication:
  history-keywords: h
  collection-name: c
  dedup-analysis-report: d
  similarity-threshold: 0.85
  lookback-days: 7
  target-count: 5
  log: l
  embedding-provider: {provider}
  embedding-model: m
  embedding-dimensions: 64
tech-trend-analysis:
  analysis-report: a
  org-analysis-report: o
"#
    );
    Config::from_yaml_str(&yaml).unwrap().deduplication
  }

  fn quiet() -> bentley::Logger {
    bentley::Logger::new("test").silenced()
  }

  #[tokio::test]
  async fn test_create_hashing_provider() {
    let settings = settings_with_provider("Hashing");
    let provider = create_provider(&settings, RetryPolicy::immediate(1), &quiet()).unwrap();
    assert_eq!(provider.name(), "hashing");
    assert_eq!(provider.model(), "m");
    let vector = provider.embed("Topic: WebGPU").await.unwrap();
    assert_eq!(vector.len(), 64);
  }

  #[test]
  fn test_external_provider_is_configuration_error() {
    let settings = settings_with_provider("openai");
    let err = create_provider(&settings, RetryPolicy::immediate(1), &quiet()).err().unwrap();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("not built into this binary"));
  }

  #[test]
  fn test_unknown_provider_is_configuration_error() {
    let settings = settings_with_provider("word2vec");
    let err = create_provider(&settings, RetryPolicy::immediate(1), &quiet()).err().unwrap();
    assert!(err.to_string().contains("Unsupported embedding provider: word2vec"));
  }

  #[tokio::test]
  async fn test_boxed_provider_delegates() {
    let mut mock = MockEmbeddingProvider::new();
    mock.expect_embed().returning(|_| Ok(vec![1.0, 0.0]));
    mock.expect_name().return_const("mock".to_string());
    mock.expect_model().return_const("mock-v1".to_string());

    let boxed: Box<dyn EmbeddingProvider> = Box::new(mock);
    assert_eq!(boxed.embed("x").await.unwrap(), vec![1.0, 0.0]);
    assert_eq!(boxed.name(), "mock");
    assert_eq!(boxed.model(), "mock-v1");
  }
}
