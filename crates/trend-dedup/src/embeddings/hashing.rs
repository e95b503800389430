use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{Embedding, EmbeddingProvider};
use crate::Result;

/// Tokens that carry no topical signal in trend embedding texts
const STOPWORDS: [&str; 14] = [
  "topic", "keywords", "a", "an", "and", "the", "of", "for", "in", "on", "to", "with", "is", "by",
];

/// Offline, deterministic embedder based on feature hashing.
///
/// Unigrams and bigrams of the lower-cased alphanumeric tokens are hashed with
/// SHA-256 into a fixed number of signed buckets and the result is L2
/// normalized. Text made only of stopwords hashes as one whole-text feature.
/// Output depends only on the input text and the dimension, so it
/// is stable across processes and platforms.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
  model: String,
  dimensions: usize,
}

impl HashingEmbedder {
  pub fn new(model: &str, dimensions: usize) -> Self {
    Self { model: model.to_string(), dimensions: dimensions.max(1) }
  }

  pub fn dimensions(&self) -> usize {
    self.dimensions
  }

  /// Compute the embedding synchronously
  pub fn embed_text(&self, text: &str) -> Embedding {
    let mut tokens = tokenize(text);
    // Stopword-only text still needs a direction to match itself
    if tokens.is_empty() && !text.trim().is_empty() {
      tokens.push(text.trim().to_lowercase());
    }
    let mut vector = vec![0.0f32; self.dimensions];

    let bigrams = tokens.windows(2).map(|pair| format!("{} {}", pair[0], pair[1]));
    for feature in tokens.iter().cloned().chain(bigrams) {
      let (bucket, sign) = self.bucket_for(&feature);
      vector[bucket] += sign;
    }

    normalize(&mut vector);
    vector
  }

  fn bucket_for(&self, feature: &str) -> (usize, f32) {
    let digest = Sha256::digest(feature.as_bytes());
    let mut index_bytes = [0u8; 8];
    index_bytes.copy_from_slice(&digest[..8]);

    let bucket = (u64::from_le_bytes(index_bytes) % self.dimensions as u64) as usize;
    let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
    (bucket, sign)
  }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
  async fn embed(&self, text: &str) -> Result<Embedding> {
    Ok(self.embed_text(text))
  }

  fn name(&self) -> String {
    "hashing".to_string()
  }

  fn model(&self) -> String {
    self.model.clone()
  }
}

fn tokenize(text: &str) -> Vec<String> {
  text
    .split(|c: char| !c.is_alphanumeric())
    .filter(|token| !token.is_empty())
    .map(str::to_lowercase)
    .filter(|token| !STOPWORDS.contains(&token.as_str()))
    .collect()
}

fn normalize(vector: &mut [f32]) {
  let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
  if norm > 0.0 {
    vector.iter_mut().for_each(|x| *x /= norm);
  }
}
