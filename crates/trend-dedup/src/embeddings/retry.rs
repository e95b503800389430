//! Retry with a fixed delay sequence, applied at the provider boundary

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use super::{Embedding, EmbeddingProvider};
use crate::{DedupError, Result};

/// Bounded attempts with fixed, increasing delays between them
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  max_attempts: u32,
  delays: Vec<Duration>,
  timeout: Option<Duration>,
}

/// Every attempt failed; carries the last failure
#[derive(Debug)]
pub struct RetryExhausted {
  pub attempts: u32,
  pub last_error: DedupError,
}

impl RetryPolicy {
  /// `delays[i]` is waited after failed attempt `i + 1`; the last delay repeats
  pub fn new(max_attempts: u32, delays: Vec<Duration>) -> Self {
    Self { max_attempts: max_attempts.max(1), delays, timeout: None }
  }

  /// Retry without waiting between attempts
  pub fn immediate(max_attempts: u32) -> Self {
    Self::new(max_attempts, Vec::new())
  }

  /// Bound each attempt by `limit`
  pub fn with_timeout(mut self, limit: Duration) -> Self {
    self.timeout = Some(limit);
    self
  }

  pub fn max_attempts(&self) -> u32 {
    self.max_attempts
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.timeout
  }

  /// Delay after the failed attempt with zero-based index `attempt`
  pub fn delay_before_retry(&self, attempt: usize) -> Duration {
    self.delays.get(attempt).or(self.delays.last()).copied().unwrap_or(Duration::ZERO)
  }

  /// Run `operation` until it succeeds or the attempts are used up.
  ///
  /// `on_retry` is called with the failed attempt number (1-based), its error,
  /// and the delay about to be waited.
  pub async fn run<T, F, Fut, R>(
    &self,
    mut operation: F,
    on_retry: R,
  ) -> std::result::Result<T, RetryExhausted>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Fn(u32, &DedupError, Duration),
  {
    let mut attempt = 0;

    loop {
      attempt += 1;

      let error = match self.attempt(operation()).await {
        Ok(value) => return Ok(value),
        Err(e) => e,
      };

      if attempt >= self.max_attempts {
        return Err(RetryExhausted { attempts: attempt, last_error: error });
      }

      let delay = self.delay_before_retry((attempt - 1) as usize);
      on_retry(attempt, &error, delay);
      if !delay.is_zero() {
        sleep(delay).await;
      }
    }
  }

  async fn attempt<T, Fut>(&self, work: Fut) -> Result<T>
  where
    Fut: Future<Output = Result<T>>,
  {
    match self.timeout {
      Some(limit) => timeout(limit, work).await.unwrap_or_else(|_| {
        Err(DedupError::Embedding(format!("attempt timed out after {}s", limit.as_secs_f64())))
      }),
      None => work.await,
    }
  }
}

/// Provider wrapper that applies a [`RetryPolicy`] to every call
pub struct RetryingProvider<P> {
  inner: P,
  policy: RetryPolicy,
  log: bentley::Logger,
}

impl<P: EmbeddingProvider> RetryingProvider<P> {
  pub fn new(inner: P, policy: RetryPolicy, log: &bentley::Logger) -> Self {
    Self { inner, policy, log: log.component("embeddings") }
  }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for RetryingProvider<P> {
  async fn embed(&self, text: &str) -> Result<Embedding> {
    let on_retry = |attempt: u32, error: &DedupError, delay: Duration| {
      self.log.warn(&format!(
        "Embedding attempt {attempt} failed: {error}. Retrying in {}s...",
        delay.as_secs_f64()
      ));
    };

    self.policy.run(|| self.inner.embed(text), on_retry).await.map_err(|exhausted| {
      DedupError::Embedding(format!(
        "Failed to generate embedding after {} attempts: {}",
        exhausted.attempts, exhausted.last_error
      ))
    })
  }

  fn name(&self) -> String {
    self.inner.name()
  }

  fn model(&self) -> String {
    self.inner.model()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::embeddings::MockEmbeddingProvider;
  use mockall::Sequence;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn quiet() -> bentley::Logger {
    bentley::Logger::new("test").silenced()
  }

  #[test]
  fn test_delay_sequence_repeats_last_value() {
    let policy = RetryPolicy::new(
      5,
      vec![Duration::from_secs(1), Duration::from_secs(3), Duration::from_secs(5)],
    );
    assert_eq!(policy.delay_before_retry(0), Duration::from_secs(1));
    assert_eq!(policy.delay_before_retry(2), Duration::from_secs(5));
    assert_eq!(policy.delay_before_retry(7), Duration::from_secs(5));
    assert_eq!(RetryPolicy::immediate(3).delay_before_retry(0), Duration::ZERO);
  }

  #[test]
  fn test_zero_attempts_is_clamped_to_one() {
    assert_eq!(RetryPolicy::immediate(0).max_attempts(), 1);
  }

  #[tokio::test]
  async fn test_run_stops_at_first_success() {
    let calls = AtomicU32::new(0);
    let retries = AtomicU32::new(0);
    let policy = RetryPolicy::immediate(3);

    let result = policy
      .run(
        || {
          let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
          async move {
            if n < 2 {
              Err(DedupError::Embedding("transient".into()))
            } else {
              Ok(n)
            }
          }
        },
        |_, _, _| {
          retries.fetch_add(1, Ordering::SeqCst);
        },
      )
      .await;

    assert_eq!(result.unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(retries.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_run_reports_last_error_after_exhaustion() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::immediate(3);

    let result: std::result::Result<(), _> = policy
      .run(
        || {
          let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
          async move { Err(DedupError::Embedding(format!("failure {n}"))) }
        },
        |_, _, _| {},
      )
      .await;

    let exhausted = result.unwrap_err();
    assert_eq!(exhausted.attempts, 3);
    assert!(exhausted.last_error.to_string().contains("failure 3"));
  }

  #[tokio::test]
  async fn test_attempt_timeout_counts_as_failure() {
    let policy = RetryPolicy::immediate(2).with_timeout(Duration::from_millis(10));

    let result: std::result::Result<(), _> = policy
      .run(
        || async {
          sleep(Duration::from_secs(5)).await;
          Ok(())
        },
        |_, _, _| {},
      )
      .await;

    let exhausted = result.unwrap_err();
    assert_eq!(exhausted.attempts, 2);
    assert!(exhausted.last_error.to_string().contains("timed out"));
  }

  #[tokio::test]
  async fn test_retrying_provider_recovers_from_transient_failure() {
    let mut mock = MockEmbeddingProvider::new();
    let mut seq = Sequence::new();
    mock
      .expect_embed()
      .times(1)
      .in_sequence(&mut seq)
      .returning(|_| Err(DedupError::Embedding("rate limited".into())));
    mock.expect_embed().times(1).in_sequence(&mut seq).returning(|_| Ok(vec![0.5, 0.5]));

    let provider = RetryingProvider::new(mock, RetryPolicy::immediate(3), &quiet());
    assert_eq!(provider.embed("Topic: x").await.unwrap(), vec![0.5, 0.5]);
  }

  #[tokio::test]
  async fn test_retrying_provider_surfaces_embedding_error() {
    let mut mock = MockEmbeddingProvider::new();
    mock.expect_embed().times(3).returning(|_| Err(DedupError::Store("unreachable".into())));

    let provider = RetryingProvider::new(mock, RetryPolicy::immediate(3), &quiet());
    let err = provider.embed("Topic: x").await.unwrap_err();

    assert!(matches!(err, DedupError::Embedding(_)));
    assert!(err.to_string().contains("after 3 attempts"));
  }
}
