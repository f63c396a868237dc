//! Retry with exponential backoff for transient provider faults

use std::time::Duration;

use async_trait::async_trait;

use crate::{CompletionEventStream, CompletionRequest, Error, Result, providers::Completer};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }

    /// Delay before retrying `error`, honouring a server-provided retry-after
    fn delay_for(&self, error: &Error, attempt: u32) -> Duration {
        match error {
            Error::RateLimited {
                retry_after: Some(secs),
            } => Duration::from_secs(*secs).min(self.max_delay),
            _ => self.delay_for_attempt(attempt),
        }
    }
}

/// Wraps a completer and retries opening the stream on retryable errors.
///
/// Only connection-level failures are retried. Once a stream is handed out
/// its events are passed through untouched.
pub struct Retrying<C> {
    inner: C,
    config: RetryConfig,
}

impl<C: Completer> Retrying<C> {
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: Completer> Completer for Retrying<C> {
    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionEventStream> {
        let mut attempt = 0;
        loop {
            match self.inner.stream(request).await {
                Ok(stream) => return Ok(stream),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.delay_for(&e, attempt);
                    attempt += 1;
                    tracing::warn!(
                        "Completion request failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt,
                        self.config.max_retries,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}
