//! Bounded async fan-out and the retry policy for provider calls

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use crate::config::EvaluationConfig;
use crate::providers::{CompletionRequest, CompletionResponse, LLMProvider, ProviderError};

/// Why a spawned task produced no value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskFailure {
    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task cancelled")]
    Cancelled,
}

/// Runs futures concurrently with at most `max_concurrency` in flight
#[derive(Clone)]
pub struct Executor {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
}

impl Executor {
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Spawn every future and collect the outputs in input order.
    ///
    /// All futures reach a terminal state before this returns. A panic
    /// affects only its own slot.
    pub async fn gather<T, F>(&self, futures: Vec<F>) -> Vec<Result<T, TaskFailure>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut handles = Vec::with_capacity(futures.len());

        for future in futures {
            let semaphore = self.semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                Some(future.await)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = match handle.await {
                Ok(Some(value)) => Ok(value),
                Ok(None) => Err(TaskFailure::Cancelled),
                Err(e) if e.is_panic() => {
                    let message = panic_message(e.into_panic());
                    tracing::error!("Task execution panicked: {}", message);
                    Err(TaskFailure::Panicked(message))
                }
                Err(_) => Err(TaskFailure::Cancelled),
            };
            results.push(result);
        }

        results
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Timeout and retry settings for a single provider call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Initial retry delay in milliseconds
    pub retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds
    pub max_retry_delay_ms: u64,
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EvaluationConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EvaluationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
            max_retry_delay_ms: config.max_retry_delay_ms,
            timeout_ms: config.timeout_ms,
        }
    }

    /// Call the provider, retrying transient failures with exponential backoff
    pub async fn complete(
        &self,
        provider: &dyn LLMProvider,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let mut delay = self.retry_delay_ms;
        let mut attempt = 0;

        loop {
            match self.try_once(provider, request).await {
                Ok(response) => return Ok(response),
                Err(e) if !e.is_retryable() => {
                    tracing::error!("Non-retryable error on {}: {}", provider.name(), e);
                    return Err(e);
                }
                Err(e) if attempt >= self.max_retries => {
                    tracing::error!(
                        "Giving up on {} after {} attempts: {}",
                        provider.name(),
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }
                Err(ProviderError::RateLimited { retry_after_ms }) => {
                    let wait = retry_after_ms.min(self.max_retry_delay_ms);
                    tracing::warn!(
                        "Rate limited on {}, waiting {}ms (server asked {}ms)",
                        provider.name(),
                        wait,
                        retry_after_ms
                    );
                    sleep(Duration::from_millis(wait)).await;
                }
                Err(e) => {
                    tracing::debug!("Attempt {} on {} failed: {}", attempt + 1, provider.name(), e);
                    sleep(Duration::from_millis(delay)).await;
                    delay = delay.saturating_mul(2).min(self.max_retry_delay_ms);
                }
            }

            attempt += 1;
            tracing::info!("Retry {} on {}", attempt, provider.name());
        }
    }

    /// Single attempt bounded by the timeout; waiting on `ready` is not
    async fn try_once(
        &self,
        provider: &dyn LLMProvider,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        provider.ready().await;
        let timeout = Duration::from_millis(self.timeout_ms);

        match tokio::time::timeout(timeout, provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                timeout_ms: self.timeout_ms,
            }),
        }
    }
}
