//! Response collection across all target endpoints

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::executor::{Executor, RetryPolicy, TaskFailure};
use crate::providers::{Endpoint, ProviderError};
use crate::queries::GeneratedQuery;

/// Failure category of a single (endpoint, query) call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionErrorKind {
    Timeout,
    RateLimited,
    Transport,
    Api,
    Auth,
    Parse,
    Panicked,
}

/// Typed failure recorded in place of a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionError {
    pub kind: CollectionErrorKind,
    pub message: String,
}

impl From<&ProviderError> for CollectionError {
    fn from(error: &ProviderError) -> Self {
        let kind = match error {
            ProviderError::Http(_) => CollectionErrorKind::Transport,
            ProviderError::Api { .. } => CollectionErrorKind::Api,
            ProviderError::RateLimited { .. } => CollectionErrorKind::RateLimited,
            ProviderError::Timeout { .. } => CollectionErrorKind::Timeout,
            ProviderError::Parse(_) => CollectionErrorKind::Parse,
            ProviderError::Config(_) => CollectionErrorKind::Auth,
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

impl From<TaskFailure> for CollectionError {
    fn from(failure: TaskFailure) -> Self {
        Self {
            kind: CollectionErrorKind::Panicked,
            message: failure.to_string(),
        }
    }
}

/// Outcome for one (endpoint, query) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedResponse {
    pub query_id: String,
    #[serde(flatten)]
    pub outcome: ResponseOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponseOutcome {
    Success { text: String, latency_ms: u64 },
    Failed { error: CollectionError },
}

impl CollectedResponse {
    pub fn text(&self) -> Option<&str> {
        match &self.outcome {
            ResponseOutcome::Success { text, .. } => Some(text),
            ResponseOutcome::Failed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ResponseOutcome::Success { .. })
    }
}

/// Responses of every endpoint, each list aligned with the query list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionResult {
    pub responses: IndexMap<String, Vec<CollectedResponse>>,
    /// Endpoints whose failure rate exceeded the threshold
    #[serde(default)]
    pub degraded: Vec<String>,
}

impl CollectionResult {
    /// Endpoint ids in collection order
    pub fn endpoints(&self) -> Vec<String> {
        self.responses.keys().cloned().collect()
    }

    /// Fraction of failed pairs for an endpoint
    pub fn failure_rate(&self, endpoint: &str) -> f64 {
        match self.responses.get(endpoint) {
            Some(list) if !list.is_empty() => {
                let failed = list.iter().filter(|r| !r.is_success()).count();
                failed as f64 / list.len() as f64
            }
            _ => 0.0,
        }
    }

    pub fn successful_count(&self) -> usize {
        self.responses
            .values()
            .flat_map(|list| list.iter())
            .filter(|r| r.is_success())
            .count()
    }

    /// Successful response text for (endpoint, query index)
    pub fn text_at(&self, endpoint: &str, index: usize) -> Option<&str> {
        self.responses
            .get(endpoint)
            .and_then(|list| list.get(index))
            .and_then(|r| r.text())
    }
}

/// Collects one response per (endpoint, query) pair
pub struct ResponseCollector {
    executor: Executor,
    retry: RetryPolicy,
    degraded_failure_rate: f64,
}

impl ResponseCollector {
    pub fn new(executor: Executor, retry: RetryPolicy, degraded_failure_rate: f64) -> Self {
        Self {
            executor,
            retry,
            degraded_failure_rate,
        }
    }

    /// Query every endpoint with every query under one concurrency bound
    pub async fn collect(&self, queries: &[GeneratedQuery], endpoints: &[Endpoint]) -> CollectionResult {
        tracing::info!(
            "Collecting {} responses ({} queries x {} endpoints, concurrency {})",
            queries.len() * endpoints.len(),
            queries.len(),
            endpoints.len(),
            self.executor.max_concurrency()
        );

        let mut futures = Vec::with_capacity(queries.len() * endpoints.len());
        for endpoint in endpoints {
            for query in queries {
                let endpoint = endpoint.clone();
                let retry = self.retry.clone();
                let request = endpoint.request(query.text.clone());
                futures.push(async move {
                    retry
                        .complete(endpoint.provider.as_ref(), &request)
                        .await
                        .map(|r| (r.content, r.latency_ms))
                        .map_err(|e| CollectionError::from(&e))
                });
            }
        }

        let mut outcomes = self.executor.gather(futures).await.into_iter();

        let mut result = CollectionResult::default();
        for endpoint in endpoints {
            let mut list = Vec::with_capacity(queries.len());
            for query in queries {
                let outcome = match outcomes.next() {
                    Some(Ok(Ok((text, latency_ms)))) => ResponseOutcome::Success { text, latency_ms },
                    Some(Ok(Err(error))) => ResponseOutcome::Failed { error },
                    Some(Err(failure)) => ResponseOutcome::Failed {
                        error: failure.into(),
                    },
                    None => ResponseOutcome::Failed {
                        error: TaskFailure::Cancelled.into(),
                    },
                };
                list.push(CollectedResponse {
                    query_id: query.id.clone(),
                    outcome,
                });
            }
            result.responses.insert(endpoint.id.clone(), list);
        }

        for endpoint in endpoints {
            let rate = result.failure_rate(&endpoint.id);
            if rate > self.degraded_failure_rate {
                tracing::warn!(
                    "Endpoint {} degraded: {:.0}% of queries failed",
                    endpoint.id,
                    rate * 100.0
                );
                result.degraded.push(endpoint.id.clone());
            }
        }

        tracing::info!(
            "Collected {} successful responses",
            result.successful_count()
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ScriptedProvider, ScriptedReply};
    use crate::queries::Provenance;
    use crate::runner::rate_limiter::RateLimiter;
    use std::sync::Arc;
    use std::time::Duration;

    fn queries(n: usize) -> Vec<GeneratedQuery> {
        (0..n)
            .map(|i| GeneratedQuery::new(format!("q{:04}", i + 1), format!("question {}", i), Provenance::Custom))
            .collect()
    }

    fn collector(max_retries: u32) -> ResponseCollector {
        ResponseCollector::new(
            Executor::new(4),
            RetryPolicy {
                max_retries,
                retry_delay_ms: 1,
                max_retry_delay_ms: 2,
                timeout_ms: 50,
            },
            0.2,
        )
    }

    #[tokio::test]
    async fn test_collects_every_pair() {
        let endpoints: Vec<Endpoint> = ["a", "b", "c"]
            .iter()
            .map(|id| Endpoint::new(*id, Arc::new(ScriptedProvider::echo(*id))))
            .collect();

        let result = collector(0).collect(&queries(5), &endpoints).await;

        assert_eq!(result.endpoints(), vec!["a", "b", "c"]);
        assert_eq!(result.successful_count(), 15);
        assert!(result.degraded.is_empty());
        assert_eq!(result.text_at("b", 2), Some("[b] question 2"));
        assert_eq!(result.responses["c"][4].query_id, "q0005");
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_flag_degraded() {
        let flaky = ScriptedProvider::new("flaky", |request, _| {
            let text = request.last_user_content().unwrap_or_default().to_string();
            if text.ends_with('1') || text.ends_with('3') {
                ScriptedReply::ok("late").with_delay(Duration::from_millis(200))
            } else {
                ScriptedReply::ok(text)
            }
        });
        let endpoints = vec![
            Endpoint::new("steady", Arc::new(ScriptedProvider::echo("steady"))),
            Endpoint::new("flaky", Arc::new(flaky)),
        ];

        let result = collector(0).collect(&queries(4), &endpoints).await;

        assert_eq!(result.responses["flaky"].len(), 4);
        assert!(result.responses["flaky"][0].is_success());
        match &result.responses["flaky"][1].outcome {
            ResponseOutcome::Failed { error } => assert_eq!(error.kind, CollectionErrorKind::Timeout),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(result.failure_rate("flaky"), 0.5);
        assert_eq!(result.degraded, vec!["flaky"]);
    }

    #[tokio::test]
    async fn test_failure_rate_at_threshold_not_degraded() {
        let provider = ScriptedProvider::new("edge", |request, _| {
            if request.last_user_content() == Some("question 0") {
                ScriptedReply::err(ProviderError::Config("auth error (401)".to_string()))
            } else {
                ScriptedReply::ok("fine")
            }
        });
        let endpoints = vec![
            Endpoint::new("edge", Arc::new(provider)),
            Endpoint::new("other", Arc::new(ScriptedProvider::echo("other"))),
        ];

        // 1 of 5 failed: exactly 0.2, which is not above the threshold
        let result = collector(2).collect(&queries(5), &endpoints).await;
        assert_eq!(result.failure_rate("edge"), 0.2);
        assert!(result.degraded.is_empty());
    }

    #[tokio::test]
    async fn test_throttled_endpoint_is_not_degraded() {
        // Two starts per 150ms window against a 50ms attempt timeout
        let limiter = Arc::new(RateLimiter::with_window(2, Duration::from_millis(150)));
        let limited = ScriptedProvider::echo("limited").with_limiter(limiter);
        let endpoints = vec![Endpoint::new("limited", Arc::new(limited))];

        let result = collector(0).collect(&queries(4), &endpoints).await;

        assert_eq!(result.successful_count(), 4);
        assert_eq!(result.failure_rate("limited"), 0.0);
        assert!(result.degraded.is_empty());
        assert_eq!(result.text_at("limited", 3), Some("[limited] question 3"));
    }
}
