//! Scripted in-process provider
//!
//! Replies are produced by a closure over the request and the call index, so
//! endpoint and judge behaviour (text, delays, failures) can be staged without
//! a network.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::traits::{CompletionRequest, CompletionResponse, LLMProvider, ProviderError, ProviderResult};
use crate::runner::rate_limiter::RateLimiter;

/// One scripted reply
#[derive(Debug)]
pub struct ScriptedReply {
    pub delay: Option<Duration>,
    pub result: ProviderResult<String>,
}

impl ScriptedReply {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            delay: None,
            result: Ok(content.into()),
        }
    }

    pub fn err(error: ProviderError) -> Self {
        Self {
            delay: None,
            result: Err(error),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Script = dyn Fn(&CompletionRequest, usize) -> ScriptedReply + Send + Sync;

/// Provider whose replies come from a script
pub struct ScriptedProvider {
    name: String,
    script: Box<Script>,
    calls: AtomicUsize,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl ScriptedProvider {
    pub fn new<F>(name: impl Into<String>, script: F) -> Self
    where
        F: Fn(&CompletionRequest, usize) -> ScriptedReply + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            rate_limiter: None,
        }
    }

    /// Throttle calls the way an endpoint with an `rpm` budget does
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Always answer with the same text
    pub fn fixed(name: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self::new(name, move |_, _| ScriptedReply::ok(content.clone()))
    }

    /// Echo the last user message prefixed by the provider name
    pub fn echo(name: impl Into<String>) -> Self {
        let name = name.into();
        let prefix = name.clone();
        Self::new(name, move |request, _| {
            ScriptedReply::ok(format!(
                "[{}] {}",
                prefix,
                request.last_user_content().unwrap_or_default()
            ))
        })
    }

    /// Number of `complete` calls received so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        "scripted"
    }

    async fn ready(&self) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = (self.script)(request, index);

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }

        let content = reply.result?;
        Ok(CompletionResponse {
            output_tokens: content.split_whitespace().count() as u32,
            content,
            model: "scripted".to_string(),
            input_tokens: 0,
            finish_reason: "stop".to_string(),
            latency_ms: reply.delay.map(|d| d.as_millis() as u64).unwrap_or(0),
        })
    }
}
