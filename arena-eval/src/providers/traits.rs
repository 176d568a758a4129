//! Provider trait definitions for chat-completion endpoints

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ExtraParams;

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Request for a chat completion
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub seed: Option<u64>,
    pub system_prompt: Option<String>,
    /// Vendor-specific body fields
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Single user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(vec![Message::user(content)])
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Apply endpoint sampling parameters; explicit request values win
    pub fn with_params(mut self, params: &ExtraParams) -> Self {
        self.temperature = self.temperature.or(params.temperature);
        self.top_p = self.top_p.or(params.top_p);
        self.max_tokens = self.max_tokens.or(params.max_tokens);
        self.seed = self.seed.or(params.seed);
        for (key, value) in &params.additional {
            self.extra.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self
    }

    /// Text of the last user message, if any
    pub fn last_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
    }
}

/// Response from a chat endpoint
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: String,
    pub latency_ms: u64,
}

/// Error types for provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Parse error: {0}")]
    Parse(String),

    /// Authentication or setup problem; retrying cannot help
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(_) => true,
            ProviderError::Api { status, .. } => *status >= 500 || *status == 408,
            ProviderError::RateLimited { .. } => true,
            ProviderError::Timeout { .. } => true,
            ProviderError::Parse(_) => true,
            ProviderError::Config(_) => false,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Trait for chat-completion providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Provider name used in logs
    fn name(&self) -> &str;

    /// Model sent with every request
    fn default_model(&self) -> &str;

    /// Wait until the provider accepts another request.
    ///
    /// Awaited before the per-call timeout starts, so throttling never
    /// counts as a timed-out attempt.
    async fn ready(&self) {}

    /// Send a completion request
    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_params_keeps_explicit_values() {
        let mut params = ExtraParams {
            temperature: Some(0.7),
            top_p: Some(0.9),
            ..Default::default()
        };
        params
            .additional
            .insert("presence_penalty".to_string(), serde_json::json!(0.2));

        let request = CompletionRequest::user("hi")
            .with_temperature(0.1)
            .with_params(&params);

        assert_eq!(request.temperature, Some(0.1));
        assert_eq!(request.top_p, Some(0.9));
        assert_eq!(request.extra["presence_penalty"], serde_json::json!(0.2));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::Timeout { timeout_ms: 10 }.is_retryable());
        assert!(ProviderError::RateLimited { retry_after_ms: 10 }.is_retryable());
        assert!(ProviderError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(!ProviderError::Api { status: 400, message: String::new() }.is_retryable());
        assert!(!ProviderError::Config("bad key".to_string()).is_retryable());
    }

    #[test]
    fn test_last_user_content() {
        let request = CompletionRequest::new(vec![
            Message::system("sys"),
            Message::user("first"),
            Message::assistant("reply"),
            Message::user("second"),
        ]);
        assert_eq!(request.last_user_content(), Some("second"));
    }
}
