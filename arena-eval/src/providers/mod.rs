//! Chat-completion providers and the runtime endpoint descriptor

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{ScriptedProvider, ScriptedReply};
pub use openai::OpenAIClient;
pub use traits::{
    CompletionRequest, CompletionResponse, LLMProvider, Message, ProviderError, ProviderResult,
};

use std::sync::Arc;

use crate::config::{Config, ConfigError, EndpointConfig, ExtraParams};

/// A system under test (or the judge) ready to be called
#[derive(Clone)]
pub struct Endpoint {
    pub id: String,
    pub provider: Arc<dyn LLMProvider>,
    pub system_prompt: Option<String>,
    pub params: ExtraParams,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            id: id.into(),
            provider,
            system_prompt: None,
            params: ExtraParams::default(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_params(mut self, params: ExtraParams) -> Self {
        self.params = params;
        self
    }

    /// Build an endpoint backed by an OpenAI-compatible client
    pub fn from_config(id: &str, config: &EndpointConfig) -> Result<Self, ConfigError> {
        let api_key = config.resolve_api_key(id)?;
        let mut client = OpenAIClient::new(&config.base_url, api_key, &config.model);
        if let Some(rpm) = config.rpm {
            client = client.with_rpm(rpm);
        }

        Ok(Self {
            id: id.to_string(),
            provider: Arc::new(client),
            system_prompt: config.system_prompt.clone(),
            params: config.extra_params.clone(),
        })
    }

    /// Request for one user prompt with this endpoint's system prompt and parameters
    pub fn request(&self, prompt: impl Into<String>) -> CompletionRequest {
        let mut request = CompletionRequest::user(prompt).with_params(&self.params);
        if let Some(system) = &self.system_prompt {
            request = request.with_system(system.clone());
        }
        request
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("provider", &self.provider.name())
            .field("model", &self.provider.default_model())
            .finish()
    }
}

/// Endpoints resolved from a configuration
pub struct ResolvedEndpoints {
    pub targets: Vec<Endpoint>,
    pub judge: Endpoint,
    pub generator: Endpoint,
}

/// Create every endpoint a run needs, in configuration order
pub fn create_endpoints(config: &Config) -> Result<ResolvedEndpoints, ConfigError> {
    let targets = config
        .target_endpoints
        .iter()
        .map(|(id, endpoint)| Endpoint::from_config(id, endpoint))
        .collect::<Result<Vec<_>, _>>()?;

    let judge = Endpoint::from_config("judge", &config.judge_endpoint)?;
    let generator = match &config.query_generation.endpoint {
        Some(endpoint) => Endpoint::from_config("query_generation", endpoint)?,
        None => judge.clone(),
    };

    Ok(ResolvedEndpoints {
        targets,
        judge,
        generator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_system_prompt() {
        let endpoint = Endpoint::new("alpha", Arc::new(ScriptedProvider::fixed("alpha", "ok")))
            .with_system_prompt("Be brief.");
        let request = endpoint.request("What is 2+2?");

        assert_eq!(request.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(request.last_user_content(), Some("What is 2+2?"));
    }

    #[test]
    fn test_create_endpoints_requires_keys() {
        let mut config = Config::default();
        for endpoint in config.target_endpoints.values_mut() {
            endpoint.api_key_env = None;
        }
        assert!(matches!(
            create_endpoints(&config),
            Err(ConfigError::MissingApiKey { .. })
        ));
    }

    #[test]
    fn test_create_endpoints_in_config_order() {
        let mut config = Config::default();
        for endpoint in config.target_endpoints.values_mut() {
            endpoint.api_key = "k".to_string();
        }
        config.judge_endpoint.api_key = "j".to_string();

        let resolved = create_endpoints(&config).unwrap();
        let ids: Vec<_> = resolved.targets.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["model-a", "model-b"]);
        assert_eq!(resolved.generator.id, "judge");
    }
}
