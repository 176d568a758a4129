//! Configuration management for arena evaluation runs
//!
//! Loads task, endpoint and stage settings from TOML files and validates them
//! before any pipeline stage runs.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::analysis::metrics::TieHandling;
use crate::analysis::pairwise::PositionBias;
use crate::queries::evolution::ComplexityOperator;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub task: TaskConfig,
    #[serde(default)]
    pub target_endpoints: IndexMap<String, EndpointConfig>,
    pub judge_endpoint: EndpointConfig,
    #[serde(default)]
    pub query_generation: QueryGenerationConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

/// What the endpoints under evaluation are supposed to do
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
}

/// Connection settings for an OpenAI-compatible chat endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    /// Literal API key; takes precedence over `api_key_env`
    #[serde(default)]
    pub api_key: String,
    /// Environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Requests per minute; unlimited when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpm: Option<u32>,
    #[serde(default)]
    pub extra_params: ExtraParams,
}

/// Sampling parameters forwarded to the endpoint untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Vendor-specific fields, merged into the request body as-is
    #[serde(default, flatten)]
    pub additional: BTreeMap<String, serde_json::Value>,
}

/// Query synthesis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryGenerationConfig {
    #[serde(default = "default_num_queries")]
    pub num_queries: usize,
    #[serde(default)]
    pub seed_queries: Vec<String>,
    #[serde(default = "default_queries_per_call")]
    pub queries_per_call: usize,
    #[serde(default = "default_num_parallel_batches")]
    pub num_parallel_batches: usize,
    #[serde(default = "default_generation_temperature")]
    pub temperature: f32,
    /// Queries more similar than this to an already retained one are dropped
    #[serde(default = "default_max_similarity")]
    pub max_similarity: f64,
    /// Upper bound on batch launches before reporting a shortfall
    #[serde(default = "default_max_generation_rounds")]
    pub max_generation_rounds: usize,
    #[serde(default)]
    pub enable_evolution: bool,
    #[serde(default = "default_evolution_rounds")]
    pub evolution_rounds: usize,
    #[serde(default = "default_complexity_levels")]
    pub complexity_levels: Vec<ComplexityOperator>,
    /// Generation capability; the judge endpoint is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointConfig>,
}

/// Collection and judging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    /// Endpoints failing more than this fraction of queries are flagged degraded
    #[serde(default = "default_degraded_failure_rate")]
    pub degraded_failure_rate: f64,
    /// Judge every pair in both presentation orders
    #[serde(default = "default_true")]
    pub swap_order: bool,
    #[serde(default)]
    pub position_bias: PositionBias,
    #[serde(default)]
    pub tie_handling: TieHandling,
    #[serde(default = "default_judge_temperature")]
    pub judge_temperature: f32,
    /// Fixed evaluation criteria; generated from the task when empty
    #[serde(default)]
    pub rubrics: Vec<String>,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_run_id")]
    pub run_id: String,
    #[serde(default)]
    pub save_queries: bool,
    #[serde(default)]
    pub save_responses: bool,
    #[serde(default)]
    pub save_details: bool,
}

/// Markdown report settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Number of example comparisons quoted in the report
    #[serde(default = "default_include_examples")]
    pub include_examples: usize,
}

// Default value functions
fn default_true() -> bool { true }
fn default_num_queries() -> usize { 20 }
fn default_queries_per_call() -> usize { 10 }
fn default_num_parallel_batches() -> usize { 3 }
fn default_generation_temperature() -> f32 { 0.9 }
fn default_max_similarity() -> f64 { 0.85 }
fn default_max_generation_rounds() -> usize { 3 }
fn default_evolution_rounds() -> usize { 1 }
fn default_complexity_levels() -> Vec<ComplexityOperator> {
    vec![
        ComplexityOperator::Constraints,
        ComplexityOperator::Reasoning,
        ComplexityOperator::EdgeCases,
    ]
}
fn default_max_concurrency() -> usize { 10 }
fn default_timeout_ms() -> u64 { 60_000 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 1000 }
fn default_max_retry_delay_ms() -> u64 { 30_000 }
fn default_degraded_failure_rate() -> f64 { 0.2 }
fn default_judge_temperature() -> f32 { 0.1 }
fn default_output_dir() -> String { "evaluation_results".to_string() }
fn default_run_id() -> String { "default".to_string() }
fn default_include_examples() -> usize { 3 }

impl Default for QueryGenerationConfig {
    fn default() -> Self {
        Self {
            num_queries: default_num_queries(),
            seed_queries: Vec::new(),
            queries_per_call: default_queries_per_call(),
            num_parallel_batches: default_num_parallel_batches(),
            temperature: default_generation_temperature(),
            max_similarity: default_max_similarity(),
            max_generation_rounds: default_max_generation_rounds(),
            enable_evolution: false,
            evolution_rounds: default_evolution_rounds(),
            complexity_levels: default_complexity_levels(),
            endpoint: None,
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            degraded_failure_rate: default_degraded_failure_rate(),
            swap_order: true,
            position_bias: PositionBias::default(),
            tie_handling: TieHandling::default(),
            judge_temperature: default_judge_temperature(),
            rubrics: Vec::new(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            run_id: default_run_id(),
            save_queries: false,
            save_responses: false,
            save_details: false,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            include_examples: default_include_examples(),
        }
    }
}

impl EndpointConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: String::new(),
            api_key_env: None,
            model: model.into(),
            system_prompt: None,
            rpm: None,
            extra_params: ExtraParams::default(),
        }
    }

    /// Resolve the API key from the literal value or the environment
    pub fn resolve_api_key(&self, endpoint: &str) -> Result<String, ConfigError> {
        if !self.api_key.is_empty() {
            return Ok(self.api_key.clone());
        }
        match &self.api_key_env {
            Some(var) => std::env::var(var).map_err(|_| ConfigError::MissingApiKey {
                endpoint: endpoint.to_string(),
                hint: format!("environment variable {} is not set", var),
            }),
            None => Err(ConfigError::MissingApiKey {
                endpoint: endpoint.to_string(),
                hint: "set api_key or api_key_env".to_string(),
            }),
        }
    }

    fn validate(&self, endpoint: &str) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "endpoint '{}' has no model",
                endpoint
            )));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "endpoint '{}' has an invalid base_url: '{}'",
                endpoint, self.base_url
            )));
        }
        if let Some(0) = self.rpm {
            return Err(ConfigError::Invalid(format!(
                "endpoint '{}' has rpm = 0",
                endpoint
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parse configuration from a JSON string (legacy support)
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from an explicit path, or from the first default location that exists
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            let config = Self::from_file(path)?;
            tracing::info!("Loaded configuration from {}", path.display());
            return Ok(config);
        }

        let config_paths = ["arena.toml", "config/arena.toml"];
        for candidate in &config_paths {
            let candidate = PathBuf::from(candidate);
            if candidate.exists() {
                let config = Self::from_file(&candidate)?;
                tracing::info!("Loaded configuration from {}", candidate.display());
                return Ok(config);
            }
        }

        Err(ConfigError::Io(format!(
            "no configuration file given and none found at {}",
            config_paths.join(", ")
        )))
    }

    /// Save configuration to a TOML file
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        fs::write(path, content)
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.task.description.trim().is_empty() {
            return Err(ConfigError::Invalid("task.description is empty".to_string()));
        }

        if self.target_endpoints.len() < 2 {
            return Err(ConfigError::Invalid(format!(
                "at least 2 target endpoints are required for comparison, got {}",
                self.target_endpoints.len()
            )));
        }
        for (name, endpoint) in &self.target_endpoints {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("endpoint ids must not be empty".to_string()));
            }
            endpoint.validate(name)?;
        }
        self.judge_endpoint.validate("judge")?;

        let qg = &self.query_generation;
        if let Some(endpoint) = &qg.endpoint {
            endpoint.validate("query_generation")?;
        }
        if qg.num_queries == 0 || qg.queries_per_call == 0 || qg.num_parallel_batches == 0 {
            return Err(ConfigError::Invalid(
                "num_queries, queries_per_call and num_parallel_batches must be positive".to_string(),
            ));
        }
        if qg.max_generation_rounds == 0 {
            return Err(ConfigError::Invalid("max_generation_rounds must be positive".to_string()));
        }
        if !(qg.max_similarity > 0.0 && qg.max_similarity <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "max_similarity must be in (0, 1], got {}",
                qg.max_similarity
            )));
        }
        if !(0.0..=2.0).contains(&qg.temperature) {
            return Err(ConfigError::Invalid(format!(
                "query_generation.temperature must be in [0, 2], got {}",
                qg.temperature
            )));
        }
        if qg.enable_evolution && (qg.evolution_rounds == 0 || qg.complexity_levels.is_empty()) {
            return Err(ConfigError::Invalid(
                "evolution needs evolution_rounds >= 1 and at least one complexity level".to_string(),
            ));
        }

        let ev = &self.evaluation;
        if ev.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be positive".to_string()));
        }
        if ev.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&ev.degraded_failure_rate) {
            return Err(ConfigError::Invalid(format!(
                "degraded_failure_rate must be in [0, 1], got {}",
                ev.degraded_failure_rate
            )));
        }

        if self.output.run_id.trim().is_empty()
            || self.output.run_id.contains(['/', '\\'])
        {
            return Err(ConfigError::Invalid(format!(
                "output.run_id '{}' is not a valid directory name",
                self.output.run_id
            )));
        }

        Ok(())
    }

    /// Endpoint ids in configuration order
    pub fn endpoint_ids(&self) -> Vec<String> {
        self.target_endpoints.keys().cloned().collect()
    }

    /// Endpoint used for query generation
    pub fn generation_endpoint(&self) -> &EndpointConfig {
        self.query_generation
            .endpoint
            .as_ref()
            .unwrap_or(&self.judge_endpoint)
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut target_endpoints = IndexMap::new();

        let mut model_a = EndpointConfig::new("https://api.openai.com/v1", "gpt-4o");
        model_a.api_key_env = Some("OPENAI_API_KEY".to_string());
        model_a.system_prompt = Some("You are a helpful assistant.".to_string());
        target_endpoints.insert("model-a".to_string(), model_a);

        let mut model_b = EndpointConfig::new("https://api.openai.com/v1", "gpt-4o-mini");
        model_b.api_key_env = Some("OPENAI_API_KEY".to_string());
        model_b.system_prompt = Some("You are a helpful assistant.".to_string());
        target_endpoints.insert("model-b".to_string(), model_b);

        let mut judge_endpoint = EndpointConfig::new("https://api.openai.com/v1", "gpt-4o");
        judge_endpoint.api_key_env = Some("OPENAI_API_KEY".to_string());

        Self {
            task: TaskConfig {
                description: "General-purpose assistant answering user questions".to_string(),
                scenario: None,
            },
            target_endpoints,
            judge_endpoint,
            query_generation: QueryGenerationConfig::default(),
            evaluation: EvaluationConfig::default(),
            output: OutputConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing API key for endpoint '{endpoint}': {hint}")]
    MissingApiKey { endpoint: String, hint: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[task]
description = "Translate English to Chinese"

[target_endpoints.alpha]
base_url = "http://localhost:8000/v1"
api_key = "k1"
model = "alpha-model"

[target_endpoints.beta]
base_url = "http://localhost:8001/v1"
api_key = "k2"
model = "beta-model"

[target_endpoints.beta.extra_params]
temperature = 0.7
presence_penalty = 0.5

[judge_endpoint]
base_url = "http://localhost:9000/v1"
api_key = "judge"
model = "judge-model"
"#;

    #[test]
    fn test_parse_minimal_config() {
        let config = Config::from_toml(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.endpoint_ids(), vec!["alpha", "beta"]);
        assert_eq!(config.query_generation.num_queries, 20);
        assert_eq!(config.query_generation.max_similarity, 0.85);
        assert_eq!(config.evaluation.max_concurrency, 10);
        assert_eq!(config.evaluation.position_bias, PositionBias::RequireAgreement);
        assert_eq!(config.evaluation.tie_handling, TieHandling::Split);
        assert_eq!(config.output.run_id, "default");
    }

    #[test]
    fn test_extra_params_keep_unknown_fields() {
        let config = Config::from_toml(MINIMAL).unwrap();
        let params = &config.target_endpoints["beta"].extra_params;
        assert_eq!(params.temperature, Some(0.7));
        assert_eq!(
            params.additional.get("presence_penalty"),
            Some(&serde_json::json!(0.5))
        );
    }

    #[test]
    fn test_rejects_single_endpoint() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.target_endpoints.shift_remove("beta");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_out_of_range_similarity() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.query_generation.max_similarity = 1.5;
        assert!(config.validate().is_err());
        config.query_generation.max_similarity = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.judge_endpoint.base_url = "localhost:9000".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_resolution() {
        let mut endpoint = EndpointConfig::new("http://localhost/v1", "m");
        assert!(matches!(
            endpoint.resolve_api_key("x"),
            Err(ConfigError::MissingApiKey { .. })
        ));

        endpoint.api_key_env = Some("ARENA_EVAL_TEST_UNSET_KEY_VAR".to_string());
        assert!(endpoint.resolve_api_key("x").is_err());

        endpoint.api_key = "literal".to_string();
        assert_eq!(endpoint.resolve_api_key("x").unwrap(), "literal");
    }

    #[test]
    fn test_default_config_roundtrips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = Config::from_toml(&text).unwrap();
        assert_eq!(parsed.endpoint_ids(), config.endpoint_ids());
        assert_eq!(
            parsed.query_generation.complexity_levels,
            config.query_generation.complexity_levels
        );
    }
}
