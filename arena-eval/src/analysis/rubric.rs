//! Evaluation criteria derived from the task description

use crate::config::TaskConfig;
use crate::providers::{CompletionRequest, Endpoint};
use crate::reply;
use crate::runner::executor::RetryPolicy;

/// Sample queries shown to the rubric writer
pub const RUBRIC_SAMPLE_QUERIES: usize = 5;

/// Criteria used when generation is unavailable
pub const DEFAULT_RUBRICS: [&str; 4] = [
    "Accuracy: the response is factually correct and free of errors",
    "Relevance: the response directly addresses the query",
    "Completeness: the response covers everything the query asks for",
    "Clarity: the response is well organized and easy to follow",
];

pub fn default_rubrics() -> Vec<String> {
    DEFAULT_RUBRICS.iter().map(|r| r.to_string()).collect()
}

/// Generates task-specific evaluation criteria with the judge endpoint
pub struct RubricGenerator {
    endpoint: Endpoint,
    retry: RetryPolicy,
    temperature: f32,
}

impl RubricGenerator {
    pub fn new(endpoint: Endpoint, retry: RetryPolicy, temperature: f32) -> Self {
        Self {
            endpoint,
            retry,
            temperature,
        }
    }

    fn prompt(task: &TaskConfig, samples: &[String]) -> String {
        let mut prompt = format!(
            "Write evaluation criteria for comparing AI responses on this task.\n\nTask: {}\n",
            task.description
        );
        if let Some(scenario) = &task.scenario {
            prompt.push_str(&format!("Scenario: {}\n", scenario));
        }
        if !samples.is_empty() {
            prompt.push_str("\nSample queries:\n");
            for sample in samples.iter().take(RUBRIC_SAMPLE_QUERIES) {
                prompt.push_str(&format!("- {}\n", sample));
            }
        }
        prompt.push_str(
            "\nGive 3 to 6 criteria, each a short name followed by a one-sentence description. \
             Output a JSON array of strings and nothing else.",
        );
        prompt
    }

    /// Ask the judge for criteria; errors describe why no usable list came back
    pub async fn generate(&self, task: &TaskConfig, samples: &[String]) -> Result<Vec<String>, String> {
        let request = CompletionRequest::user(Self::prompt(task, samples))
            .with_temperature(self.temperature)
            .with_params(&self.endpoint.params);

        let response = self
            .retry
            .complete(self.endpoint.provider.as_ref(), &request)
            .await
            .map_err(|e| e.to_string())?;

        let rubrics: Vec<String> = reply::parse_array::<String>(&response.content)?
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();

        if rubrics.is_empty() {
            return Err("judge returned no criteria".to_string());
        }
        Ok(rubrics)
    }

    /// Generated criteria, or the defaults when generation fails
    pub async fn generate_or_default(&self, task: &TaskConfig, samples: &[String]) -> Vec<String> {
        match self.generate(task, samples).await {
            Ok(rubrics) => {
                tracing::info!("Generated {} evaluation criteria", rubrics.len());
                rubrics
            }
            Err(e) => {
                tracing::warn!("Rubric generation failed, using default criteria: {}", e);
                default_rubrics()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ScriptedProvider, ScriptedReply};
    use std::sync::Arc;

    fn task() -> TaskConfig {
        TaskConfig {
            description: "Translate English to Chinese".to_string(),
            scenario: None,
        }
    }

    fn generator(reply: &'static str) -> RubricGenerator {
        let provider = ScriptedProvider::new("judge", move |request, _| {
            assert!(request.last_user_content().unwrap_or_default().contains("- s5"));
            assert!(!request.last_user_content().unwrap_or_default().contains("- s6"));
            ScriptedReply::ok(reply)
        });
        RubricGenerator::new(
            Endpoint::new("judge", Arc::new(provider)),
            RetryPolicy::default(),
            0.1,
        )
    }

    fn samples() -> Vec<String> {
        (1..=6).map(|i| format!("s{}", i)).collect()
    }

    #[tokio::test]
    async fn test_generates_from_json_array() {
        let rubrics = generator("[\"Fidelity: keeps meaning\", \" Fluency: reads naturally \"]")
            .generate_or_default(&task(), &samples())
            .await;
        assert_eq!(rubrics, vec!["Fidelity: keeps meaning", "Fluency: reads naturally"]);
    }

    #[tokio::test]
    async fn test_falls_back_to_defaults() {
        let rubrics = generator("I'd rather not.")
            .generate_or_default(&task(), &samples())
            .await;
        assert_eq!(rubrics, default_rubrics());
    }
}
