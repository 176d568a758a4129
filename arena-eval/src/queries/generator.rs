//! Query synthesis through the generation endpoint
//!
//! Batches of candidate queries are requested in parallel rounds, merged in
//! launch order and deduplicated greedily until the requested number is
//! reached or the round budget runs out.

use serde::Deserialize;
use std::sync::Arc;

use super::evolution::QueryEvolver;
use super::similarity::{deduplicate, SimilarityMetric, TrigramJaccard};
use super::{query_id, Difficulty, GeneratedQuery, Provenance};
use crate::config::{QueryGenerationConfig, TaskConfig};
use crate::providers::{CompletionRequest, Endpoint};
use crate::reply;
use crate::runner::executor::{Executor, RetryPolicy};

/// Existing queries quoted back to the model in later rounds
const MAX_AVOID_EXAMPLES: usize = 10;

/// Result of a generation run
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub queries: Vec<GeneratedQuery>,
    pub requested: usize,
    /// Missing queries when fewer than requested survived
    pub shortfall: Option<usize>,
    pub failed_batches: usize,
}

/// One entry of a generation reply
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawQuery {
    Text(String),
    Detailed {
        query: String,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        difficulty: Option<String>,
    },
}

#[derive(Debug, Clone)]
struct Candidate {
    text: String,
    category: Option<String>,
    difficulty: Option<Difficulty>,
    provenance: Provenance,
}

impl AsRef<str> for Candidate {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

fn parse_difficulty(raw: &str) -> Option<Difficulty> {
    match raw.trim().to_lowercase().as_str() {
        "easy" => Some(Difficulty::Easy),
        "medium" => Some(Difficulty::Medium),
        "hard" => Some(Difficulty::Hard),
        _ => None,
    }
}

fn parse_batch(content: &str, round: usize) -> Result<Vec<Candidate>, String> {
    let raw: Vec<RawQuery> = reply::parse_array(content)?;
    let candidates: Vec<Candidate> = raw
        .into_iter()
        .map(|entry| match entry {
            RawQuery::Text(text) => Candidate {
                text,
                category: None,
                difficulty: None,
                provenance: Provenance::Generated { round },
            },
            RawQuery::Detailed {
                query,
                category,
                difficulty,
            } => Candidate {
                text: query,
                category,
                difficulty: difficulty.as_deref().and_then(parse_difficulty),
                provenance: Provenance::Generated { round },
            },
        })
        .filter(|c| !c.text.trim().is_empty())
        .collect();

    if candidates.is_empty() {
        return Err("reply contained no queries".to_string());
    }
    Ok(candidates)
}

fn generation_prompt(
    task: &TaskConfig,
    config: &QueryGenerationConfig,
    retained: &[Candidate],
    batch: usize,
) -> String {
    let mut prompt = format!(
        "Generate {} diverse, realistic user queries for evaluating an AI system.\n\n\
         Task: {}\n",
        config.queries_per_call, task.description
    );

    if let Some(scenario) = &task.scenario {
        prompt.push_str(&format!("Scenario: {}\n", scenario));
    }

    if !config.seed_queries.is_empty() {
        prompt.push_str("\nExample queries:\n");
        for seed in &config.seed_queries {
            prompt.push_str(&format!("- {}\n", seed));
        }
    }

    if !retained.is_empty() {
        prompt.push_str("\nAvoid repeating these existing queries:\n");
        for candidate in retained.iter().rev().take(MAX_AVOID_EXAMPLES) {
            prompt.push_str(&format!("- {}\n", candidate.text));
        }
    }

    prompt.push_str(&format!(
        "\nThis is batch {}; vary topics, phrasing and difficulty.\n\
         Output a JSON array of objects with fields \"query\", \"category\" and \
         \"difficulty\" (easy, medium or hard). Output only the JSON array.",
        batch + 1
    ));
    prompt
}

/// Generates a deduplicated query set for a task
pub struct QueryGenerator {
    endpoint: Endpoint,
    executor: Executor,
    retry: RetryPolicy,
    metric: Arc<dyn SimilarityMetric>,
}

impl QueryGenerator {
    pub fn new(endpoint: Endpoint, executor: Executor, retry: RetryPolicy) -> Self {
        Self {
            endpoint,
            executor,
            retry,
            metric: Arc::new(TrigramJaccard),
        }
    }

    /// Use a different similarity metric for dedup
    pub fn with_metric(mut self, metric: Arc<dyn SimilarityMetric>) -> Self {
        self.metric = metric;
        self
    }

    /// Keep candidates that are not near-duplicates of earlier ones
    fn merge(&self, retained: Vec<Candidate>, threshold: f64) -> Vec<Candidate> {
        let kept = deduplicate(self.metric.as_ref(), &retained, threshold);
        let mut slots: Vec<Option<Candidate>> = retained.into_iter().map(Some).collect();
        kept.into_iter().filter_map(|i| slots[i].take()).collect()
    }

    pub async fn generate(&self, task: &TaskConfig, config: &QueryGenerationConfig) -> GenerationOutcome {
        let requested = config.num_queries;
        let mut retained: Vec<Candidate> = Vec::new();
        let mut failed_batches = 0;

        for round in 1..=config.max_generation_rounds {
            if retained.len() >= requested {
                break;
            }

            tracing::info!(
                "Query generation round {}: {} batches of {} (have {}/{})",
                round,
                config.num_parallel_batches,
                config.queries_per_call,
                retained.len(),
                requested
            );

            let mut futures = Vec::with_capacity(config.num_parallel_batches);
            for batch in 0..config.num_parallel_batches {
                let prompt = generation_prompt(task, config, &retained, batch);
                let request = CompletionRequest::user(prompt).with_temperature(config.temperature);
                let endpoint = self.endpoint.clone();
                let retry = self.retry.clone();

                futures.push(async move {
                    let response = retry
                        .complete(endpoint.provider.as_ref(), &request)
                        .await
                        .map_err(|e| e.to_string())?;
                    parse_batch(&response.content, round)
                });
            }

            let mut merged = retained;
            for (batch, result) in self.executor.gather(futures).await.into_iter().enumerate() {
                match result {
                    Ok(Ok(candidates)) => merged.extend(candidates),
                    Ok(Err(e)) => {
                        failed_batches += 1;
                        tracing::warn!("Generation batch {} (round {}) failed: {}", batch + 1, round, e);
                    }
                    Err(e) => {
                        failed_batches += 1;
                        tracing::warn!("Generation batch {} (round {}) failed: {}", batch + 1, round, e);
                    }
                }
            }

            retained = self.merge(merged, config.max_similarity);
        }

        retained.truncate(requested);

        if config.enable_evolution && !retained.is_empty() {
            retained = self.evolve(task, config, retained).await;
        }

        let queries: Vec<GeneratedQuery> = retained
            .into_iter()
            .enumerate()
            .map(|(index, c)| GeneratedQuery {
                id: query_id(index),
                text: c.text,
                category: c.category,
                difficulty: c.difficulty,
                provenance: c.provenance,
            })
            .collect();

        let shortfall = (queries.len() < requested).then(|| requested - queries.len());
        if let Some(missing) = shortfall {
            tracing::warn!(
                "Generated {} of {} requested queries ({} short)",
                queries.len(),
                requested,
                missing
            );
        } else {
            tracing::info!("Generated {} queries", queries.len());
        }

        GenerationOutcome {
            queries,
            requested,
            shortfall,
            failed_batches,
        }
    }

    async fn evolve(
        &self,
        task: &TaskConfig,
        config: &QueryGenerationConfig,
        mut retained: Vec<Candidate>,
    ) -> Vec<Candidate> {
        let evolver = QueryEvolver::new(
            self.endpoint.clone(),
            self.executor.clone(),
            self.retry.clone(),
            config.temperature,
        );

        for round in 0..config.evolution_rounds {
            let texts: Vec<String> = retained.iter().map(|c| c.text.clone()).collect();
            let rewrites = evolver
                .evolve(&task.description, &texts, &config.complexity_levels, round)
                .await;

            let mut evolved = 0;
            for (candidate, rewrite) in retained.iter_mut().zip(rewrites) {
                if let Some((text, operator)) = rewrite {
                    candidate.text = text;
                    candidate.provenance = Provenance::Evolved {
                        round: round + 1,
                        operator,
                    };
                    evolved += 1;
                }
            }

            retained = self.merge(retained, config.max_similarity);
            tracing::info!(
                "Evolution round {}: {} rewritten, {} kept after dedup",
                round + 1,
                evolved,
                retained.len()
            );
        }

        retained
    }
}
