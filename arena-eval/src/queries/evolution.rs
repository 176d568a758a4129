//! Complexity evolution: rewrite queries into harder variants

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::providers::{CompletionRequest, Endpoint};
use crate::runner::executor::{Executor, RetryPolicy};

/// A rewrite that makes a query more demanding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityOperator {
    /// Add explicit requirements or restrictions
    Constraints,
    /// Require multi-step reasoning
    Reasoning,
    /// Target unusual or boundary inputs
    EdgeCases,
    /// Replace general notions with specific ones
    Concretizing,
    /// Cover a related but rarer topic
    Breadth,
}

impl ComplexityOperator {
    fn instruction(&self) -> &'static str {
        match self {
            Self::Constraints => {
                "Add one or two concrete constraints or requirements the answer must satisfy."
            }
            Self::Reasoning => {
                "Rewrite it so that answering requires explicit multi-step reasoning."
            }
            Self::EdgeCases => {
                "Rewrite it to involve an unusual, ambiguous or boundary-case situation."
            }
            Self::Concretizing => {
                "Replace general concepts with more specific, concrete details."
            }
            Self::Breadth => {
                "Write a new query on a related but less common topic of similar difficulty."
            }
        }
    }
}

impl fmt::Display for ComplexityOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Constraints => "constraints",
            Self::Reasoning => "reasoning",
            Self::EdgeCases => "edge_cases",
            Self::Concretizing => "concretizing",
            Self::Breadth => "breadth",
        };
        write!(f, "{}", name)
    }
}

/// Operator applied to query `index` in evolution pass `round`
pub fn operator_for(levels: &[ComplexityOperator], index: usize, round: usize) -> Option<ComplexityOperator> {
    if levels.is_empty() {
        return None;
    }
    Some(levels[(index + round) % levels.len()])
}

fn evolution_prompt(task: &str, query: &str, operator: ComplexityOperator) -> String {
    format!(
        "You are rewriting evaluation queries for the following task:\n{}\n\n\
         Original query:\n{}\n\n\
         {}\n\
         Keep it self-contained and answerable. Output only the rewritten query, nothing else.",
        task,
        query,
        operator.instruction()
    )
}

/// Strip quoting and labels models like to add around a rewritten query
fn clean_rewrite(raw: &str) -> Option<String> {
    let mut text = raw.trim();
    for prefix in ["Rewritten query:", "Query:", "Rewritten:"] {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim();
        }
    }
    let text = text.trim_matches('"').trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Rewrites queries through the generation endpoint
pub struct QueryEvolver {
    endpoint: Endpoint,
    executor: Executor,
    retry: RetryPolicy,
    temperature: f32,
}

impl QueryEvolver {
    pub fn new(endpoint: Endpoint, executor: Executor, retry: RetryPolicy, temperature: f32) -> Self {
        Self {
            endpoint,
            executor,
            retry,
            temperature,
        }
    }

    /// One evolution pass. Each slot is the rewritten text and its operator,
    /// or `None` when the rewrite failed and the original should be kept.
    pub async fn evolve(
        &self,
        task: &str,
        queries: &[String],
        levels: &[ComplexityOperator],
        round: usize,
    ) -> Vec<Option<(String, ComplexityOperator)>> {
        let mut futures = Vec::with_capacity(queries.len());

        for (index, query) in queries.iter().enumerate() {
            let operator = operator_for(levels, index, round);
            let endpoint = self.endpoint.clone();
            let retry = self.retry.clone();
            let prompt = operator.map(|op| evolution_prompt(task, query, op));
            let temperature = self.temperature;

            futures.push(async move {
                let (operator, prompt) = (operator?, prompt?);
                let request = CompletionRequest::user(prompt).with_temperature(temperature);
                match retry.complete(endpoint.provider.as_ref(), &request).await {
                    Ok(response) => clean_rewrite(&response.content).map(|text| (text, operator)),
                    Err(e) => {
                        tracing::warn!("Evolution ({}) failed, keeping original: {}", operator, e);
                        None
                    }
                }
            });
        }

        self.executor
            .gather(futures)
            .await
            .into_iter()
            .map(|slot| slot.ok().flatten())
            .collect()
    }
}
