//! Pairwise scheduling, the LLM judge and verdict extraction

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::scoring::{Grader, GraderInput, GraderOutcome, GradingError, GradingErrorKind};
use crate::providers::{CompletionRequest, Endpoint, Message, ProviderError};
use crate::queries::GeneratedQuery;
use crate::reply;
use crate::runner::collector::CollectionResult;
use crate::runner::executor::RetryPolicy;

/// Mapping from the scheduled item layout to judge fields
pub const PAIRWISE_MAPPING: [(&str, &str); 3] = [
    ("instruction", "evaluation_data.instruction"),
    ("response_a", "evaluation_data.response_a"),
    ("response_b", "evaluation_data.response_b"),
];

/// How the two presentation orders of a pair are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionBias {
    /// A win needs both orders to agree; otherwise the pair is a tie
    #[default]
    RequireAgreement,
    /// Each order counts as its own comparison
    CountEach,
}

/// Presentation order of a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairOrder {
    Original,
    Swapped,
}

/// One judgement to be made: `model_a` is shown as Response A
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledComparison {
    pub query_id: String,
    pub model_a: String,
    pub model_b: String,
    pub order: PairOrder,
}

/// All unordered index pairs `(i, j)` with `i < j`, in lexicographic order
pub fn enumerate_pairs(count: usize) -> Vec<(usize, usize)> {
    let mut pairs = Vec::with_capacity(count * count.saturating_sub(1) / 2);
    for i in 0..count {
        for j in (i + 1)..count {
            pairs.push((i, j));
        }
    }
    pairs
}

/// Build the comparison schedule and the grading items for it.
///
/// Only endpoints with a successful response to a query take part in that
/// query's pairs.
pub fn schedule(
    queries: &[GeneratedQuery],
    responses: &CollectionResult,
    swap_order: bool,
) -> (Vec<ScheduledComparison>, Vec<Value>) {
    let endpoints = responses.endpoints();
    let mut comparisons = Vec::new();
    let mut items = Vec::new();

    for (index, query) in queries.iter().enumerate() {
        let candidates: Vec<(&str, &str)> = endpoints
            .iter()
            .filter_map(|id| responses.text_at(id, index).map(|text| (id.as_str(), text)))
            .collect();

        for (i, j) in enumerate_pairs(candidates.len()) {
            let (a, text_a) = candidates[i];
            let (b, text_b) = candidates[j];

            let mut orders = vec![(a, text_a, b, text_b, PairOrder::Original)];
            if swap_order {
                orders.push((b, text_b, a, text_a, PairOrder::Swapped));
            }

            for (model_a, response_a, model_b, response_b, order) in orders {
                items.push(json!({
                    "evaluation_data": {
                        "instruction": query.text,
                        "response_a": response_a,
                        "response_b": response_b,
                    },
                    "metadata": {
                        "query_id": query.id,
                        "model_a": model_a,
                        "model_b": model_b,
                        "order": order,
                    },
                }));
                comparisons.push(ScheduledComparison {
                    query_id: query.id.clone(),
                    model_a: model_a.to_string(),
                    model_b: model_b.to_string(),
                    order,
                });
            }
        }
    }

    (comparisons, items)
}

/// Outcome of a single judgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum VerdictOutcome {
    Winner { endpoint: String },
    Tie,
    Error { message: String },
}

/// A judged comparison between two endpoints on one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseVerdict {
    pub query_id: String,
    pub model_a: String,
    pub model_b: String,
    pub order: PairOrder,
    pub outcome: VerdictOutcome,
    #[serde(default)]
    pub reason: String,
}

impl PairwiseVerdict {
    /// Interpret a grader outcome for a scheduled comparison.
    ///
    /// Scores above 0.5 favour Response A, below 0.5 Response B; exactly 0.5
    /// is a tie. Rankings `[1, 2]` and `[2, 1]` are accepted too.
    pub fn from_outcome(comparison: &ScheduledComparison, outcome: &GraderOutcome) -> Self {
        let winner_a = VerdictOutcome::Winner {
            endpoint: comparison.model_a.clone(),
        };
        let winner_b = VerdictOutcome::Winner {
            endpoint: comparison.model_b.clone(),
        };

        let verdict = match outcome {
            GraderOutcome::Score { score, .. } if !score.is_finite() => VerdictOutcome::Error {
                message: format!("non-finite score {}", score),
            },
            GraderOutcome::Score { score, .. } if *score > 0.5 => winner_a,
            GraderOutcome::Score { score, .. } if *score < 0.5 => winner_b,
            GraderOutcome::Score { .. } => VerdictOutcome::Tie,
            GraderOutcome::Rank { rank, .. } => match rank.as_slice() {
                [a, b] if a < b => winner_a,
                [a, b] if a > b => winner_b,
                [_, _] => VerdictOutcome::Tie,
                _ => VerdictOutcome::Error {
                    message: format!("expected a ranking of 2 candidates, got {:?}", rank),
                },
            },
            GraderOutcome::Error { kind, message } => VerdictOutcome::Error {
                message: format!("{:?}: {}", kind, message),
            },
        };

        Self {
            query_id: comparison.query_id.clone(),
            model_a: comparison.model_a.clone(),
            model_b: comparison.model_b.clone(),
            order: comparison.order,
            outcome: verdict,
            reason: match outcome {
                GraderOutcome::Error { .. } => String::new(),
                other => other.reason().to_string(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, VerdictOutcome::Error { .. })
    }
}

#[derive(Debug, Deserialize)]
struct JudgeReply {
    score: f64,
    #[serde(default)]
    reason: String,
}

/// Pairwise grader backed by the judge endpoint
pub struct LlmPairwiseGrader {
    endpoint: Endpoint,
    retry: RetryPolicy,
    rubrics: Vec<String>,
    temperature: f32,
}

impl LlmPairwiseGrader {
    pub const NAME: &'static str = "pairwise_judge";

    pub fn new(endpoint: Endpoint, retry: RetryPolicy, rubrics: Vec<String>, temperature: f32) -> Self {
        Self {
            endpoint,
            retry,
            rubrics,
            temperature,
        }
    }

    fn system_prompt(&self) -> String {
        let criteria: Vec<String> = self.rubrics.iter().map(|r| format!("- {}", r)).collect();
        format!(
            "You are an expert evaluator. Compare two responses based on the given criteria.\n\
             Evaluation Criteria:\n{}\n\n\
             Output JSON with 'score' (1.0 if Response A is better, 0.0 if Response B is better, \
             0.5 if they are equally good) and 'reason' (brief explanation).",
            criteria.join("\n")
        )
    }

    fn user_prompt(instruction: &str, response_a: &str, response_b: &str) -> String {
        format!(
            "Query: {}\n\nResponse A:\n{}\n\nResponse B:\n{}\n\n\
             Which response is better based on the criteria?",
            instruction, response_a, response_b
        )
    }

    fn parse_reply(content: &str) -> Result<GraderOutcome, GradingError> {
        let parsed: JudgeReply = reply::parse_object(content)
            .map_err(|e| GradingError::new(GradingErrorKind::Parse, e))?;

        if !(0.0..=1.0).contains(&parsed.score) {
            return Err(GradingError::new(
                GradingErrorKind::Parse,
                format!("score {} outside [0, 1]", parsed.score),
            ));
        }

        Ok(GraderOutcome::Score {
            score: parsed.score,
            reason: parsed.reason,
        })
    }
}

#[async_trait]
impl Grader for LlmPairwiseGrader {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn required_fields(&self) -> Vec<String> {
        PAIRWISE_MAPPING.iter().map(|(field, _)| field.to_string()).collect()
    }

    async fn grade(&self, input: &GraderInput) -> Result<GraderOutcome, GradingError> {
        let user = Self::user_prompt(
            &input.text("instruction")?,
            &input.text("response_a")?,
            &input.text("response_b")?,
        );

        let mut request = CompletionRequest::new(vec![Message::user(user)])
            .with_system(self.system_prompt())
            .with_temperature(self.temperature)
            .with_params(&self.endpoint.params);
        if let Some(system) = &self.endpoint.system_prompt {
            request.messages.insert(0, Message::system(system.clone()));
        }

        let response = self
            .retry
            .complete(self.endpoint.provider.as_ref(), &request)
            .await
            .map_err(|e| {
                let kind = match &e {
                    ProviderError::Timeout { .. } => GradingErrorKind::Timeout,
                    _ => GradingErrorKind::Provider,
                };
                GradingError::new(kind, e.to_string())
            })?;

        Self::parse_reply(&response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ScriptedProvider, ScriptedReply};
    use crate::queries::Provenance;
    use crate::runner::collector::{CollectedResponse, CollectionError, CollectionErrorKind, ResponseOutcome};
    use std::sync::Arc;

    fn collection(texts: &[(&str, Vec<Option<&str>>)]) -> CollectionResult {
        let mut result = CollectionResult::default();
        for (endpoint, answers) in texts {
            let list = answers
                .iter()
                .enumerate()
                .map(|(i, answer)| CollectedResponse {
                    query_id: format!("q{:04}", i + 1),
                    outcome: match answer {
                        Some(text) => ResponseOutcome::Success {
                            text: text.to_string(),
                            latency_ms: 1,
                        },
                        None => ResponseOutcome::Failed {
                            error: CollectionError {
                                kind: CollectionErrorKind::Timeout,
                                message: "timeout".to_string(),
                            },
                        },
                    },
                })
                .collect();
            result.responses.insert(endpoint.to_string(), list);
        }
        result
    }

    fn queries(n: usize) -> Vec<GeneratedQuery> {
        (0..n)
            .map(|i| GeneratedQuery::new(format!("q{:04}", i + 1), format!("question {}", i), Provenance::Custom))
            .collect()
    }

    #[test]
    fn test_enumerate_pairs() {
        assert!(enumerate_pairs(0).is_empty());
        assert!(enumerate_pairs(1).is_empty());
        assert_eq!(enumerate_pairs(3), vec![(0, 1), (0, 2), (1, 2)]);
        assert_eq!(enumerate_pairs(6).len(), 15);
    }

    #[test]
    fn test_schedule_with_swap() {
        let responses = collection(&[
            ("a", vec![Some("a0")]),
            ("b", vec![Some("b0")]),
            ("c", vec![Some("c0")]),
        ]);
        let (comparisons, items) = schedule(&queries(1), &responses, true);

        assert_eq!(comparisons.len(), 6);
        assert_eq!(items.len(), 6);
        assert_eq!(comparisons[0].model_a, "a");
        assert_eq!(comparisons[1].model_a, "b");
        assert_eq!(comparisons[1].order, PairOrder::Swapped);
        assert_eq!(items[1]["evaluation_data"]["response_a"], "b0");
        assert_eq!(items[1]["metadata"]["order"], "swapped");
    }

    #[test]
    fn test_schedule_skips_failed_responses() {
        let responses = collection(&[
            ("a", vec![Some("a0"), Some("a1")]),
            ("b", vec![Some("b0"), None]),
        ]);
        let (comparisons, _) = schedule(&queries(2), &responses, false);

        assert_eq!(comparisons.len(), 1);
        assert_eq!(comparisons[0].query_id, "q0001");
    }

    #[test]
    fn test_verdict_from_score_and_rank() {
        let comparison = ScheduledComparison {
            query_id: "q0001".to_string(),
            model_a: "x".to_string(),
            model_b: "y".to_string(),
            order: PairOrder::Original,
        };

        let score = |s: f64| GraderOutcome::Score { score: s, reason: "r".to_string() };
        assert_eq!(
            PairwiseVerdict::from_outcome(&comparison, &score(1.0)).outcome,
            VerdictOutcome::Winner { endpoint: "x".to_string() }
        );
        assert_eq!(
            PairwiseVerdict::from_outcome(&comparison, &score(0.0)).outcome,
            VerdictOutcome::Winner { endpoint: "y".to_string() }
        );
        assert_eq!(PairwiseVerdict::from_outcome(&comparison, &score(0.5)).outcome, VerdictOutcome::Tie);

        let rank = GraderOutcome::Rank { rank: vec![2, 1], reason: String::new() };
        assert_eq!(
            PairwiseVerdict::from_outcome(&comparison, &rank).outcome,
            VerdictOutcome::Winner { endpoint: "y".to_string() }
        );

        let error = GraderOutcome::error(GradingErrorKind::Timeout, "slow");
        assert!(PairwiseVerdict::from_outcome(&comparison, &error).is_error());
    }

    #[test]
    fn test_parse_judge_reply() {
        let outcome = LlmPairwiseGrader::parse_reply(
            "After review:\n{\"score\": 0.0, \"reason\": \"B is more accurate\"}",
        )
        .unwrap();
        assert_eq!(outcome.score(), Some(0.0));
        assert_eq!(outcome.reason(), "B is more accurate");

        assert!(LlmPairwiseGrader::parse_reply("{\"score\": 3}").is_err());
        assert!(LlmPairwiseGrader::parse_reply("A is better").is_err());
    }

    #[tokio::test]
    async fn test_judge_prompt_contains_both_responses() {
        let judge = ScriptedProvider::new("judge", |request, _| {
            let prompt = request.last_user_content().unwrap_or_default();
            let system = request.system_prompt.clone().unwrap_or_default();
            if prompt.contains("Response A:\nfirst") && system.contains("- Accuracy") {
                ScriptedReply::ok("{\"score\": 1.0, \"reason\": \"ok\"}")
            } else {
                ScriptedReply::ok("{\"score\": 0.0, \"reason\": \"unexpected prompt\"}")
            }
        });
        let grader = LlmPairwiseGrader::new(
            Endpoint::new("judge", Arc::new(judge)),
            RetryPolicy::default(),
            vec!["Accuracy".to_string()],
            0.1,
        );

        let mut input = GraderInput::new();
        input.insert("instruction", json!("q"));
        input.insert("response_a", json!("first"));
        input.insert("response_b", json!("second"));

        let outcome = grader.grade(&input).await.unwrap();
        assert_eq!(outcome.score(), Some(1.0));
    }
}
