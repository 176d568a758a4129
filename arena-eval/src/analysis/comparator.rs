//! Concurrent grading runner
//!
//! Runs every configured grader over every dataset item under one
//! concurrency bound. Per-item failures become `GraderOutcome::Error` in
//! their own slot; only mapping problems abort a run, and they do so before
//! the first grading call.

use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::mapper::{FieldMapper, MappingError};
use super::scoring::{Aggregator, Grader, GraderInput, GraderOutcome, GradingErrorKind};
use crate::runner::executor::{Executor, TaskFailure};

/// Grader name (or aggregator name) to outcomes aligned with the input items
pub type RunnerResults = IndexMap<String, Vec<GraderOutcome>>;

/// A grader together with the mapping that feeds it
#[derive(Clone)]
pub struct GraderConfig {
    grader: Arc<dyn Grader>,
    mapper: Option<FieldMapper>,
}

impl GraderConfig {
    /// Map item paths onto grader fields; checks that required fields are covered
    pub fn new<I, K, V>(grader: Arc<dyn Grader>, mapping: I) -> Result<Self, MappingError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mapper = FieldMapper::compile(mapping)?;
        for field in grader.required_fields() {
            if !mapper.provides(&field) {
                return Err(MappingError::MissingRequiredField {
                    grader: grader.name().to_string(),
                    field,
                });
            }
        }
        Ok(Self {
            grader,
            mapper: Some(mapper),
        })
    }

    /// Hand the item's top-level fields to the grader unchanged
    pub fn unmapped(grader: Arc<dyn Grader>) -> Self {
        Self {
            grader,
            mapper: None,
        }
    }

    pub fn name(&self) -> &str {
        self.grader.name()
    }

    fn project(&self, index: usize, item: &Value) -> Result<GraderInput, MappingError> {
        let unresolved = |target: String, path: String| MappingError::Unresolved {
            grader: self.name().to_string(),
            item: index,
            target,
            path,
        };

        match &self.mapper {
            Some(mapper) => mapper
                .project(item)
                .map_err(|(target, path)| unresolved(target, path)),
            None => {
                let mut input = GraderInput::new();
                if let Value::Object(map) = item {
                    for (key, value) in map {
                        input.insert(key.clone(), value.clone());
                    }
                }
                match self
                    .grader
                    .required_fields()
                    .into_iter()
                    .find(|field| input.get(field).is_none())
                {
                    Some(field) => Err(unresolved(field.clone(), field)),
                    None => Ok(input),
                }
            }
        }
    }
}

/// Generic grading runner
pub struct ComparisonEngine {
    graders: Vec<GraderConfig>,
    aggregators: Vec<Arc<dyn Aggregator>>,
    executor: Executor,
    timeout: Option<Duration>,
}

impl ComparisonEngine {
    pub fn new(graders: Vec<GraderConfig>, executor: Executor) -> Result<Self, MappingError> {
        let mut seen = std::collections::HashSet::new();
        for config in &graders {
            if !seen.insert(config.name().to_string()) {
                return Err(MappingError::DuplicateGrader(config.name().to_string()));
            }
        }
        Ok(Self {
            graders,
            aggregators: Vec::new(),
            executor,
            timeout: None,
        })
    }

    /// Bound each grading call; graders that time their own attempts need none
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_aggregator(mut self, aggregator: Arc<dyn Aggregator>) -> Self {
        self.aggregators.push(aggregator);
        self
    }

    pub async fn run(&self, items: &[Value]) -> Result<RunnerResults, MappingError> {
        // Project everything up front so mapping errors surface before any call
        let mut inputs: Vec<Vec<GraderInput>> = Vec::with_capacity(self.graders.len());
        for config in &self.graders {
            let projected = items
                .iter()
                .enumerate()
                .map(|(index, item)| config.project(index, item))
                .collect::<Result<Vec<_>, _>>()?;
            inputs.push(projected);
        }

        tracing::info!(
            "Grading {} items with {} graders (concurrency {})",
            items.len(),
            self.graders.len(),
            self.executor.max_concurrency()
        );

        let mut futures = Vec::with_capacity(items.len() * self.graders.len());
        for (config, grader_inputs) in self.graders.iter().zip(inputs) {
            for input in grader_inputs {
                let grader = config.grader.clone();
                let timeout = self.timeout;
                futures.push(async move {
                    let graded = match timeout {
                        Some(limit) => match tokio::time::timeout(limit, grader.grade(&input)).await {
                            Ok(graded) => graded,
                            Err(_) => {
                                return GraderOutcome::error(
                                    GradingErrorKind::Timeout,
                                    format!("grading timed out after {}ms", limit.as_millis()),
                                )
                            }
                        },
                        None => grader.grade(&input).await,
                    };
                    match graded {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            tracing::debug!("Grader {} failed: {}", grader.name(), e);
                            e.into()
                        }
                    }
                });
            }
        }

        let mut outcomes = self.executor.gather(futures).await.into_iter().map(|slot| {
            slot.unwrap_or_else(|failure| match failure {
                TaskFailure::Panicked(message) => {
                    GraderOutcome::error(GradingErrorKind::Panicked, message)
                }
                TaskFailure::Cancelled => {
                    GraderOutcome::error(GradingErrorKind::Panicked, "grading task cancelled")
                }
            })
        });

        let mut results = RunnerResults::new();
        for config in &self.graders {
            let column: Vec<GraderOutcome> = outcomes.by_ref().take(items.len()).collect();
            let failed = column.iter().filter(|o| o.is_error()).count();
            if failed > 0 {
                tracing::warn!("Grader {}: {}/{} items failed", config.name(), failed, items.len());
            }
            results.insert(config.name().to_string(), column);
        }

        for aggregator in &self.aggregators {
            let column = (0..items.len())
                .map(|index| {
                    let row: IndexMap<String, &GraderOutcome> = results
                        .iter()
                        .map(|(name, column)| (name.clone(), &column[index]))
                        .collect();
                    aggregator.aggregate(&row)
                })
                .collect();
            results.insert(aggregator.name().to_string(), column);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::scoring::{GradingError, WeightedSum};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scores the length of `text`; misbehaves on request
    struct LengthGrader {
        name: String,
        calls: AtomicUsize,
    }

    impl LengthGrader {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Grader for LengthGrader {
        fn name(&self) -> &str {
            &self.name
        }

        fn required_fields(&self) -> Vec<String> {
            vec!["text".to_string()]
        }

        async fn grade(&self, input: &GraderInput) -> Result<GraderOutcome, GradingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = input.text("text")?;
            match text.as_str() {
                "panic" => panic!("grader exploded"),
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(GraderOutcome::Score { score: 0.0, reason: String::new() })
                }
                "error" => Err(GradingError::new(GradingErrorKind::Provider, "upstream")),
                _ => Ok(GraderOutcome::Score {
                    score: text.len() as f64,
                    reason: "length".to_string(),
                }),
            }
        }
    }

    fn items(texts: &[&str]) -> Vec<Value> {
        texts.iter().map(|t| json!({"data": {"text": t}})).collect()
    }

    #[tokio::test]
    async fn test_outcomes_aligned_with_items() {
        let grader = LengthGrader::new("len");
        let config = GraderConfig::new(grader.clone(), [("text", "data.text")]).unwrap();
        let engine = ComparisonEngine::new(vec![config], Executor::new(2))
            .unwrap()
            .with_timeout(Duration::from_millis(100));

        let results = engine.run(&items(&["a", "panic", "abc", "slow", "error"])).await.unwrap();
        let column = &results["len"];

        assert_eq!(column.len(), 5);
        assert_eq!(column[0].score(), Some(1.0));
        assert!(matches!(column[1], GraderOutcome::Error { kind: GradingErrorKind::Panicked, .. }));
        assert_eq!(column[2].score(), Some(3.0));
        assert!(matches!(column[3], GraderOutcome::Error { kind: GradingErrorKind::Timeout, .. }));
        assert!(matches!(column[4], GraderOutcome::Error { kind: GradingErrorKind::Provider, .. }));
    }

    #[tokio::test]
    async fn test_no_timeout_lets_slow_grader_finish() {
        let grader = LengthGrader::new("len");
        let config = GraderConfig::new(grader.clone(), [("text", "data.text")]).unwrap();
        let engine = ComparisonEngine::new(vec![config], Executor::new(2)).unwrap();

        let results = engine.run(&items(&["slow", "ab"])).await.unwrap();
        assert_eq!(results["len"][0].score(), Some(0.0));
        assert_eq!(results["len"][1].score(), Some(2.0));
    }

    #[tokio::test]
    async fn test_unresolvable_path_fails_before_any_call() {
        let grader = LengthGrader::new("len");
        let config = GraderConfig::new(grader.clone(), [("text", "data.text")]).unwrap();
        let engine = ComparisonEngine::new(vec![config], Executor::new(2)).unwrap();

        let mut dataset = items(&["a", "b"]);
        dataset.push(json!({"other": 1}));

        let err = engine.run(&dataset).await.unwrap_err();
        assert!(matches!(err, MappingError::Unresolved { item: 2, .. }));
        assert_eq!(grader.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_mapper_must_cover_required_fields() {
        let grader = LengthGrader::new("len");
        let result = GraderConfig::new(grader, [("body", "data.text")]);
        assert!(matches!(result, Err(MappingError::MissingRequiredField { .. })));
    }

    #[test]
    fn test_duplicate_grader_names_rejected() {
        let a = GraderConfig::unmapped(LengthGrader::new("same"));
        let b = GraderConfig::unmapped(LengthGrader::new("same"));
        assert!(ComparisonEngine::new(vec![a, b], Executor::new(1)).is_err());
    }

    #[tokio::test]
    async fn test_aggregator_column() {
        let first = GraderConfig::unmapped(LengthGrader::new("first"));
        let second = GraderConfig::unmapped(LengthGrader::new("second"));
        let engine = ComparisonEngine::new(vec![first, second], Executor::new(4))
            .unwrap()
            .with_aggregator(Arc::new(WeightedSum::new("total", [("first", 1.0), ("second", 2.0)])));

        let dataset = vec![json!({"text": "ab"}), json!({"text": "error"})];
        let results = engine.run(&dataset).await.unwrap();

        assert_eq!(results.keys().collect::<Vec<_>>(), vec!["first", "second", "total"]);
        assert_eq!(results["total"][0].score(), Some(6.0));
        assert!(results["total"][1].is_error());
    }
}
