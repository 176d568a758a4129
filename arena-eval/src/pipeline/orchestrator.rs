//! Resumable evaluation pipeline
//!
//! Runs the stages in order, saving the snapshot after each one. A run with
//! a stored checkpoint picks up at the first stage it has not completed.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use super::checkpoint::{CheckpointError, CheckpointSnapshot, CheckpointStore, FileCheckpointStore};
use super::stage::{Stage, StagePlan};
use crate::analysis::{
    schedule, ComparisonEngine, EvaluationResult, GraderConfig, LlmPairwiseGrader, PairwiseAnalyzer,
    PairwiseVerdict, RubricGenerator, PAIRWISE_MAPPING,
};
use crate::config::{Config, ConfigError};
use crate::error::{PipelineError, PipelineResult};
use crate::providers::{create_endpoints, ResolvedEndpoints};
use crate::queries::{GeneratedQuery, QueryGenerator};
use crate::reporting::{render_report, ArtifactWriter, ConfigSummary, ReportInput, ResultsArtifact};
use crate::runner::{Executor, ResponseCollector, RetryPolicy};

/// Final state of a run
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub result: EvaluationResult,
    pub snapshot: CheckpointSnapshot,
}

/// Reduce a snapshot's verdicts into the evaluation result.
///
/// Pure: the same snapshot always yields the same result.
pub fn reduce(snapshot: &CheckpointSnapshot, config: &Config) -> EvaluationResult {
    let endpoints = match &snapshot.responses {
        Some(responses) if !responses.responses.is_empty() => responses.endpoints(),
        _ => config.endpoint_ids(),
    };
    let degraded = snapshot
        .responses
        .as_ref()
        .map(|r| r.degraded.clone())
        .unwrap_or_default();

    PairwiseAnalyzer::new(config.evaluation.position_bias, config.evaluation.tie_handling)
        .analyze(&endpoints, &snapshot.comparisons)
        .with_run_context(snapshot.queries.len(), degraded, snapshot.query_shortfall)
}

/// Builder for `Pipeline`
pub struct PipelineBuilder {
    config: Config,
    endpoints: Option<ResolvedEndpoints>,
    store: Option<Arc<dyn CheckpointStore>>,
    queries: Option<Vec<GeneratedQuery>>,
    save_artifacts: bool,
}

impl PipelineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            endpoints: None,
            store: None,
            queries: None,
            save_artifacts: false,
        }
    }

    /// Use these endpoints instead of creating them from the configuration
    pub fn endpoints(mut self, endpoints: ResolvedEndpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    pub fn store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Evaluate these queries instead of generating them
    pub fn queries(mut self, queries: Vec<GeneratedQuery>) -> Self {
        self.queries = Some(queries);
        self
    }

    /// Write every artifact, including `evaluation_results.json`
    pub fn save_artifacts(mut self, save: bool) -> Self {
        self.save_artifacts = save;
        self
    }

    pub fn build(self) -> PipelineResult<Pipeline> {
        self.config.validate()?;

        let endpoints = match self.endpoints {
            Some(endpoints) => endpoints,
            None => create_endpoints(&self.config)?,
        };

        if endpoints.targets.len() < 2 {
            return Err(ConfigError::Invalid(format!(
                "at least 2 target endpoints are required for comparison, got {}",
                endpoints.targets.len()
            ))
            .into());
        }
        let mut seen = HashSet::new();
        for target in &endpoints.targets {
            if !seen.insert(target.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate endpoint id '{}'", target.id)).into());
            }
        }

        if let Some(queries) = &self.queries {
            if queries.is_empty() {
                return Err(ConfigError::Invalid("custom query list is empty".to_string()).into());
            }
        }

        let output_dir = PathBuf::from(&self.config.output.output_dir);
        let store: Arc<dyn CheckpointStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileCheckpointStore::new(output_dir.clone())),
        };
        let artifacts = ArtifactWriter::new(output_dir.join(&self.config.output.run_id));

        Ok(Pipeline {
            retry: RetryPolicy::from_config(&self.config.evaluation),
            config: self.config,
            endpoints,
            store,
            custom_queries: self.queries,
            save_artifacts: self.save_artifacts,
            artifacts,
        })
    }
}

/// Drives a run through its stages
pub struct Pipeline {
    config: Config,
    endpoints: ResolvedEndpoints,
    store: Arc<dyn CheckpointStore>,
    custom_queries: Option<Vec<GeneratedQuery>>,
    save_artifacts: bool,
    artifacts: ArtifactWriter,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn builder(config: Config) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn run_id(&self) -> &str {
        &self.config.output.run_id
    }

    fn executor(&self) -> Executor {
        Executor::new(self.config.evaluation.max_concurrency)
    }

    fn plan(&self) -> StagePlan {
        StagePlan {
            include_report: self.config.report.enabled,
        }
    }

    /// Latest valid snapshot for this run, or a fresh one
    fn load_snapshot(&self) -> PipelineResult<CheckpointSnapshot> {
        let run_id = self.run_id().to_string();
        let loaded = match self.store.load(&run_id) {
            Ok(snapshot) => snapshot,
            Err(CheckpointError::Corrupt { path, reason }) => {
                return Err(PipelineError::CheckpointCorruption { run_id, path, reason });
            }
            Err(e) => return Err(e.into()),
        };

        match loaded {
            Some(snapshot) => {
                snapshot
                    .validate(&run_id)
                    .map_err(|reason| PipelineError::CheckpointCorruption {
                        path: self.store.location(&run_id),
                        run_id: run_id.clone(),
                        reason,
                    })?;
                tracing::info!("Resuming run {} from stage {}", run_id, snapshot.stage);
                Ok(snapshot)
            }
            None => Ok(CheckpointSnapshot::new(run_id)),
        }
    }

    /// Run every stage not yet completed and return the result.
    ///
    /// With `fresh`, any stored checkpoint for the run is discarded first.
    pub async fn evaluate(&self, fresh: bool) -> PipelineResult<PipelineOutcome> {
        if fresh {
            self.store.clear(self.run_id())?;
        }

        let mut snapshot = self.load_snapshot()?;
        let plan = self.plan();

        if self.custom_queries.is_some() && snapshot.stage > Stage::NotStarted {
            tracing::warn!(
                "Ignoring custom queries: run {} already has {} queries in its checkpoint",
                self.run_id(),
                snapshot.queries.len()
            );
        }

        if snapshot.stage >= Stage::EvaluationComplete {
            snapshot.result = Some(reduce(&snapshot, &self.config));
        }

        while let Some(stage) = plan.next(snapshot.stage) {
            tracing::info!("Stage {}", stage);
            self.run_stage(stage, &mut snapshot).await?;
            snapshot.advance(stage);
            self.store.save(&snapshot)?;
        }

        let result = match &snapshot.result {
            Some(result) => result.clone(),
            None => reduce(&snapshot, &self.config),
        };

        if self.save_artifacts {
            let artifact = ResultsArtifact {
                result: result.clone(),
                config: ConfigSummary::from_config(&self.config),
                queries: snapshot.queries.clone(),
                rubrics: snapshot.rubrics.clone(),
            };
            if let Err(e) = self.artifacts.write_results(&artifact) {
                tracing::warn!("Failed to write evaluation results: {}", e);
            }
        }

        Ok(PipelineOutcome { result, snapshot })
    }

    async fn run_stage(&self, stage: Stage, snapshot: &mut CheckpointSnapshot) -> PipelineResult<()> {
        match stage {
            Stage::NotStarted => {}
            Stage::QueriesGenerated => self.generate_queries(snapshot).await,
            Stage::ResponsesCollected => self.collect_responses(snapshot).await,
            Stage::RubricsGenerated => self.generate_rubrics(snapshot).await,
            Stage::EvaluationComplete => self.compare(snapshot).await?,
            Stage::ReportGenerated => self.write_report(snapshot),
        }
        Ok(())
    }

    async fn generate_queries(&self, snapshot: &mut CheckpointSnapshot) {
        match &self.custom_queries {
            Some(queries) => {
                tracing::info!("Using {} custom queries", queries.len());
                snapshot.queries = queries.clone();
                snapshot.query_shortfall = None;
                snapshot.failed_generation_batches = 0;
            }
            None => {
                let generator = QueryGenerator::new(
                    self.endpoints.generator.clone(),
                    self.executor(),
                    self.retry.clone(),
                );
                let outcome = generator
                    .generate(&self.config.task, &self.config.query_generation)
                    .await;
                if outcome.queries.is_empty() {
                    tracing::warn!("Query generation produced no queries");
                }
                if outcome.failed_batches > 0 {
                    tracing::warn!(
                        "{} generation batches failed; kept {} of {} requested queries",
                        outcome.failed_batches,
                        outcome.queries.len(),
                        outcome.requested
                    );
                }
                snapshot.queries = outcome.queries;
                snapshot.query_shortfall = outcome.shortfall;
                snapshot.failed_generation_batches = outcome.failed_batches;
            }
        }

        if self.save_artifacts || self.config.output.save_queries {
            if let Err(e) = self.artifacts.write_queries(&snapshot.queries) {
                tracing::warn!("Failed to write queries: {}", e);
            }
        }
    }

    async fn collect_responses(&self, snapshot: &mut CheckpointSnapshot) {
        let collector = ResponseCollector::new(
            self.executor(),
            self.retry.clone(),
            self.config.evaluation.degraded_failure_rate,
        );
        let collection = collector.collect(&snapshot.queries, &self.endpoints.targets).await;

        if self.save_artifacts || self.config.output.save_responses {
            if let Err(e) = self.artifacts.write_responses(&snapshot.queries, &collection) {
                tracing::warn!("Failed to write responses: {}", e);
            }
        }
        snapshot.responses = Some(collection);
    }

    async fn generate_rubrics(&self, snapshot: &mut CheckpointSnapshot) {
        let configured = &self.config.evaluation.rubrics;
        snapshot.rubrics = if configured.is_empty() {
            let samples: Vec<String> = snapshot.queries.iter().map(|q| q.text.clone()).collect();
            RubricGenerator::new(
                self.endpoints.judge.clone(),
                self.retry.clone(),
                self.config.evaluation.judge_temperature,
            )
            .generate_or_default(&self.config.task, &samples)
            .await
        } else {
            tracing::info!("Using {} configured evaluation criteria", configured.len());
            configured.clone()
        };

        if self.save_artifacts || self.config.output.save_details {
            if let Err(e) = self.artifacts.write_rubrics(&snapshot.rubrics) {
                tracing::warn!("Failed to write rubrics: {}", e);
            }
        }
    }

    async fn compare(&self, snapshot: &mut CheckpointSnapshot) -> PipelineResult<()> {
        let responses = snapshot.responses.clone().unwrap_or_default();
        let (comparisons, items) = schedule(&snapshot.queries, &responses, self.config.evaluation.swap_order);
        tracing::info!("Judging {} comparisons", comparisons.len());

        let grader = LlmPairwiseGrader::new(
            self.endpoints.judge.clone(),
            self.retry.clone(),
            snapshot.rubrics.clone(),
            self.config.evaluation.judge_temperature,
        );
        // The grader times each attempt itself, after any rate-limit wait
        let engine = ComparisonEngine::new(
            vec![GraderConfig::new(Arc::new(grader), PAIRWISE_MAPPING)?],
            self.executor(),
        )?;
        let results = engine.run(&items).await?;

        let outcomes = results.get(LlmPairwiseGrader::NAME).cloned().unwrap_or_default();
        let verdicts: Vec<PairwiseVerdict> = comparisons
            .iter()
            .zip(outcomes.iter())
            .map(|(comparison, outcome)| PairwiseVerdict::from_outcome(comparison, outcome))
            .collect();

        let failed = verdicts.iter().filter(|v| v.is_error()).count();
        if failed > 0 {
            tracing::warn!("{}/{} judgements failed and are left undecided", failed, verdicts.len());
        }

        snapshot.comparisons = verdicts;
        snapshot.result = Some(reduce(snapshot, &self.config));

        if self.save_artifacts || self.config.output.save_details {
            if let Err(e) = self.artifacts.write_details(&snapshot.comparisons) {
                tracing::warn!("Failed to write comparison details: {}", e);
            }
        }
        Ok(())
    }

    fn write_report(&self, snapshot: &CheckpointSnapshot) {
        let result = match &snapshot.result {
            Some(result) => result.clone(),
            None => reduce(snapshot, &self.config),
        };
        let markdown = render_report(&ReportInput {
            task: &self.config.task,
            rubrics: &snapshot.rubrics,
            result: &result,
            queries: &snapshot.queries,
            responses: snapshot.responses.as_ref(),
            verdicts: &snapshot.comparisons,
            include_examples: self.config.report.include_examples,
        });
        if let Err(e) = self.artifacts.write_report(&markdown) {
            tracing::warn!("Failed to write report: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{PairOrder, VerdictOutcome};
    use crate::pipeline::checkpoint::InMemoryCheckpointStore;
    use crate::providers::{Endpoint, ScriptedProvider};
    use crate::queries::Provenance;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.output.output_dir = dir.to_string_lossy().to_string();
        config.output.save_queries = false;
        config.output.save_responses = false;
        config.output.save_details = false;
        config.evaluation.rubrics = vec!["Accuracy".to_string()];
        config.evaluation.retry_delay_ms = 1;
        config.evaluation.max_retry_delay_ms = 1;
        config
    }

    fn endpoints(judge_reply: &str) -> ResolvedEndpoints {
        let judge = Endpoint::new("judge", Arc::new(ScriptedProvider::fixed("judge", judge_reply)));
        ResolvedEndpoints {
            targets: vec![
                Endpoint::new("alpha", Arc::new(ScriptedProvider::echo("alpha"))),
                Endpoint::new("beta", Arc::new(ScriptedProvider::echo("beta"))),
            ],
            generator: judge.clone(),
            judge,
        }
    }

    fn custom_queries(n: usize) -> Vec<GeneratedQuery> {
        (0..n)
            .map(|i| GeneratedQuery::new(crate::queries::query_id(i), format!("question {}", i), Provenance::Custom))
            .collect()
    }

    #[test]
    fn test_build_rejects_single_target() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolved = endpoints("{}");
        resolved.targets.truncate(1);
        let err = Pipeline::builder(test_config(dir.path()))
            .endpoints(resolved)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Config(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_reduce_is_pure() {
        let config = Config::default();
        let mut snapshot = CheckpointSnapshot::new("default");
        snapshot.queries = custom_queries(1);
        snapshot.comparisons = vec![PairwiseVerdict {
            query_id: "q0001".to_string(),
            model_a: "model-a".to_string(),
            model_b: "model-b".to_string(),
            order: PairOrder::Original,
            outcome: VerdictOutcome::Winner {
                endpoint: "model-b".to_string(),
            },
            reason: String::new(),
        }];

        let first = reduce(&snapshot, &config);
        let second = reduce(&snapshot, &config);
        assert_eq!(first, second);
        assert_eq!(first.best_endpoint.as_deref(), Some("model-b"));
        assert_eq!(first.total_queries, 1);
    }

    #[tokio::test]
    async fn test_evaluate_with_custom_queries() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryCheckpointStore::new());
        let pipeline = Pipeline::builder(test_config(dir.path()))
            .endpoints(endpoints("{\"score\": 0.5, \"reason\": \"equal\"}"))
            .store(store.clone())
            .queries(custom_queries(2))
            .build()
            .unwrap();

        let outcome = pipeline.evaluate(false).await.unwrap();
        assert_eq!(outcome.snapshot.stage, Stage::EvaluationComplete);
        assert_eq!(outcome.result.total_queries, 2);
        assert_eq!(outcome.result.win_rates["alpha"], Some(0.5));
        assert_eq!(outcome.snapshot.rubrics, vec!["Accuracy"]);

        let stored = store.load("default").unwrap().unwrap();
        assert_eq!(stored.stage, Stage::EvaluationComplete);
    }

    #[tokio::test]
    async fn test_report_stage_writes_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.report.enabled = true;

        let pipeline = Pipeline::builder(config)
            .endpoints(endpoints("{\"score\": 1.0, \"reason\": \"A\"}"))
            .store(Arc::new(InMemoryCheckpointStore::new()))
            .queries(custom_queries(1))
            .save_artifacts(true)
            .build()
            .unwrap();

        let outcome = pipeline.evaluate(false).await.unwrap();
        assert_eq!(outcome.snapshot.stage, Stage::ReportGenerated);

        let run_dir = dir.path().join("default");
        assert!(run_dir.join(crate::reporting::REPORT_FILE).exists());
        assert!(run_dir.join(crate::reporting::RESULTS_FILE).exists());
        assert!(run_dir.join(crate::reporting::QUERIES_FILE).exists());
    }
}
