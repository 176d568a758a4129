//! Comparative evaluation of LLM endpoints
//!
//! This crate ranks two or more chat endpoints on a task by pairwise
//! judgement:
//!
//! - Generates a diverse query set from a task description (or loads one)
//! - Collects one response per (endpoint, query) under a concurrency bound
//! - Has a judge model compare every pair of responses, in both orders
//! - Reduces the verdicts into win rates, a win matrix and a ranking
//! - Checkpoints after every stage so an interrupted run resumes where it stopped
//!
//! # Example
//!
//! ```no_run
//! use arena_eval::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("arena.toml")?;
//!     let pipeline = Pipeline::builder(config).save_artifacts(true).build()?;
//!
//!     let outcome = pipeline.evaluate(false).await?;
//!     println!("Best endpoint: {:?}", outcome.result.best_endpoint);
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod providers;
pub mod queries;
pub mod reply;
pub mod reporting;
pub mod runner;

pub use config::Config;
pub use error::{PipelineError, PipelineResult};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::analysis::{
        ComparisonEngine, EvaluationResult, Grader, GraderConfig, GraderOutcome, PairwiseAnalyzer,
        PairwiseVerdict, PositionBias, RankingEntry, TieHandling,
    };
    pub use crate::config::{Config, ConfigError, EndpointConfig};
    pub use crate::error::{PipelineError, PipelineResult};
    pub use crate::pipeline::{
        CheckpointSnapshot, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore, Pipeline,
        PipelineOutcome, Stage,
    };
    pub use crate::providers::{
        create_endpoints, CompletionRequest, CompletionResponse, Endpoint, LLMProvider, Message,
        ProviderError, ProviderResult,
    };
    pub use crate::queries::{load_queries_from_file, GeneratedQuery, QueryGenerator};
    pub use crate::reporting::print_console_report;
    pub use crate::runner::{Executor, ResponseCollector, RetryPolicy};
}
