//! Grading, pairwise judging and result reduction

pub mod comparator;
pub mod mapper;
pub mod metrics;
pub mod pairwise;
pub mod rubric;
pub mod scoring;

pub use comparator::{ComparisonEngine, GraderConfig, RunnerResults};
pub use mapper::{FieldMapper, FieldPath, MappingError};
pub use metrics::{EvaluationResult, PairwiseAnalyzer, RankingEntry, TieHandling, WinMatrix};
pub use pairwise::{
    enumerate_pairs, schedule, LlmPairwiseGrader, PairOrder, PairwiseVerdict, PositionBias,
    ScheduledComparison, VerdictOutcome, PAIRWISE_MAPPING,
};
pub use rubric::{default_rubrics, RubricGenerator};
pub use scoring::{
    Aggregator, Grader, GraderInput, GraderOutcome, GradingError, GradingErrorKind, WeightedSum,
};
