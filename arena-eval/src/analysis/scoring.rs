//! Grading capability: the grader trait, its outcomes and aggregators

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named fields handed to a grader after field mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraderInput(pub BTreeMap<String, serde_json::Value>);

impl GraderInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Field as text; non-string values are rendered as JSON
    pub fn text(&self, key: &str) -> Result<String, GradingError> {
        match self.0.get(key) {
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(GradingError::new(
                GradingErrorKind::InvalidInput,
                format!("missing field '{}'", key),
            )),
        }
    }
}

/// Result of one grading call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraderOutcome {
    /// Pointwise or pairwise score
    Score { score: f64, reason: String },
    /// Ranking of the presented candidates, 1 = best
    Rank { rank: Vec<u32>, reason: String },
    Error { kind: GradingErrorKind, message: String },
}

impl GraderOutcome {
    pub fn error(kind: GradingErrorKind, message: impl Into<String>) -> Self {
        GraderOutcome::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, GraderOutcome::Error { .. })
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            GraderOutcome::Score { score, .. } => Some(*score),
            _ => None,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            GraderOutcome::Score { reason, .. } | GraderOutcome::Rank { reason, .. } => reason,
            GraderOutcome::Error { message, .. } => message,
        }
    }
}

impl From<GradingError> for GraderOutcome {
    fn from(error: GradingError) -> Self {
        GraderOutcome::Error {
            kind: error.kind,
            message: error.message,
        }
    }
}

/// Failure category of a grading call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingErrorKind {
    Timeout,
    Provider,
    Parse,
    InvalidInput,
    Panicked,
    Aggregation,
}

/// Error raised by a grader for a single item
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct GradingError {
    pub kind: GradingErrorKind,
    pub message: String,
}

impl GradingError {
    pub fn new(kind: GradingErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A black-box scoring capability
#[async_trait]
pub trait Grader: Send + Sync {
    /// Name used as the result column
    fn name(&self) -> &str;

    /// Fields the mapped input must provide
    fn required_fields(&self) -> Vec<String>;

    async fn grade(&self, input: &GraderInput) -> Result<GraderOutcome, GradingError>;
}

/// Combines same-index outcomes of several graders into one
pub trait Aggregator: Send + Sync {
    fn name(&self) -> &str;

    fn aggregate(&self, outcomes: &IndexMap<String, &GraderOutcome>) -> GraderOutcome;
}

/// Weighted sum of the named graders' scores
pub struct WeightedSum {
    name: String,
    weights: IndexMap<String, f64>,
}

impl WeightedSum {
    pub fn new<I, K>(name: impl Into<String>, weights: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self {
            name: name.into(),
            weights: weights.into_iter().map(|(k, w)| (k.into(), w)).collect(),
        }
    }
}

impl Aggregator for WeightedSum {
    fn name(&self) -> &str {
        &self.name
    }

    fn aggregate(&self, outcomes: &IndexMap<String, &GraderOutcome>) -> GraderOutcome {
        let mut total = 0.0;
        for (grader, weight) in &self.weights {
            match outcomes.get(grader).and_then(|o| o.score()) {
                Some(score) => total += weight * score,
                None => {
                    return GraderOutcome::error(
                        GradingErrorKind::Aggregation,
                        format!("grader '{}' produced no score", grader),
                    )
                }
            }
        }

        GraderOutcome::Score {
            score: total,
            reason: format!("weighted sum of {} graders", self.weights.len()),
        }
    }
}
