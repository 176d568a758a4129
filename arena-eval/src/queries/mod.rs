//! Evaluation query definitions, synthesis and loading

pub mod evolution;
pub mod generator;
pub mod loader;
pub mod similarity;

pub use evolution::{ComplexityOperator, QueryEvolver};
pub use generator::{GenerationOutcome, QueryGenerator};
pub use loader::{load_queries_from_file, load_queries_from_str, LoadError};
pub use similarity::{deduplicate, SimilarityMetric, TrigramJaccard};

use serde::{Deserialize, Serialize};

/// Difficulty hint attached to a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// Where a query came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Provenance {
    Generated { round: usize },
    Evolved { round: usize, operator: ComplexityOperator },
    Custom,
}

/// A prompt every target endpoint is asked to answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub id: String,
    #[serde(rename = "query")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    pub provenance: Provenance,
}

impl GeneratedQuery {
    pub fn new(id: impl Into<String>, text: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            category: None,
            difficulty: None,
            provenance,
        }
    }
}

/// Stable query id for a 0-based position
pub fn query_id(index: usize) -> String {
    format!("q{:04}", index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_ids_are_padded() {
        assert_eq!(query_id(0), "q0001");
        assert_eq!(query_id(41), "q0042");
    }

    #[test]
    fn test_query_serializes_text_as_query() {
        let query = GeneratedQuery::new("q0001", "What is Rust?", Provenance::Generated { round: 1 });
        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(value["query"], "What is Rust?");
        assert_eq!(value["provenance"]["source"], "generated");
        assert!(value.get("category").is_none());
    }
}
