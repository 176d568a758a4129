//! Results reporting: JSON artifacts, console summary and markdown report

pub mod markdown;

pub use markdown::{render_report, ReportInput};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::analysis::{EvaluationResult, PairwiseVerdict};
use crate::config::{Config, TaskConfig};
use crate::queries::GeneratedQuery;
use crate::runner::{CollectionError, CollectionResult, ResponseOutcome};

pub const QUERIES_FILE: &str = "queries.json";
pub const RESPONSES_FILE: &str = "responses.json";
pub const RUBRICS_FILE: &str = "rubrics.json";
pub const DETAILS_FILE: &str = "comparison_details.json";
pub const RESULTS_FILE: &str = "evaluation_results.json";
pub const REPORT_FILE: &str = "evaluation_report.md";

const BAR_WIDTH: usize = 20;

/// One query with every endpoint's answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponses {
    pub query_id: String,
    pub query: String,
    /// Endpoint id to response text; `None` when the call failed
    pub responses: IndexMap<String, Option<String>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub errors: IndexMap<String, CollectionError>,
}

/// Flatten a collection into per-query records
pub fn responses_by_query(queries: &[GeneratedQuery], collection: &CollectionResult) -> Vec<QueryResponses> {
    queries
        .iter()
        .enumerate()
        .map(|(index, query)| {
            let mut responses = IndexMap::new();
            let mut errors = IndexMap::new();
            for (endpoint, list) in &collection.responses {
                match list.get(index).map(|r| &r.outcome) {
                    Some(ResponseOutcome::Success { text, .. }) => {
                        responses.insert(endpoint.clone(), Some(text.clone()));
                    }
                    Some(ResponseOutcome::Failed { error }) => {
                        responses.insert(endpoint.clone(), None);
                        errors.insert(endpoint.clone(), error.clone());
                    }
                    None => {
                        responses.insert(endpoint.clone(), None);
                    }
                }
            }
            QueryResponses {
                query_id: query.id.clone(),
                query: query.text.clone(),
                responses,
                errors,
            }
        })
        .collect()
}

/// Configuration facts stored next to the result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub task: TaskConfig,
    pub target_endpoints: Vec<String>,
    pub num_queries: usize,
}

impl ConfigSummary {
    pub fn from_config(config: &Config) -> Self {
        Self {
            task: config.task.clone(),
            target_endpoints: config.endpoint_ids(),
            num_queries: config.query_generation.num_queries,
        }
    }
}

/// Contents of `evaluation_results.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsArtifact {
    pub result: EvaluationResult,
    pub config: ConfigSummary,
    pub queries: Vec<GeneratedQuery>,
    pub rubrics: Vec<String>,
}

/// Writes run artifacts into one directory
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, json)?;
        tracing::info!("Saved {}", path.display());
        Ok(path)
    }

    pub fn write_queries(&self, queries: &[GeneratedQuery]) -> std::io::Result<PathBuf> {
        self.write_json(QUERIES_FILE, queries)
    }

    pub fn write_responses(
        &self,
        queries: &[GeneratedQuery],
        collection: &CollectionResult,
    ) -> std::io::Result<PathBuf> {
        self.write_json(RESPONSES_FILE, &responses_by_query(queries, collection))
    }

    pub fn write_rubrics(&self, rubrics: &[String]) -> std::io::Result<PathBuf> {
        self.write_json(RUBRICS_FILE, rubrics)
    }

    pub fn write_details(&self, verdicts: &[PairwiseVerdict]) -> std::io::Result<PathBuf> {
        self.write_json(DETAILS_FILE, verdicts)
    }

    pub fn write_results(&self, artifact: &ResultsArtifact) -> std::io::Result<PathBuf> {
        self.write_json(RESULTS_FILE, artifact)
    }

    pub fn write_report(&self, markdown: &str) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(REPORT_FILE);
        std::fs::write(&path, markdown)?;
        tracing::info!("Saved {}", path.display());
        Ok(path)
    }
}

/// Text bar for a win rate, e.g. `##########----------`
pub fn win_rate_bar(rate: f64) -> String {
    let filled = ((rate.clamp(0.0, 1.0) * BAR_WIDTH as f64) as usize).min(BAR_WIDTH);
    format!("{}{}", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}

pub fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{:.1}%", r * 100.0),
        None => "n/a".to_string(),
    }
}

/// Print the ranking and win matrix
pub fn print_console_report(task: &str, result: &EvaluationResult) {
    println!("\n{:=<60}", "");
    println!("ARENA EVALUATION RESULTS");
    println!("{:=<60}", "");

    let task: String = task.chars().take(60).collect();
    println!("Task: {}", task);
    println!("Queries: {}", result.total_queries);
    if let Some(missing) = result.query_shortfall {
        println!("  ({} fewer than requested)", missing);
    }
    println!(
        "Comparisons: {} decided, {} undecided",
        result.total_comparisons, result.undecided_comparisons
    );

    println!("\nRankings:");
    println!("{:-<60}", "");
    for (i, entry) in result.rankings.iter().enumerate() {
        let bar = entry
            .win_rate
            .map(win_rate_bar)
            .unwrap_or_else(|| " ".repeat(BAR_WIDTH));
        println!(
            "  {}. {:<20} [{}] {:>6}  (W {} / L {} / T {})",
            i + 1,
            entry.endpoint,
            bar,
            format_rate(entry.win_rate),
            entry.wins,
            entry.losses,
            entry.ties
        );
    }

    let endpoints: Vec<&String> = result.win_matrix.keys().collect();
    if endpoints.len() > 1 {
        println!("\nWin Matrix (row vs column):");
        println!("{:-<60}", "");
        let width = endpoints.iter().map(|e| e.len()).max().unwrap_or(0);
        let header: String = endpoints
            .iter()
            .map(|e| format!("{:<10}", e.chars().take(8).collect::<String>()))
            .collect();
        println!("  {:width$}   {}", "", header, width = width);

        for row_id in &endpoints {
            let mut line = format!("  {:<width$} | ", row_id, width = width);
            for col_id in &endpoints {
                if row_id == col_id {
                    line.push_str(&format!("{:<10}", "--"));
                } else {
                    let cell = result
                        .win_matrix
                        .get(*row_id)
                        .and_then(|row| row.get(*col_id))
                        .copied()
                        .flatten();
                    line.push_str(&format!("{:<10}", format_rate(cell)));
                }
            }
            println!("{}", line);
        }
    }

    if !result.degraded_endpoints.is_empty() {
        println!("\nDegraded endpoints: {}", result.degraded_endpoints.join(", "));
    }

    match &result.best_endpoint {
        Some(best) => println!("\nBest endpoint: {}", best),
        None => println!("\nBest endpoint: undetermined"),
    }
    println!("{:=<60}", "");
}
