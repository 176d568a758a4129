//! Markdown evaluation report

use std::collections::HashMap;
use std::fmt::Write;

use super::{format_rate, win_rate_bar};
use crate::analysis::{EvaluationResult, PairOrder, PairwiseVerdict, VerdictOutcome};
use crate::config::TaskConfig;
use crate::queries::GeneratedQuery;
use crate::runner::CollectionResult;

const EXCERPT_CHARS: usize = 400;

/// Everything the report draws from
pub struct ReportInput<'a> {
    pub task: &'a TaskConfig,
    pub rubrics: &'a [String],
    pub result: &'a EvaluationResult,
    pub queries: &'a [GeneratedQuery],
    pub responses: Option<&'a CollectionResult>,
    pub verdicts: &'a [PairwiseVerdict],
    pub include_examples: usize,
}

fn excerpt(text: &str) -> String {
    let mut out: String = text.chars().take(EXCERPT_CHARS).collect();
    if text.chars().count() > EXCERPT_CHARS {
        out.push_str("...");
    }
    out.replace('\n', "\n> ")
}

/// Render the report as markdown
pub fn render_report(input: &ReportInput<'_>) -> String {
    let result = input.result;
    let mut md = String::new();

    // Writing into a String cannot fail
    let _ = writeln!(md, "# Evaluation Report\n");
    let _ = writeln!(md, "## Task\n");
    let _ = writeln!(md, "{}\n", input.task.description);
    if let Some(scenario) = &input.task.scenario {
        let _ = writeln!(md, "**Scenario:** {}\n", scenario);
    }

    let _ = writeln!(md, "## Summary\n");
    let _ = writeln!(md, "- Queries: {}", result.total_queries);
    if let Some(missing) = result.query_shortfall {
        let _ = writeln!(md, "- Query shortfall: {}", missing);
    }
    let _ = writeln!(md, "- Decided comparisons: {}", result.total_comparisons);
    let _ = writeln!(md, "- Undecided comparisons: {}", result.undecided_comparisons);
    if !result.degraded_endpoints.is_empty() {
        let _ = writeln!(md, "- Degraded endpoints: {}", result.degraded_endpoints.join(", "));
    }
    let _ = writeln!(
        md,
        "- Best endpoint: {}\n",
        result.best_endpoint.as_deref().unwrap_or("undetermined")
    );

    if !input.rubrics.is_empty() {
        let _ = writeln!(md, "## Evaluation Criteria\n");
        for (i, rubric) in input.rubrics.iter().enumerate() {
            let _ = writeln!(md, "{}. {}", i + 1, rubric);
        }
        md.push('\n');
    }

    let _ = writeln!(md, "## Rankings\n");
    let _ = writeln!(md, "| Rank | Endpoint | Win Rate | Wins | Losses | Ties | Undecided |");
    let _ = writeln!(md, "|------|----------|----------|------|--------|------|-----------|");
    for (i, entry) in result.rankings.iter().enumerate() {
        let _ = writeln!(
            md,
            "| {} | {} | {} | {} | {} | {} | {} |",
            i + 1,
            entry.endpoint,
            format_rate(entry.win_rate),
            entry.wins,
            entry.losses,
            entry.ties,
            entry.undecided
        );
    }
    md.push('\n');

    let _ = writeln!(md, "### Win Rate Chart\n");
    let _ = writeln!(md, "```");
    let width = result.rankings.iter().map(|e| e.endpoint.len()).max().unwrap_or(0);
    for entry in &result.rankings {
        let bar = entry
            .win_rate
            .map(win_rate_bar)
            .unwrap_or_else(|| " ".repeat(20));
        let _ = writeln!(
            md,
            "{:<width$} |{}| {}",
            entry.endpoint,
            bar,
            format_rate(entry.win_rate),
            width = width
        );
    }
    let _ = writeln!(md, "```\n");

    let endpoints: Vec<&String> = result.win_matrix.keys().collect();
    if endpoints.len() > 1 {
        let _ = writeln!(md, "## Win Matrix\n");
        let _ = writeln!(md, "Row endpoint's win rate against the column endpoint.\n");
        let header: Vec<&str> = endpoints.iter().map(|e| e.as_str()).collect();
        let _ = writeln!(md, "| | {} |", header.join(" | "));
        let _ = writeln!(md, "|---|{}", "---|".repeat(endpoints.len()));
        for row_id in &endpoints {
            let cells: Vec<String> = endpoints
                .iter()
                .map(|col_id| {
                    if row_id == col_id {
                        "--".to_string()
                    } else {
                        format_rate(
                            result
                                .win_matrix
                                .get(*row_id)
                                .and_then(|row| row.get(*col_id))
                                .copied()
                                .flatten(),
                        )
                    }
                })
                .collect();
            let _ = writeln!(md, "| **{}** | {} |", row_id, cells.join(" | "));
        }
        md.push('\n');
    }

    let examples: Vec<&PairwiseVerdict> = input
        .verdicts
        .iter()
        .filter(|v| v.order == PairOrder::Original && !v.is_error())
        .take(input.include_examples)
        .collect();

    if !examples.is_empty() {
        let query_index: HashMap<&str, (usize, &GeneratedQuery)> = input
            .queries
            .iter()
            .enumerate()
            .map(|(i, q)| (q.id.as_str(), (i, q)))
            .collect();

        let _ = writeln!(md, "## Example Comparisons\n");
        for (n, verdict) in examples.iter().enumerate() {
            let _ = writeln!(
                md,
                "### Example {}: {} vs {}\n",
                n + 1,
                verdict.model_a,
                verdict.model_b
            );
            let found = query_index.get(verdict.query_id.as_str());
            if let Some((_, query)) = found {
                let _ = writeln!(md, "**Query ({}):** {}\n", query.id, query.text);
            }
            if let (Some((index, _)), Some(responses)) = (found, input.responses) {
                for endpoint in [&verdict.model_a, &verdict.model_b] {
                    if let Some(text) = responses.text_at(endpoint, *index) {
                        let _ = writeln!(md, "**{}:**\n\n> {}\n", endpoint, excerpt(text));
                    }
                }
            }
            let outcome = match &verdict.outcome {
                VerdictOutcome::Winner { endpoint } => format!("{} preferred", endpoint),
                VerdictOutcome::Tie => "tie".to_string(),
                VerdictOutcome::Error { message } => format!("error: {}", message),
            };
            let _ = writeln!(md, "**Verdict:** {}", outcome);
            if !verdict.reason.is_empty() {
                let _ = writeln!(md, "\n**Reason:** {}", verdict.reason);
            }
            md.push('\n');
        }
    }

    md
}
