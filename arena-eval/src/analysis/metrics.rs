//! Reduction of pairwise verdicts into win rates and a ranking
//!
//! Everything here is a pure function of the verdict list, so a stored set of
//! verdicts always reproduces the same result.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use super::pairwise::{PairwiseVerdict, PositionBias, VerdictOutcome};

/// How ties enter the win-rate denominator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieHandling {
    /// Ties count half a win for each side
    #[default]
    Split,
    /// Ties are left out of the denominator
    Exclude,
}

/// Endpoint x opponent fraction of decided comparisons won; `None` when undefined
pub type WinMatrix = IndexMap<String, IndexMap<String, Option<f64>>>;

/// Per-endpoint standing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub endpoint: String,
    pub win_rate: Option<f64>,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    /// wins + losses + ties
    pub decided: u32,
    /// Comparisons lost to judge errors
    pub undecided: u32,
}

/// Outcome of the whole evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub rankings: Vec<RankingEntry>,
    pub win_rates: IndexMap<String, Option<f64>>,
    pub win_matrix: WinMatrix,
    pub best_endpoint: Option<String>,
    pub total_queries: usize,
    /// Decided comparisons after reconciliation
    pub total_comparisons: usize,
    pub undecided_comparisons: usize,
    #[serde(default)]
    pub degraded_endpoints: Vec<String>,
    #[serde(default)]
    pub query_shortfall: Option<usize>,
}

impl EvaluationResult {
    /// Attach run facts that do not come from the verdicts
    pub fn with_run_context(
        mut self,
        total_queries: usize,
        degraded_endpoints: Vec<String>,
        query_shortfall: Option<usize>,
    ) -> Self {
        self.total_queries = total_queries;
        self.degraded_endpoints = degraded_endpoints;
        self.query_shortfall = query_shortfall;
        self
    }

    pub fn entry(&self, endpoint: &str) -> Option<&RankingEntry> {
        self.rankings.iter().find(|e| e.endpoint == endpoint)
    }

    pub fn ranked_ids(&self) -> Vec<&str> {
        self.rankings.iter().map(|e| e.endpoint.as_str()).collect()
    }
}

/// A comparison after the two presentation orders were combined
#[derive(Debug, Clone, Copy, PartialEq)]
enum Decision {
    /// Index of the winning endpoint
    Win(usize),
    Tie,
    Undecided,
}

#[derive(Debug, Default, Clone, Copy)]
struct PairTally {
    wins: u32,
    ties: u32,
}

/// Reduces verdicts into an `EvaluationResult`
#[derive(Debug, Clone, Copy, Default)]
pub struct PairwiseAnalyzer {
    pub position_bias: PositionBias,
    pub tie_handling: TieHandling,
}

impl PairwiseAnalyzer {
    pub fn new(position_bias: PositionBias, tie_handling: TieHandling) -> Self {
        Self {
            position_bias,
            tie_handling,
        }
    }

    fn decide(verdict: &PairwiseVerdict, index: &HashMap<&str, usize>) -> Decision {
        match &verdict.outcome {
            VerdictOutcome::Winner { endpoint } => match index.get(endpoint.as_str()) {
                Some(&i) => Decision::Win(i),
                None => Decision::Undecided,
            },
            VerdictOutcome::Tie => Decision::Tie,
            VerdictOutcome::Error { .. } => Decision::Undecided,
        }
    }

    /// Combine verdicts into (endpoint_i, endpoint_j, decision) triples
    fn reconcile(
        &self,
        verdicts: &[PairwiseVerdict],
        index: &HashMap<&str, usize>,
    ) -> Vec<(usize, usize, Decision)> {
        let mut decisions = Vec::new();

        match self.position_bias {
            PositionBias::CountEach => {
                for verdict in verdicts {
                    if let (Some(&a), Some(&b)) = (
                        index.get(verdict.model_a.as_str()),
                        index.get(verdict.model_b.as_str()),
                    ) {
                        decisions.push((a.min(b), a.max(b), Self::decide(verdict, index)));
                    }
                }
            }
            PositionBias::RequireAgreement => {
                // Group both orders of the same (query, unordered pair)
                let mut groups: IndexMap<(&str, usize, usize), Vec<Decision>> = IndexMap::new();
                for verdict in verdicts {
                    if let (Some(&a), Some(&b)) = (
                        index.get(verdict.model_a.as_str()),
                        index.get(verdict.model_b.as_str()),
                    ) {
                        groups
                            .entry((verdict.query_id.as_str(), a.min(b), a.max(b)))
                            .or_default()
                            .push(Self::decide(verdict, index));
                    }
                }

                for ((_, a, b), group) in groups {
                    let decision = if group.contains(&Decision::Undecided) {
                        Decision::Undecided
                    } else {
                        match group.first() {
                            Some(&Decision::Win(w)) if group.iter().all(|d| *d == Decision::Win(w)) => {
                                Decision::Win(w)
                            }
                            _ => Decision::Tie,
                        }
                    };
                    decisions.push((a, b, decision));
                }
            }
        }

        decisions
    }

    /// Reduce verdicts over `endpoints` (in configuration order)
    pub fn analyze(&self, endpoints: &[String], verdicts: &[PairwiseVerdict]) -> EvaluationResult {
        let n = endpoints.len();
        let index: HashMap<&str, usize> = endpoints
            .iter()
            .enumerate()
            .map(|(i, e)| (e.as_str(), i))
            .collect();

        // tally[i][j]: wins of i over j and ties between them
        let mut tally = vec![vec![PairTally::default(); n]; n];
        let mut undecided = vec![0u32; n];
        let mut total_comparisons = 0;
        let mut undecided_comparisons = 0;

        for (a, b, decision) in self.reconcile(verdicts, &index) {
            match decision {
                Decision::Win(w) => {
                    let l = if w == a { b } else { a };
                    tally[w][l].wins += 1;
                    total_comparisons += 1;
                }
                Decision::Tie => {
                    tally[a][b].ties += 1;
                    tally[b][a].ties += 1;
                    total_comparisons += 1;
                }
                Decision::Undecided => {
                    undecided[a] += 1;
                    undecided[b] += 1;
                    undecided_comparisons += 1;
                }
            }
        }

        let mut win_matrix = WinMatrix::new();
        let mut win_rates = IndexMap::new();
        let mut entries = Vec::with_capacity(n);

        for (i, endpoint) in endpoints.iter().enumerate() {
            let mut row = IndexMap::new();
            let (mut wins, mut losses, mut ties) = (0u32, 0u32, 0u32);

            for (j, opponent) in endpoints.iter().enumerate() {
                if i == j {
                    continue;
                }
                let won = tally[i][j].wins;
                let lost = tally[j][i].wins;
                let tied = tally[i][j].ties;
                wins += won;
                losses += lost;
                ties += tied;

                let cell = match self.tie_handling {
                    TieHandling::Split => {
                        let total = won + lost + tied;
                        (total > 0).then(|| (won as f64 + 0.5 * tied as f64) / total as f64)
                    }
                    TieHandling::Exclude => {
                        let total = won + lost;
                        (total > 0).then(|| won as f64 / total as f64)
                    }
                };
                row.insert(opponent.clone(), cell);
            }

            let defined: Vec<f64> = row.values().flatten().copied().collect();
            let win_rate = if defined.is_empty() {
                None
            } else {
                Some(defined.iter().sum::<f64>() / defined.len() as f64)
            };

            win_matrix.insert(endpoint.clone(), row);
            win_rates.insert(endpoint.clone(), win_rate);
            entries.push(RankingEntry {
                endpoint: endpoint.clone(),
                win_rate,
                wins,
                losses,
                ties,
                decided: wins + losses + ties,
                undecided: undecided[i],
            });
        }

        entries.sort_by(compare_entries);

        let best_endpoint = entries
            .first()
            .filter(|e| e.win_rate.is_some())
            .map(|e| e.endpoint.clone());

        let total_queries = {
            let mut ids: Vec<&str> = verdicts.iter().map(|v| v.query_id.as_str()).collect();
            ids.sort_unstable();
            ids.dedup();
            ids.len()
        };

        EvaluationResult {
            rankings: entries,
            win_rates,
            win_matrix,
            best_endpoint,
            total_queries,
            total_comparisons,
            undecided_comparisons,
            degraded_endpoints: Vec::new(),
            query_shortfall: None,
        }
    }
}

/// Win rate descending (undefined last), then decided descending, then id
fn compare_entries(a: &RankingEntry, b: &RankingEntry) -> Ordering {
    let by_rate = match (a.win_rate, b.win_rate) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_rate
        .then_with(|| b.decided.cmp(&a.decided))
        .then_with(|| a.endpoint.cmp(&b.endpoint))
}
