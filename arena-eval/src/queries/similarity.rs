//! Near-duplicate detection for generated queries

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Pairwise text similarity in `[0, 1]`
pub trait SimilarityMetric: Send + Sync {
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Jaccard index over character trigrams of normalized text
#[derive(Debug, Clone, Copy, Default)]
pub struct TrigramJaccard;

fn whitespace() -> &'static Regex {
    static WS: OnceLock<Regex> = OnceLock::new();
    WS.get_or_init(|| Regex::new(r"\s+").expect("Invalid whitespace regex"))
}

/// Lowercase, trim and collapse runs of whitespace
pub fn normalize(text: &str) -> String {
    whitespace()
        .replace_all(text.trim(), " ")
        .to_lowercase()
}

fn trigrams(text: &str) -> HashSet<[char; 3]> {
    let chars: Vec<char> = text.chars().collect();
    chars.windows(3).map(|w| [w[0], w[1], w[2]]).collect()
}

impl SimilarityMetric for TrigramJaccard {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        let a = normalize(a);
        let b = normalize(b);
        if a == b {
            return 1.0;
        }

        let ta = trigrams(&a);
        let tb = trigrams(&b);
        // Texts shorter than three characters have no trigrams
        if ta.is_empty() || tb.is_empty() {
            return 0.0;
        }

        let intersection = ta.intersection(&tb).count();
        let union = ta.len() + tb.len() - intersection;
        intersection as f64 / union as f64
    }
}

/// Greedy dedup in input order.
///
/// A candidate is kept only if its similarity to every already kept item is
/// at most `threshold`. Returns the indices of the kept items.
pub fn deduplicate<S: AsRef<str>>(
    metric: &dyn SimilarityMetric,
    candidates: &[S],
    threshold: f64,
) -> Vec<usize> {
    let mut kept: Vec<usize> = Vec::new();

    for (index, candidate) in candidates.iter().enumerate() {
        let candidate = candidate.as_ref();
        if candidate.trim().is_empty() {
            continue;
        }
        let duplicate = kept
            .iter()
            .any(|&k| metric.similarity(candidates[k].as_ref(), candidate) > threshold);
        if !duplicate {
            kept.push(index);
        }
    }

    kept
}
