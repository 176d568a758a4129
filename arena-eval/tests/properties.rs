//! Property tests for dedup, pair scheduling and verdict reduction

use std::collections::HashSet;

use proptest::prelude::*;

use arena_eval::analysis::{
    enumerate_pairs, schedule, PairOrder, PairwiseAnalyzer, PairwiseVerdict, PositionBias, TieHandling,
    VerdictOutcome,
};
use arena_eval::queries::{deduplicate, query_id, GeneratedQuery, Provenance, SimilarityMetric, TrigramJaccard};
use arena_eval::runner::{CollectedResponse, CollectionResult, ResponseOutcome};

fn collection(endpoints: usize, queries: usize) -> CollectionResult {
    let mut result = CollectionResult::default();
    for e in 0..endpoints {
        let list = (0..queries)
            .map(|q| CollectedResponse {
                query_id: query_id(q),
                outcome: ResponseOutcome::Success {
                    text: format!("answer {} from e{}", q, e),
                    latency_ms: 1,
                },
            })
            .collect();
        result.responses.insert(format!("e{}", e), list);
    }
    result
}

proptest! {
    #[test]
    fn prop_dedup_leaves_no_similar_pair(
        texts in prop::collection::vec("[a-d ]{0,12}", 0..25),
        threshold in 0.3f64..1.0,
    ) {
        let metric = TrigramJaccard;
        let kept = deduplicate(&metric, &texts, threshold);

        for (n, &i) in kept.iter().enumerate() {
            for &j in &kept[n + 1..] {
                prop_assert!(i < j);
                prop_assert!(metric.similarity(&texts[i], &texts[j]) <= threshold);
            }
        }
    }

    #[test]
    fn prop_pairs_cover_each_unordered_pair_once(m in 0usize..12) {
        let pairs = enumerate_pairs(m);
        prop_assert_eq!(pairs.len(), m * m.saturating_sub(1) / 2);

        let unique: HashSet<_> = pairs.iter().copied().collect();
        prop_assert_eq!(unique.len(), pairs.len());
        prop_assert!(pairs.iter().all(|&(i, j)| i < j && j < m));
    }

    #[test]
    fn prop_swap_schedules_both_orders(endpoints in 2usize..6, queries in 1usize..5) {
        let query_list: Vec<GeneratedQuery> = (0..queries)
            .map(|i| GeneratedQuery::new(query_id(i), format!("q{}", i), Provenance::Custom))
            .collect();
        let responses = collection(endpoints, queries);

        let (comparisons, items) = schedule(&query_list, &responses, true);
        let pairs = endpoints * (endpoints - 1) / 2;
        prop_assert_eq!(comparisons.len(), 2 * pairs * queries);
        prop_assert_eq!(items.len(), comparisons.len());

        let swapped = comparisons.iter().filter(|c| c.order == PairOrder::Swapped).count();
        prop_assert_eq!(swapped, pairs * queries);
    }

    #[test]
    fn prop_reduction_is_bounded_and_consistent(
        outcomes in prop::collection::vec(0u8..4, 1..40),
        count_each in any::<bool>(),
        exclude_ties in any::<bool>(),
    ) {
        let endpoints: Vec<String> = (0..3).map(|e| format!("e{}", e)).collect();
        let pairs = enumerate_pairs(endpoints.len());

        let verdicts: Vec<PairwiseVerdict> = outcomes
            .iter()
            .enumerate()
            .map(|(n, &kind)| {
                let (a, b) = pairs[n % pairs.len()];
                let outcome = match kind {
                    0 => VerdictOutcome::Winner { endpoint: endpoints[a].clone() },
                    1 => VerdictOutcome::Winner { endpoint: endpoints[b].clone() },
                    2 => VerdictOutcome::Tie,
                    _ => VerdictOutcome::Error { message: "judge failed".to_string() },
                };
                PairwiseVerdict {
                    query_id: query_id(n),
                    model_a: endpoints[a].clone(),
                    model_b: endpoints[b].clone(),
                    order: PairOrder::Original,
                    outcome,
                    reason: String::new(),
                }
            })
            .collect();

        let analyzer = PairwiseAnalyzer::new(
            if count_each { PositionBias::CountEach } else { PositionBias::RequireAgreement },
            if exclude_ties { TieHandling::Exclude } else { TieHandling::Split },
        );
        let result = analyzer.analyze(&endpoints, &verdicts);

        for entry in &result.rankings {
            prop_assert_eq!(entry.wins + entry.losses + entry.ties, entry.decided);
            if let Some(rate) = entry.win_rate {
                prop_assert!((0.0..=1.0).contains(&rate));
            }
        }
        for row in result.win_matrix.values() {
            for rate in row.values().flatten() {
                prop_assert!((0.0..=1.0).contains(rate));
            }
        }

        let again = analyzer.analyze(&endpoints, &verdicts);
        prop_assert_eq!(again.ranked_ids(), result.ranked_ids());
        prop_assert_eq!(result.rankings.len(), endpoints.len());
    }
}
