//! Recall scoring: replay an algorithm's relay selection against the
//! collected baselines.
//!
//! The headline number is event recall over testable-reliable authors.
//! Testable-partial authors are folded into a secondary number only:
//! their baselines are known-incomplete, so mixing them into the
//! headline would reward algorithms for gaps in the ground truth.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use relaymark_core::types::AlgorithmResult;
use relaymark_core::{Pubkey, RelayGraph, RelayUrl};

use crate::pool::QueryCache;
use crate::types::{AlgorithmVerification, BaselineClassification, PubkeyBaseline};

struct RecallTotals {
    found: usize,
    baseline: usize,
    authors_with_events: usize,
    per_author_rates: Vec<f64>,
}

/// Score one algorithm result against the baselines. Reads only the
/// query cache; no network.
pub fn verify_algorithm(
    result: &AlgorithmResult,
    graph: &RelayGraph,
    baselines: &BTreeMap<Pubkey, PubkeyBaseline>,
    cache: &QueryCache,
) -> AlgorithmVerification {
    let headline: Vec<&Pubkey> = baselines
        .values()
        .filter(|b| b.classification == BaselineClassification::TestableReliable)
        .map(|b| &b.pubkey)
        .collect();
    let secondary: Vec<&Pubkey> = baselines
        .values()
        .filter(|b| {
            matches!(
                b.classification,
                BaselineClassification::TestableReliable | BaselineClassification::TestablePartial
            )
        })
        .map(|b| &b.pubkey)
        .collect();

    // Relays the algorithm picked that baseline collection never
    // touched. Nothing is known about them, so they contribute no
    // events to recall.
    let out_of_baseline: BTreeSet<RelayUrl> = result
        .assignments
        .relay_to_writers()
        .keys()
        .filter(|relay| graph.writers_on(relay).is_none())
        .cloned()
        .collect();
    if !out_of_baseline.is_empty() {
        warn!(
            algorithm = %result.name,
            count = out_of_baseline.len(),
            "selection includes relays outside the baseline"
        );
    }

    let reliable = compute_recall(result, baselines, cache, &out_of_baseline, &headline);
    let incl_partial = compute_recall(result, baselines, cache, &out_of_baseline, &secondary);

    let mut per_author_rates = reliable.per_author_rates;
    per_author_rates.sort_by(f64::total_cmp);

    AlgorithmVerification {
        algorithm_name: result.name.clone(),
        event_recall_rate: ratio(reliable.found, reliable.baseline),
        author_recall_rate: ratio(reliable.authors_with_events, headline.len()),
        event_recall_inc_partial: ratio(incl_partial.found, incl_partial.baseline),
        author_recall_inc_partial: ratio(incl_partial.authors_with_events, secondary.len()),
        selected_relay_success_rate: selected_relay_success_rate(
            result,
            graph,
            baselines,
            &out_of_baseline,
        ),
        total_baseline_events_reliable: reliable.baseline,
        total_baseline_events_incl_partial: incl_partial.baseline,
        total_found_events_reliable: reliable.found,
        total_found_events_incl_partial: incl_partial.found,
        testable_reliable_authors: headline.len(),
        testable_partial_authors: secondary.len() - headline.len(),
        authors_with_events: reliable.authors_with_events,
        out_of_baseline_relays: out_of_baseline.into_iter().collect(),
        per_author_recall_rates: per_author_rates,
        latency: None,
    }
}

fn compute_recall(
    result: &AlgorithmResult,
    baselines: &BTreeMap<Pubkey, PubkeyBaseline>,
    cache: &QueryCache,
    out_of_baseline: &BTreeSet<RelayUrl>,
    authors: &[&Pubkey],
) -> RecallTotals {
    let mut totals = RecallTotals {
        found: 0,
        baseline: 0,
        authors_with_events: 0,
        per_author_rates: Vec::with_capacity(authors.len()),
    };

    for author in authors {
        let Some(baseline) = baselines.get(*author) else {
            continue;
        };
        totals.baseline += baseline.event_ids.len();

        let assigned = result
            .assignments
            .relays_for(author)
            .map(|relays| {
                relays
                    .iter()
                    .filter(|r| !out_of_baseline.contains(*r))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if assigned.is_empty() {
            // Orphaned by the algorithm: zero recall for this author.
            totals.per_author_rates.push(0.0);
            continue;
        }

        let found_ids = cache.union_across(author, assigned.into_iter());
        let found = found_ids.intersection(&baseline.event_ids).count();
        totals.found += found;
        if found > 0 {
            totals.authors_with_events += 1;
        }
        let rate = if baseline.event_ids.is_empty() {
            0.0
        } else {
            found as f64 / baseline.event_ids.len() as f64
        };
        totals.per_author_rates.push(rate);
    }
    totals
}

/// Of the selected relays that some assigned writer actually declared,
/// what fraction answered during baseline collection.
fn selected_relay_success_rate(
    result: &AlgorithmResult,
    graph: &RelayGraph,
    baselines: &BTreeMap<Pubkey, PubkeyBaseline>,
    out_of_baseline: &BTreeSet<RelayUrl>,
) -> Option<f64> {
    let mut queried = 0usize;
    let mut succeeded = 0usize;
    for (relay, writers) in result.assignments.relay_to_writers() {
        if out_of_baseline.contains(relay) {
            continue;
        }
        let declared_by_assigned = writers.iter().any(|w| {
            graph
                .relays_of(w)
                .is_some_and(|declared| declared.contains(relay))
        });
        if !declared_by_assigned {
            continue;
        }
        queried += 1;
        let answered = writers.iter().any(|w| {
            baselines
                .get(w)
                .is_some_and(|b| b.relays_succeeded.contains(relay))
        });
        if answered {
            succeeded += 1;
        }
    }
    (queried > 0).then(|| succeeded as f64 / queried as f64)
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use relaymark_core::types::{AlgorithmParams, AssignmentSet};

    use super::*;

    fn ids(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn baseline(
        pubkey: &str,
        event_ids: &[&str],
        succeeded: &[&str],
        classification: BaselineClassification,
    ) -> PubkeyBaseline {
        PubkeyBaseline {
            pubkey: pubkey.to_string(),
            event_ids: ids(event_ids),
            relays_queried: succeeded.len(),
            relays_succeeded: succeeded.iter().map(|s| s.to_string()).collect(),
            relays_failed: Default::default(),
            relays_with_events: Default::default(),
            reliable: classification == BaselineClassification::TestableReliable,
            classification,
        }
    }

    fn result_with(assignments: AssignmentSet) -> AlgorithmResult {
        AlgorithmResult {
            name: "Test Selection".to_string(),
            assignments,
            orphaned: Default::default(),
            params: AlgorithmParams::default(),
            execution_time_ms: 0.0,
            notes: Vec::new(),
        }
    }

    fn graph() -> RelayGraph {
        let mut graph = RelayGraph::new();
        graph.add_edge("pk1", "wss://a.example/");
        graph.add_edge("pk1", "wss://b.example/");
        graph.add_edge("pk2", "wss://b.example/");
        graph
    }

    #[test]
    fn recall_counts_only_baseline_events() {
        let graph = graph();
        let mut baselines = BTreeMap::new();
        baselines.insert(
            "pk1".to_string(),
            baseline(
                "pk1",
                &["e1", "e2", "e3", "e4"],
                &["wss://a.example/", "wss://b.example/"],
                BaselineClassification::TestableReliable,
            ),
        );

        let cache = QueryCache::new();
        // "extra" is outside the baseline union and must not inflate
        // the found count.
        cache.set("wss://a.example/", "pk1", ids(&["e1", "e2", "extra"]));

        let mut assignments = AssignmentSet::new();
        assignments.assign("wss://a.example/", "pk1");
        let verification = verify_algorithm(&result_with(assignments), &graph, &baselines, &cache);

        assert_eq!(verification.total_found_events_reliable, 2);
        assert_eq!(verification.total_baseline_events_reliable, 4);
        assert!((verification.event_recall_rate - 0.5).abs() < 1e-12);
        assert_eq!(verification.per_author_recall_rates, vec![0.5]);
        assert_eq!(verification.selected_relay_success_rate, Some(1.0));
    }

    #[test]
    fn unassigned_author_scores_zero() {
        let graph = graph();
        let mut baselines = BTreeMap::new();
        baselines.insert(
            "pk1".to_string(),
            baseline(
                "pk1",
                &["e1"],
                &["wss://a.example/"],
                BaselineClassification::TestableReliable,
            ),
        );
        baselines.insert(
            "pk2".to_string(),
            baseline(
                "pk2",
                &["e9"],
                &["wss://b.example/"],
                BaselineClassification::TestableReliable,
            ),
        );

        let cache = QueryCache::new();
        cache.set("wss://a.example/", "pk1", ids(&["e1"]));

        let mut assignments = AssignmentSet::new();
        assignments.assign("wss://a.example/", "pk1");
        let verification = verify_algorithm(&result_with(assignments), &graph, &baselines, &cache);

        // pk2's baseline still counts against the denominator.
        assert_eq!(verification.total_baseline_events_reliable, 2);
        assert_eq!(verification.total_found_events_reliable, 1);
        assert_eq!(verification.per_author_recall_rates, vec![0.0, 1.0]);
        assert!((verification.author_recall_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn out_of_baseline_relays_are_excluded() {
        let graph = graph();
        let mut baselines = BTreeMap::new();
        baselines.insert(
            "pk1".to_string(),
            baseline(
                "pk1",
                &["e1"],
                &["wss://a.example/"],
                BaselineClassification::TestableReliable,
            ),
        );

        let cache = QueryCache::new();
        cache.set("wss://unknown.example/", "pk1", ids(&["e1"]));

        let mut assignments = AssignmentSet::new();
        assignments.assign("wss://unknown.example/", "pk1");
        let verification = verify_algorithm(&result_with(assignments), &graph, &baselines, &cache);

        assert_eq!(
            verification.out_of_baseline_relays,
            vec!["wss://unknown.example/".to_string()]
        );
        // The only assigned relay was excluded, so the author counts as
        // unassigned.
        assert_eq!(verification.total_found_events_reliable, 0);
        assert_eq!(verification.per_author_recall_rates, vec![0.0]);
        assert_eq!(verification.selected_relay_success_rate, None);
    }

    #[test]
    fn partial_authors_only_affect_secondary_numbers() {
        let graph = graph();
        let mut baselines = BTreeMap::new();
        baselines.insert(
            "pk1".to_string(),
            baseline(
                "pk1",
                &["e1"],
                &["wss://a.example/"],
                BaselineClassification::TestableReliable,
            ),
        );
        baselines.insert(
            "pk2".to_string(),
            baseline(
                "pk2",
                &["e2"],
                &["wss://b.example/"],
                BaselineClassification::TestablePartial,
            ),
        );

        let cache = QueryCache::new();
        cache.set("wss://a.example/", "pk1", ids(&["e1"]));
        cache.set("wss://b.example/", "pk2", ids(&["e2"]));

        let mut assignments = AssignmentSet::new();
        assignments.assign("wss://a.example/", "pk1");
        assignments.assign("wss://b.example/", "pk2");
        let verification = verify_algorithm(&result_with(assignments), &graph, &baselines, &cache);

        assert_eq!(verification.testable_reliable_authors, 1);
        assert_eq!(verification.testable_partial_authors, 1);
        assert!((verification.event_recall_rate - 1.0).abs() < 1e-12);
        assert_eq!(verification.total_baseline_events_incl_partial, 2);
        assert_eq!(verification.total_found_events_incl_partial, 2);
        // Headline per-author rates cover the reliable set only.
        assert_eq!(verification.per_author_recall_rates.len(), 1);
    }
}
