//! Latency replay: what a client opening an algorithm's relay set in
//! parallel would have experienced, reconstructed from the recorded
//! per-relay outcomes. No extra network traffic.

use std::collections::BTreeMap;

use relaymark_core::stats::{mean, median_sorted, percentile_sorted, to_sorted};
use relaymark_core::types::AlgorithmResult;
use relaymark_core::{Pubkey, RelayGraph, RelayUrl};

use crate::pool::QueryCache;
use crate::types::{
    AlgorithmLatencyStats, EoseRacePoint, Phase2Options, ProfileViewLatencyStats, RelayOutcome,
};

/// Cutoffs for the progressive-completeness curve, in seconds.
const PROGRESSIVE_CUTOFFS_SECS: [u64; 5] = [1, 2, 5, 10, 15];

/// Grace periods after the first EOSE for the race simulation, in ms.
const EOSE_GRACE_MS: [u64; 4] = [0, 500, 1000, 2000];

/// Replay one algorithm's selection against the recorded outcomes.
pub fn compute_algorithm_latency(
    result: &AlgorithmResult,
    outcomes: &BTreeMap<RelayUrl, RelayOutcome>,
    cache: &QueryCache,
    options: &Phase2Options,
) -> AlgorithmLatencyStats {
    let mut stats = AlgorithmLatencyStats::default();
    let mut connected_query_ms = Vec::new();
    let mut all_query_ms = Vec::new();
    // (completion time, events delivered, reached eose) per relay.
    let mut relay_timeline = Vec::new();

    for (relay, writers) in result.assignments.relay_to_writers() {
        let Some(outcome) = outcomes.get(relay) else {
            continue;
        };
        stats.relays_with_outcomes += 1;
        all_query_ms.push(outcome.query_ms);
        if outcome.timed_out {
            stats.timeout_count += 1;
        }
        if !outcome.connected {
            continue;
        }
        stats.relays_connected += 1;
        connected_query_ms.push(outcome.query_ms);

        let events_here: usize = writers
            .iter()
            .filter_map(|w| cache.get(relay, w))
            .map(|ids| ids.len())
            .sum();
        stats.total_events += events_here;

        if events_here > 0 {
            stats.relays_with_events += 1;
            let connect_only = outcome.connect_ms;
            stats.ttfe_connect_only_ms = min_opt(stats.ttfe_connect_only_ms, connect_only);
            if let Some(first_event_ms) = outcome.first_event_ms {
                stats.ttfe_ms = min_opt(stats.ttfe_ms, outcome.connect_ms + first_event_ms);
            }
        }
        relay_timeline.push((
            outcome.connect_ms + outcome.query_ms,
            events_here,
            outcome.reached_eose,
        ));
    }

    stats.relays_connected_no_events = stats.relays_connected - stats.relays_with_events;

    let sorted = to_sorted(&connected_query_ms);
    if !sorted.is_empty() {
        stats.query_p50_ms = Some(median_sorted(&sorted));
        stats.query_p80_ms = Some(percentile_sorted(&sorted, 0.80));
    }
    stats.query_max_ms = all_query_ms.iter().copied().reduce(f64::max);

    // Timeouts occupy concurrency slots for the full EOSE timeout; the
    // tax is how much wall clock that adds to the whole collection.
    let concurrency = options.max_concurrent_conns.max(1);
    stats.timeout_tax_ms =
        (stats.timeout_count as u64).div_ceil(concurrency as u64) * options.eose_timeout_ms;

    let eventual: usize = relay_timeline.iter().map(|(_, events, _)| events).sum();
    if eventual > 0 {
        for cutoff_secs in PROGRESSIVE_CUTOFFS_SECS {
            let cutoff_ms = (cutoff_secs * 1000) as f64;
            let reached: usize = relay_timeline
                .iter()
                .filter(|(done_ms, _, _)| *done_ms <= cutoff_ms)
                .map(|(_, events, _)| events)
                .sum();
            stats
                .progressive_completeness
                .insert(cutoff_secs, reached as f64 / eventual as f64);
        }

        let first_eose = relay_timeline
            .iter()
            .filter(|(_, _, eose)| *eose)
            .map(|(done_ms, _, _)| *done_ms)
            .reduce(f64::min);
        if let Some(first_eose) = first_eose {
            for grace_ms in EOSE_GRACE_MS {
                let cutoff_ms = first_eose + grace_ms as f64;
                let reached: usize = relay_timeline
                    .iter()
                    .filter(|(done_ms, _, _)| *done_ms <= cutoff_ms)
                    .map(|(_, events, _)| events)
                    .sum();
                stats.eose_race.insert(
                    grace_ms,
                    EoseRacePoint {
                        cutoff_ms,
                        completeness: reached as f64 / eventual as f64,
                    },
                );
            }
        }
    }

    stats
}

/// Simulate per-author profile views: the client queries the author's
/// declared write relays directly, ignoring any selection. `None` when
/// no author has declared relays with outcomes.
pub fn compute_profile_view_latency(
    graph: &RelayGraph,
    authors: &[Pubkey],
    outcomes: &BTreeMap<RelayUrl, RelayOutcome>,
    cache: &QueryCache,
) -> Option<ProfileViewLatencyStats> {
    let mut ttfes = Vec::new();
    let mut relays_queried = Vec::new();
    let mut relays_with_events = Vec::new();
    let mut timeouts = Vec::new();
    let mut hits = 0usize;
    let mut author_count = 0usize;

    for author in authors {
        let Some(declared) = graph.relays_of(author) else {
            continue;
        };
        if declared.is_empty() {
            continue;
        }
        author_count += 1;
        relays_queried.push(declared.len() as f64);

        let mut best_ttfe: Option<f64> = None;
        let mut with_events = 0usize;
        let mut timed_out = 0usize;
        for relay in declared {
            let Some(outcome) = outcomes.get(relay) else {
                continue;
            };
            if outcome.timed_out {
                timed_out += 1;
            }
            let has_events = cache.get(relay, author).is_some_and(|ids| !ids.is_empty());
            if !has_events {
                continue;
            }
            with_events += 1;
            if let Some(first_event_ms) = outcome.first_event_ms {
                best_ttfe = min_opt(best_ttfe, outcome.connect_ms + first_event_ms);
            }
        }

        relays_with_events.push(with_events as f64);
        timeouts.push(timed_out as f64);
        if with_events > 0 {
            hits += 1;
        }
        if let Some(ttfe) = best_ttfe {
            ttfes.push(ttfe);
        }
    }

    if author_count == 0 {
        return None;
    }

    let sorted_ttfes = to_sorted(&ttfes);
    Some(ProfileViewLatencyStats {
        author_count,
        mean_ttfe_ms: (!ttfes.is_empty()).then(|| mean(&ttfes)),
        median_ttfe_ms: (!sorted_ttfes.is_empty()).then(|| median_sorted(&sorted_ttfes)),
        p95_ttfe_ms: (!sorted_ttfes.is_empty()).then(|| percentile_sorted(&sorted_ttfes, 0.95)),
        mean_relays_queried: mean(&relays_queried),
        mean_relays_with_events: mean(&relays_with_events),
        hit_rate: hits as f64 / author_count as f64,
        mean_timeouts: mean(&timeouts),
    })
}

fn min_opt(current: Option<f64>, candidate: f64) -> Option<f64> {
    Some(match current {
        Some(v) => v.min(candidate),
        None => candidate,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use relaymark_core::types::{AlgorithmParams, AssignmentSet};

    use super::*;

    fn outcome(connect_ms: f64, query_ms: f64, first_event_ms: Option<f64>) -> RelayOutcome {
        RelayOutcome {
            connected: true,
            reached_eose: true,
            timed_out: false,
            connect_ms,
            query_ms,
            first_event_ms,
            error: None,
        }
    }

    fn ids(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
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

    #[test]
    fn ttfe_is_the_fastest_relay_with_events() {
        let mut assignments = AssignmentSet::new();
        assignments.assign("wss://fast.example/", "pk1");
        assignments.assign("wss://slow.example/", "pk1");
        assignments.assign("wss://empty.example/", "pk1");

        let mut outcomes = BTreeMap::new();
        outcomes.insert("wss://fast.example/".to_string(), outcome(100.0, 400.0, Some(50.0)));
        outcomes.insert("wss://slow.example/".to_string(), outcome(300.0, 900.0, Some(20.0)));
        outcomes.insert("wss://empty.example/".to_string(), outcome(10.0, 100.0, None));

        let cache = QueryCache::new();
        cache.set("wss://fast.example/", "pk1", ids(&["e1"]));
        cache.set("wss://slow.example/", "pk1", ids(&["e2", "e3"]));

        let stats = compute_algorithm_latency(
            &result_with(assignments),
            &outcomes,
            &cache,
            &Phase2Options::default(),
        );

        // fast: 100+50=150, slow: 300+20=320. The empty relay connected
        // fastest but holds nothing.
        assert_eq!(stats.ttfe_ms, Some(150.0));
        assert_eq!(stats.ttfe_connect_only_ms, Some(100.0));
        assert_eq!(stats.relays_connected, 3);
        assert_eq!(stats.relays_with_events, 2);
        assert_eq!(stats.relays_connected_no_events, 1);
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.query_max_ms, Some(900.0));
    }

    #[test]
    fn timeout_tax_rounds_up_to_concurrency_waves() {
        let mut assignments = AssignmentSet::new();
        let mut outcomes = BTreeMap::new();
        for i in 0..3 {
            let relay = format!("wss://t{i}.example/");
            assignments.assign(&relay, "pk1");
            outcomes.insert(
                relay,
                RelayOutcome {
                    connected: true,
                    timed_out: true,
                    ..Default::default()
                },
            );
        }

        let options = Phase2Options {
            max_concurrent_conns: 2,
            eose_timeout_ms: 15_000,
            ..Default::default()
        };
        let cache = QueryCache::new();
        let stats =
            compute_algorithm_latency(&result_with(assignments), &outcomes, &cache, &options);

        // ceil(3 / 2) = 2 waves of 15s each.
        assert_eq!(stats.timeout_count, 3);
        assert_eq!(stats.timeout_tax_ms, 30_000);
    }

    #[test]
    fn progressive_and_eose_race_track_relay_completion() {
        let mut assignments = AssignmentSet::new();
        assignments.assign("wss://quick.example/", "pk1");
        assignments.assign("wss://late.example/", "pk1");

        let mut outcomes = BTreeMap::new();
        // Done at 800ms with 3 events, and at 6000ms with 1 event.
        outcomes.insert("wss://quick.example/".to_string(), outcome(300.0, 500.0, Some(100.0)));
        outcomes.insert("wss://late.example/".to_string(), outcome(1000.0, 5000.0, Some(900.0)));

        let cache = QueryCache::new();
        cache.set("wss://quick.example/", "pk1", ids(&["e1", "e2", "e3"]));
        cache.set("wss://late.example/", "pk1", ids(&["e4"]));

        let stats = compute_algorithm_latency(
            &result_with(assignments),
            &outcomes,
            &cache,
            &Phase2Options::default(),
        );

        assert_eq!(stats.progressive_completeness[&1], 0.75);
        assert_eq!(stats.progressive_completeness[&5], 0.75);
        assert_eq!(stats.progressive_completeness[&10], 1.0);

        // First EOSE at 800ms; no grace period reaches the late relay.
        let race = &stats.eose_race[&0];
        assert_eq!(race.cutoff_ms, 800.0);
        assert_eq!(race.completeness, 0.75);
        assert_eq!(stats.eose_race[&2000].completeness, 0.75);
    }

    #[test]
    fn profile_view_aggregates_per_author() {
        let mut graph = RelayGraph::new();
        graph.add_edge("pk1", "wss://a.example/");
        graph.add_edge("pk1", "wss://b.example/");
        graph.add_edge("pk2", "wss://b.example/");

        let mut outcomes = BTreeMap::new();
        outcomes.insert("wss://a.example/".to_string(), outcome(100.0, 200.0, Some(40.0)));
        outcomes.insert("wss://b.example/".to_string(), outcome(50.0, 100.0, Some(10.0)));

        let cache = QueryCache::new();
        cache.set("wss://a.example/", "pk1", ids(&["e1"]));
        // pk2 finds nothing anywhere.

        let authors = vec!["pk1".to_string(), "pk2".to_string()];
        let stats = compute_profile_view_latency(&graph, &authors, &outcomes, &cache)
            .expect("authors have declared relays");

        assert_eq!(stats.author_count, 2);
        assert_eq!(stats.mean_ttfe_ms, Some(140.0));
        assert_eq!(stats.hit_rate, 0.5);
        assert_eq!(stats.mean_relays_queried, 1.5);
        assert_eq!(stats.mean_relays_with_events, 0.5);
    }

    #[test]
    fn no_authors_means_no_stats() {
        let graph = RelayGraph::new();
        let cache = QueryCache::new();
        assert!(compute_profile_view_latency(&graph, &[], &BTreeMap::new(), &cache).is_none());
    }
}
