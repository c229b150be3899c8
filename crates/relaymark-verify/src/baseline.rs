//! Ground-truth collection: query every writer's declared relays and
//! classify each writer by how much of their relay list answered.
//!
//! The union of event ids across a writer's *succeeded* declared relays
//! is the baseline an algorithm's selection is measured against. A
//! writer whose relays mostly failed gets no baseline; counting their
//! zero recall against an algorithm would blame the selection for the
//! relay's outage.

use std::collections::BTreeMap;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::info;

use relaymark_core::{Pubkey, RelayGraph, RelayUrl};

use crate::pool::{QueryCache, QueryFilter, RelayPool};
use crate::types::{BaselineClassification, Phase2Options, PubkeyBaseline, RelayOutcome};

/// Minimum fraction of a writer's declared relays that must answer for
/// the baseline to count as reliable.
pub const RELIABLE_THRESHOLD: f64 = 0.5;

/// Progress log cadence during collection.
const PROGRESS_EVERY: usize = 50;

/// Query all declared relays concurrently, batching each relay's
/// writers, then fold the outcomes into per-writer baselines.
pub async fn collect_baselines(
    graph: &RelayGraph,
    pool: &RelayPool,
    cache: &QueryCache,
    options: &Phase2Options,
    since: u64,
) -> BTreeMap<Pubkey, PubkeyBaseline> {
    let filter = QueryFilter {
        kinds: options.kinds.clone(),
        since,
    };
    let total = graph.relay_count();
    info!(relays = total, writers = graph.writer_count(), "collecting baselines");

    let mut queries = FuturesUnordered::new();
    for (relay, writers) in graph.relay_map() {
        let pubkeys: Vec<Pubkey> = writers.iter().cloned().collect();
        let filter = &filter;
        queries.push(async move {
            pool.query_batched(relay, &pubkeys, filter, options.batch_size, cache)
                .await;
        });
    }

    let mut done = 0usize;
    while queries.next().await.is_some() {
        done += 1;
        if done % PROGRESS_EVERY == 0 {
            info!(done, total, "baseline collection progress");
        }
    }

    build_baselines(graph, &pool.all_outcomes(), cache)
}

/// Fold relay outcomes and cached events into per-writer baselines.
/// Pure with respect to the network: everything it needs is already in
/// `outcomes` and `cache`.
pub fn build_baselines(
    graph: &RelayGraph,
    outcomes: &BTreeMap<RelayUrl, RelayOutcome>,
    cache: &QueryCache,
) -> BTreeMap<Pubkey, PubkeyBaseline> {
    let mut baselines = BTreeMap::new();
    for (pubkey, declared) in graph.writer_map() {
        let mut baseline = PubkeyBaseline {
            pubkey: pubkey.clone(),
            event_ids: Default::default(),
            relays_queried: declared.len(),
            relays_succeeded: Default::default(),
            relays_failed: Default::default(),
            relays_with_events: Default::default(),
            reliable: false,
            classification: BaselineClassification::Unreliable,
        };

        for relay in declared {
            let succeeded = outcomes
                .get(relay)
                .is_some_and(|o| o.connected && o.reached_eose);
            if !succeeded {
                baseline.relays_failed.insert(relay.clone());
                continue;
            }
            baseline.relays_succeeded.insert(relay.clone());
            if let Some(ids) = cache.get(relay, pubkey) {
                if !ids.is_empty() {
                    baseline.relays_with_events.insert(relay.clone());
                }
                baseline.event_ids.extend(ids);
            }
        }

        baseline.reliable = baseline.relays_queried > 0
            && baseline.relays_succeeded.len() as f64
                >= RELIABLE_THRESHOLD * baseline.relays_queried as f64;
        baseline.classification = classify(!baseline.event_ids.is_empty(), baseline.reliable);
        baselines.insert(pubkey.clone(), baseline);
    }
    baselines
}

fn classify(has_events: bool, reliable: bool) -> BaselineClassification {
    match (has_events, reliable) {
        (true, true) => BaselineClassification::TestableReliable,
        (true, false) => BaselineClassification::TestablePartial,
        (false, true) => BaselineClassification::ZeroBaseline,
        (false, false) => BaselineClassification::Unreliable,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn outcome(connected: bool, reached_eose: bool) -> RelayOutcome {
        RelayOutcome {
            connected,
            reached_eose,
            ..Default::default()
        }
    }

    fn graph() -> RelayGraph {
        let mut graph = RelayGraph::new();
        graph.add_edge("pk_reliable", "wss://up1.example/");
        graph.add_edge("pk_reliable", "wss://up2.example/");
        graph.add_edge("pk_partial", "wss://up1.example/");
        graph.add_edge("pk_partial", "wss://down1.example/");
        graph.add_edge("pk_partial", "wss://down2.example/");
        graph.add_edge("pk_silent", "wss://up1.example/");
        graph.add_edge("pk_unreachable", "wss://down1.example/");
        graph
    }

    fn ids(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn writers_land_in_all_four_classes() {
        let graph = graph();
        let mut outcomes = BTreeMap::new();
        outcomes.insert("wss://up1.example/".to_string(), outcome(true, true));
        outcomes.insert("wss://up2.example/".to_string(), outcome(true, true));
        outcomes.insert("wss://down1.example/".to_string(), outcome(false, false));
        // down2 never got an outcome at all.

        let cache = QueryCache::new();
        cache.set("wss://up1.example/", "pk_reliable", ids(&["e1", "e2"]));
        cache.set("wss://up2.example/", "pk_reliable", ids(&["e2", "e3"]));
        cache.set("wss://up1.example/", "pk_partial", ids(&["e9"]));
        cache.set("wss://up1.example/", "pk_silent", ids(&[]));

        let baselines = build_baselines(&graph, &outcomes, &cache);
        assert_eq!(baselines.len(), 4);

        let reliable = &baselines["pk_reliable"];
        assert_eq!(reliable.classification, BaselineClassification::TestableReliable);
        assert_eq!(reliable.event_ids, ids(&["e1", "e2", "e3"]));
        assert_eq!(reliable.relays_with_events.len(), 2);

        // 1 of 3 declared relays answered: events exist but the
        // baseline is incomplete.
        let partial = &baselines["pk_partial"];
        assert_eq!(partial.classification, BaselineClassification::TestablePartial);
        assert!(!partial.reliable);
        assert_eq!(partial.relays_failed.len(), 2);

        let silent = &baselines["pk_silent"];
        assert_eq!(silent.classification, BaselineClassification::ZeroBaseline);
        assert!(silent.reliable);
        assert!(silent.relays_with_events.is_empty());

        let unreachable = &baselines["pk_unreachable"];
        assert_eq!(unreachable.classification, BaselineClassification::Unreliable);
        assert!(unreachable.event_ids.is_empty());
    }

    #[test]
    fn exactly_half_succeeded_counts_as_reliable() {
        let mut graph = RelayGraph::new();
        graph.add_edge("pk1", "wss://up.example/");
        graph.add_edge("pk1", "wss://down.example/");
        let mut outcomes = BTreeMap::new();
        outcomes.insert("wss://up.example/".to_string(), outcome(true, true));
        outcomes.insert("wss://down.example/".to_string(), outcome(true, false));

        let cache = QueryCache::new();
        let baselines = build_baselines(&graph, &outcomes, &cache);
        assert!(baselines["pk1"].reliable);
    }

    #[test]
    fn connected_without_eose_is_a_failure() {
        let mut graph = RelayGraph::new();
        graph.add_edge("pk1", "wss://slow.example/");
        let mut outcomes = BTreeMap::new();
        outcomes.insert("wss://slow.example/".to_string(), outcome(true, false));

        let cache = QueryCache::new();
        cache.set("wss://slow.example/", "pk1", ids(&["e1"]));

        let baselines = build_baselines(&graph, &outcomes, &cache);
        let baseline = &baselines["pk1"];
        // A truncated subscription cannot vouch for completeness.
        assert!(baseline.event_ids.is_empty());
        assert_eq!(baseline.classification, BaselineClassification::Unreliable);
    }
}
