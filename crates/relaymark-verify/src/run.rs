//! Phase-2 orchestration: collect (or reload) baselines, query any
//! relays the algorithms picked outside the declared graph, then score
//! every algorithm result against the same ground truth.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use chrono::Utc;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::{info, warn};

use relaymark_core::stats::{mean, median_sorted, percentile_sorted, to_sorted};
use relaymark_core::types::AlgorithmResult;
use relaymark_core::{BenchmarkInput, Pubkey, RelayUrl};

use crate::baseline::collect_baselines;
use crate::cache::{BaselineCache, BaselineCacheFile, DEFAULT_TTL_MS, SCHEMA_VERSION};
use crate::latency::{compute_algorithm_latency, compute_profile_view_latency};
use crate::pool::{QueryCache, QueryFilter, RelayPool};
use crate::types::{
    BaselineClassification, BaselineStats, Phase2Options, Phase2Result, PubkeyBaseline,
    RelayOutcome, TimingStats, TimingSummary,
};
use crate::verify::verify_algorithm;

/// Run the full verification pass over a set of algorithm results.
///
/// With a [`BaselineCache`] supplied, a fresh-enough cached run is
/// reused and no network traffic happens at all; latency stats are only
/// produced on fresh runs, since a cache hit has no outcomes to replay.
pub async fn run_phase2(
    input: &BenchmarkInput,
    results: &[AlgorithmResult],
    options: Phase2Options,
    store: Option<&BaselineCache>,
) -> Phase2Result {
    let now = Utc::now().timestamp() as u64;
    let since = now.saturating_sub(options.window_seconds);
    let follow_count = input.graph.writer_count();
    let relay_count = input.graph.relay_count();

    let cache = QueryCache::new();
    let cached = store.and_then(|s| {
        s.load(&input.target_pubkey, options.window_seconds, follow_count, relay_count)
    });

    let (baselines, outcomes, collection_ms, sub_timeouts, fresh) = match cached {
        Some(file) => {
            info!(baselines = file.baselines.len(), "reusing cached baselines");
            let baselines = file.baselines_by_pubkey();
            repopulate_cache(&cache, &baselines);
            (baselines, BTreeMap::new(), 0.0, 0, false)
        }
        None => {
            let pool = RelayPool::new(&options);
            let started = Instant::now();
            let baselines =
                collect_baselines(&input.graph, &pool, &cache, &options, since).await;

            let extra = extra_relay_targets(input, results);
            if !extra.is_empty() {
                info!(relays = extra.len(), "querying out-of-graph relays");
                let filter = QueryFilter {
                    kinds: options.kinds.clone(),
                    since,
                };
                let mut queries = FuturesUnordered::new();
                for (relay, writers) in &extra {
                    let pubkeys: Vec<Pubkey> = writers.iter().cloned().collect();
                    let filter = &filter;
                    let pool = &pool;
                    let cache = &cache;
                    queries.push(async move {
                        pool.query_batched(relay, &pubkeys, filter, options.batch_size, cache)
                            .await;
                    });
                }
                while queries.next().await.is_some() {}
            }

            let collection_ms = started.elapsed().as_secs_f64() * 1000.0;
            pool.close_all();
            let outcomes = pool.all_outcomes();
            let timeout_count = pool.timeout_count();
            let baselines_out = baselines;

            if let Some(store) = store {
                let (queried, succeeded) = relay_success_counts(&baselines_out);
                let envelope = BaselineCacheFile {
                    schema_version: SCHEMA_VERSION,
                    pubkey: input.target_pubkey.clone(),
                    window_seconds: options.window_seconds,
                    since,
                    follow_count,
                    relay_count,
                    fetched_at: Utc::now().timestamp_millis(),
                    ttl_ms: DEFAULT_TTL_MS,
                    relay_success_rate: ratio(succeeded, queried),
                    total_relays_queried: queried,
                    total_relays_succeeded: succeeded,
                    baselines: baselines_out.values().cloned().collect(),
                };
                if let Err(err) = store.store(&envelope) {
                    warn!(%err, "failed to write baseline cache");
                }
            }

            (baselines_out, outcomes, collection_ms, timeout_count, true)
        }
    };

    let class_counts = classification_counts(&baselines);
    if class_counts.values().sum::<usize>() != follow_count {
        warn!(
            classified = class_counts.values().sum::<usize>(),
            follow_count, "classification does not partition the writers"
        );
    }
    let testable_reliable = class_counts
        .get(&BaselineClassification::TestableReliable)
        .copied()
        .unwrap_or(0);
    let testable_partial = class_counts
        .get(&BaselineClassification::TestablePartial)
        .copied()
        .unwrap_or(0);

    let baseline_stats =
        build_baseline_stats(&baselines, &outcomes, collection_ms, sub_timeouts, fresh);

    let mut algorithms = Vec::with_capacity(results.len());
    for result in results {
        let mut verification = verify_algorithm(result, &input.graph, &baselines, &cache);
        if verification.testable_reliable_authors != testable_reliable {
            warn!(
                algorithm = %result.name,
                "testable author count drifted between baseline and verification"
            );
        }
        if fresh {
            verification.latency =
                Some(compute_algorithm_latency(result, &outcomes, &cache, &options));
        }
        algorithms.push(verification);
    }

    let profile_view_latency = if fresh {
        let testable_authors: Vec<Pubkey> = baselines
            .values()
            .filter(|b| b.classification == BaselineClassification::TestableReliable)
            .map(|b| b.pubkey.clone())
            .collect();
        compute_profile_view_latency(&input.graph, &testable_authors, &outcomes, &cache)
    } else {
        None
    };

    Phase2Result {
        options,
        since,
        total_authors_with_relay_data: follow_count,
        testable_reliable_authors: testable_reliable,
        testable_partial_authors: testable_partial,
        authors_zero_baseline: class_counts
            .get(&BaselineClassification::ZeroBaseline)
            .copied()
            .unwrap_or(0),
        authors_unreliable_baseline: class_counts
            .get(&BaselineClassification::Unreliable)
            .copied()
            .unwrap_or(0),
        baseline_stats,
        algorithms,
        profile_view_latency,
        baselines,
    }
}

/// Relays selected by some algorithm but declared by nobody, with the
/// union of writers assigned to them across all results.
fn extra_relay_targets(
    input: &BenchmarkInput,
    results: &[AlgorithmResult],
) -> BTreeMap<RelayUrl, BTreeSet<Pubkey>> {
    let mut extra: BTreeMap<RelayUrl, BTreeSet<Pubkey>> = BTreeMap::new();
    for result in results {
        for (relay, writers) in result.assignments.relay_to_writers() {
            if input.graph.writers_on(relay).is_some() {
                continue;
            }
            extra
                .entry(relay.clone())
                .or_default()
                .extend(writers.iter().cloned());
        }
    }
    extra
}

/// Rebuild the in-memory query cache from a cached envelope. The
/// per-relay event split was not persisted, so the repopulation is
/// conservative: every relay that had events gets the author's full
/// union, and succeeded-but-silent relays get an explicit empty set.
fn repopulate_cache(cache: &QueryCache, baselines: &BTreeMap<Pubkey, PubkeyBaseline>) {
    for baseline in baselines.values() {
        for relay in &baseline.relays_with_events {
            cache.set(relay, &baseline.pubkey, baseline.event_ids.clone());
        }
        for relay in baseline.relays_succeeded.difference(&baseline.relays_with_events) {
            cache.set(relay, &baseline.pubkey, BTreeSet::new());
        }
    }
}

fn classification_counts(
    baselines: &BTreeMap<Pubkey, PubkeyBaseline>,
) -> BTreeMap<BaselineClassification, usize> {
    let mut counts = BTreeMap::new();
    for baseline in baselines.values() {
        *counts.entry(baseline.classification).or_insert(0) += 1;
    }
    counts
}

/// Distinct relays queried and succeeded across all baselines. A relay
/// counts as succeeded if it answered for any writer.
fn relay_success_counts(baselines: &BTreeMap<Pubkey, PubkeyBaseline>) -> (usize, usize) {
    let mut seen: BTreeSet<&RelayUrl> = BTreeSet::new();
    let mut succeeded: BTreeSet<&RelayUrl> = BTreeSet::new();
    for baseline in baselines.values() {
        for relay in &baseline.relays_succeeded {
            seen.insert(relay);
            succeeded.insert(relay);
        }
        for relay in &baseline.relays_failed {
            seen.insert(relay);
        }
    }
    (seen.len(), succeeded.len())
}

fn build_baseline_stats(
    baselines: &BTreeMap<Pubkey, PubkeyBaseline>,
    outcomes: &BTreeMap<RelayUrl, RelayOutcome>,
    collection_ms: f64,
    sub_timeouts: usize,
    fresh: bool,
) -> BaselineStats {
    let (queried, succeeded) = relay_success_counts(baselines);

    let mut unique_events: BTreeSet<&String> = BTreeSet::new();
    let mut testable_counts = Vec::new();
    for baseline in baselines.values() {
        unique_events.extend(baseline.event_ids.iter());
        if matches!(
            baseline.classification,
            BaselineClassification::TestableReliable | BaselineClassification::TestablePartial
        ) {
            testable_counts.push(baseline.event_ids.len() as f64);
        }
    }
    let sorted_counts = to_sorted(&testable_counts);

    let timing_stats = fresh.then(|| {
        let connect: Vec<f64> = outcomes
            .values()
            .filter(|o| o.connected)
            .map(|o| o.connect_ms)
            .collect();
        let query: Vec<f64> = outcomes
            .values()
            .filter(|o| o.connected)
            .map(|o| o.query_ms)
            .collect();
        TimingStats {
            connect_ms: summarize(&connect),
            query_ms: summarize(&query),
            timeout_count: sub_timeouts,
            timeout_relay_count: outcomes.values().filter(|o| o.timed_out).count(),
            total_relay_count: outcomes.len(),
        }
    });

    BaselineStats {
        total_relays_queried: queried,
        relay_success_rate: ratio(succeeded, queried),
        total_unique_events: unique_events.len(),
        mean_events_per_testable_author: mean(&testable_counts),
        median_events_per_testable_author: median_sorted(&sorted_counts),
        collection_time_ms: collection_ms,
        timing_stats,
    }
}

fn summarize(values: &[f64]) -> TimingSummary {
    let sorted = to_sorted(values);
    TimingSummary {
        median: median_sorted(&sorted),
        p95: percentile_sorted(&sorted, 0.95),
        mean: mean(values),
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
