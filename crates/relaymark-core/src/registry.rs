//! Algorithm registry and run drivers.
//!
//! Every strategy is registered once with its id, display defaults, and
//! capability flags. Strategies that do not respect `max_connections`
//! natively get a post-processing cap bolted on by the runner, so the
//! comparison stays apples-to-apples at a fixed connection budget.

use std::collections::BTreeSet;
use std::sync::OnceLock;
use std::time::Instant;

use tracing::debug;

use crate::algorithms::{
    baselines, coverage_sort, filter_decomp, greedy, hybrid, ilp, mab, matching,
    priority, quality_greedy, spectral, stochastic_greedy, streaming, weighted,
    SelectionFn,
};
use crate::error::{Error, Result};
use crate::input::BenchmarkInput;
use crate::metrics::{compute_metrics, AlgorithmMetrics, MetricSummary, StochasticStats};
use crate::rng::Mulberry32;
use crate::types::{AlgorithmParams, AlgorithmResult, RelayUrl};

/// Seed used when the caller does not pin one.
pub const DEFAULT_SEED: u32 = 42;

/// One registered strategy.
#[derive(Debug)]
pub struct AlgorithmEntry {
    /// Stable identifier used on the command line and in reports.
    pub id: &'static str,
    /// Human-readable name (the strategy may annotate it further).
    pub name: &'static str,
    /// Whether the strategy honors `max_connections` itself. When false
    /// the runner caps the result afterwards.
    pub native_cap: bool,
    /// Whether repeated runs with different seeds produce different
    /// results, and therefore deserve aggregate statistics.
    pub stochastic: bool,
    /// Per-strategy parameter defaults, overridable per run.
    pub defaults: AlgorithmParams,
    pub run: SelectionFn,
}

fn params(f: impl FnOnce(&mut AlgorithmParams)) -> AlgorithmParams {
    let mut p = AlgorithmParams::default();
    f(&mut p);
    p
}

/// The full strategy table, in presentation order.
pub fn registry() -> &'static [AlgorithmEntry] {
    static REGISTRY: OnceLock<Vec<AlgorithmEntry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        vec![
            AlgorithmEntry {
                id: "greedy",
                name: "Greedy Set-Cover",
                native_cap: true,
                stochastic: false,
                defaults: params(|p| {
                    p.max_connections = Some(20);
                    p.max_relays_per_user = Some(2);
                }),
                run: greedy::greedy_set_cover,
            },
            AlgorithmEntry {
                id: "greedy-epsilon",
                name: "Greedy+ε-Explore",
                native_cap: true,
                stochastic: true,
                defaults: params(|p| {
                    p.max_connections = Some(20);
                    p.max_relays_per_user = Some(2);
                    p.epsilon = Some(0.05);
                }),
                run: greedy::greedy_epsilon,
            },
            AlgorithmEntry {
                id: "ndk",
                name: "Priority-Based (NDK)",
                native_cap: true,
                stochastic: false,
                defaults: params(|p| p.max_relays_per_user = Some(2)),
                run: priority::priority_based,
            },
            AlgorithmEntry {
                id: "welshman",
                name: "Weighted Stochastic",
                native_cap: false,
                stochastic: true,
                defaults: params(|p| p.relay_limit = Some(3)),
                run: weighted::weighted_stochastic,
            },
            AlgorithmEntry {
                id: "welshman-thompson",
                name: "Welshman+Thompson",
                native_cap: false,
                stochastic: true,
                defaults: params(|p| p.relay_limit = Some(3)),
                run: weighted::welshman_thompson,
            },
            AlgorithmEntry {
                id: "nostur",
                name: "Greedy Coverage Sort",
                native_cap: true,
                stochastic: false,
                defaults: params(|p| p.max_relays_per_user = Some(2)),
                run: coverage_sort::greedy_coverage_sort,
            },
            AlgorithmEntry {
                id: "rust-nostr",
                name: "Filter Decomposition",
                native_cap: false,
                stochastic: false,
                defaults: params(|p| p.write_limit = Some(3)),
                run: filter_decomp::filter_decomposition,
            },
            AlgorithmEntry {
                id: "fd-thompson",
                name: "FD+Thompson",
                native_cap: false,
                stochastic: true,
                defaults: params(|p| p.write_limit = Some(3)),
                run: filter_decomp::fd_thompson,
            },
            AlgorithmEntry {
                id: "direct",
                name: "Direct Mapping",
                native_cap: false,
                stochastic: false,
                defaults: AlgorithmParams::default(),
                run: baselines::direct_mapping,
            },
            AlgorithmEntry {
                id: "primal",
                name: "Primal Aggregator",
                native_cap: true,
                stochastic: false,
                defaults: AlgorithmParams::default(),
                run: baselines::aggregator_baseline,
            },
            AlgorithmEntry {
                id: "big-relays",
                name: "Big Relays (damus+nos.lol)",
                native_cap: true,
                stochastic: false,
                defaults: AlgorithmParams::default(),
                run: baselines::big_relays_baseline,
            },
            AlgorithmEntry {
                id: "ditto",
                name: "Ditto-Mew (4 app relays)",
                native_cap: true,
                stochastic: false,
                defaults: AlgorithmParams::default(),
                run: baselines::broadcast_baseline,
            },
            AlgorithmEntry {
                id: "ditto-outbox",
                name: "Ditto+Outbox Thompson",
                native_cap: false,
                stochastic: true,
                defaults: params(|p| p.write_limit = Some(3)),
                run: baselines::broadcast_outbox_thompson,
            },
            AlgorithmEntry {
                id: "popular-random",
                name: "Popular+Random",
                native_cap: false,
                stochastic: true,
                defaults: AlgorithmParams::default(),
                run: baselines::popular_plus_random,
            },
            AlgorithmEntry {
                id: "ilp",
                name: "ILP Optimal",
                native_cap: true,
                stochastic: false,
                defaults: params(|p| p.max_connections = Some(20)),
                run: ilp::ilp_optimal,
            },
            AlgorithmEntry {
                id: "stochastic-greedy",
                name: "Stochastic Greedy",
                native_cap: true,
                stochastic: true,
                defaults: params(|p| p.max_connections = Some(20)),
                run: stochastic_greedy::stochastic_greedy,
            },
            AlgorithmEntry {
                id: "mab",
                name: "MAB-UCB Relay",
                native_cap: true,
                stochastic: true,
                defaults: params(|p| p.max_connections = Some(20)),
                run: mab::mab_ucb,
            },
            AlgorithmEntry {
                id: "streaming",
                name: "Streaming Coverage",
                native_cap: true,
                stochastic: true,
                defaults: params(|p| p.max_connections = Some(20)),
                run: streaming::streaming_coverage,
            },
            AlgorithmEntry {
                id: "matching",
                name: "Bipartite Matching",
                native_cap: true,
                stochastic: false,
                defaults: params(|p| p.max_connections = Some(20)),
                run: matching::bipartite_matching,
            },
            AlgorithmEntry {
                id: "spectral",
                name: "Spectral Clustering",
                native_cap: true,
                stochastic: true,
                defaults: params(|p| p.max_connections = Some(20)),
                run: spectral::spectral_clustering,
            },
            AlgorithmEntry {
                id: "hybrid",
                name: "Hybrid Greedy+Explore",
                native_cap: true,
                stochastic: true,
                defaults: params(|p| p.max_connections = Some(20)),
                run: hybrid::hybrid_greedy_explore,
            },
            AlgorithmEntry {
                id: "nip66",
                name: "NIP-66 Weighted Greedy",
                native_cap: true,
                stochastic: false,
                defaults: params(|p| p.max_connections = Some(20)),
                run: quality_greedy::quality_weighted_greedy,
            },
        ]
    })
}

/// Look up an entry by id.
pub fn find(id: &str) -> Option<&'static AlgorithmEntry> {
    registry().iter().find(|e| e.id == id)
}

/// Resolve a selection like `["all"]` or `["greedy", "ilp"]` into
/// entries, rejecting unknown ids.
pub fn get_algorithms(ids: &[&str]) -> Result<Vec<&'static AlgorithmEntry>> {
    if ids.iter().any(|id| *id == "all") {
        return Ok(registry().iter().collect());
    }
    ids.iter()
        .map(|id| find(id).ok_or_else(|| Error::UnknownAlgorithm((*id).to_string())))
        .collect()
}

/// Run one strategy with `overrides` layered over its defaults. A
/// connection cap requested of a strategy that cannot honor it natively
/// is applied as a post-processing step.
pub fn run_algorithm(
    entry: &AlgorithmEntry,
    input: &BenchmarkInput,
    overrides: &AlgorithmParams,
) -> AlgorithmResult {
    let merged = overrides.merged_over(&entry.defaults);
    let mut rng = Mulberry32::new(merged.seed.unwrap_or(DEFAULT_SEED));
    debug!(id = entry.id, "running algorithm");
    let mut result = (entry.run)(input, &merged, &mut rng);

    if !entry.native_cap {
        if let Some(cap) = merged.max_connections {
            result = post_process_cap(result, cap);
        }
    }
    result
}

/// Trim a result down to its `cap` most loaded relays, re-orphaning
/// writers whose every assigned relay was cut. Idempotent: results
/// already within the cap pass through untouched.
pub fn post_process_cap(mut result: AlgorithmResult, cap: usize) -> AlgorithmResult {
    if result.assignments.relay_count() <= cap {
        return result;
    }
    let started = Instant::now();
    let before = result.assignments.relay_count();

    // Load descending, URL ascending on ties.
    let mut ranked: Vec<(&RelayUrl, usize)> = result
        .assignments
        .relay_to_writers()
        .iter()
        .map(|(relay, writers)| (relay, writers.len()))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let keep: BTreeSet<RelayUrl> = ranked
        .into_iter()
        .take(cap)
        .map(|(relay, _)| relay.clone())
        .collect();

    let covered_before: Vec<String> =
        result.assignments.writer_to_relays().keys().cloned().collect();
    result.assignments.retain_relays(&keep);
    for writer in covered_before {
        if !result.assignments.is_covered(&writer) {
            result.orphaned.insert(writer);
        }
    }

    result.name = format!("{} (cap@{cap})", result.name);
    result.params.max_connections = Some(cap);
    result.execution_time_ms += started.elapsed().as_secs_f64() * 1000.0;
    result
        .notes
        .push(format!("Post-processed: capped from {before} to {cap} relays"));
    result
}

/// Repeat a stochastic strategy across `runs` consecutive seeds and
/// aggregate. The returned result and metrics come from the first seed,
/// with the metric scalars replaced by cross-run means and the spread
/// attached.
pub fn run_stochastic(
    entry: &AlgorithmEntry,
    input: &BenchmarkInput,
    overrides: &AlgorithmParams,
    runs: usize,
) -> (AlgorithmResult, AlgorithmMetrics) {
    let runs = runs.max(1);
    let base_seed = overrides
        .seed
        .or(entry.defaults.seed)
        .unwrap_or(DEFAULT_SEED);

    let run_with_seed = |seed: u32| {
        let mut params = overrides.clone();
        params.seed = Some(seed);
        let result = run_algorithm(entry, input, &params);
        let metrics = compute_metrics(&result, input);
        (result, metrics)
    };

    let mut summaries = Vec::with_capacity(runs);
    let (result, mut metrics) = run_with_seed(base_seed);
    summaries.push(MetricSummary::from_metrics(&metrics));
    for offset in 1..runs {
        let (_, metrics) = run_with_seed(base_seed + offset as u32);
        summaries.push(MetricSummary::from_metrics(&metrics));
    }
    let mean = MetricSummary::mean_of(&summaries);
    let stddev = MetricSummary::stddev_of(&summaries);

    // 95% confidence interval on the mean, normal approximation.
    let half_width = |s: f64| 1.96 * s / (runs as f64).sqrt();
    let mut lower = [0.0; crate::metrics::SUMMARY_WIDTH];
    let mut upper = [0.0; crate::metrics::SUMMARY_WIDTH];
    let mean_arr = mean.to_array();
    let stddev_arr = stddev.to_array();
    for i in 0..crate::metrics::SUMMARY_WIDTH {
        lower[i] = mean_arr[i] - half_width(stddev_arr[i]);
        upper[i] = mean_arr[i] + half_width(stddev_arr[i]);
    }

    apply_summary(&mut metrics, &mean);
    metrics.stochastic = Some(StochasticStats {
        runs,
        seed: base_seed,
        mean,
        stddev,
        ci95_lower: MetricSummary::from_array(lower),
        ci95_upper: MetricSummary::from_array(upper),
    });

    (result, metrics)
}

/// Overwrite the scalar metric fields with aggregated values, keeping
/// the structural fields (name, histogram, distribution) from the
/// primary run.
fn apply_summary(metrics: &mut AlgorithmMetrics, summary: &MetricSummary) {
    metrics.total_relays_selected = summary.total_relays_selected.round() as usize;
    metrics.assignment_coverage = summary.assignment_coverage;
    metrics.covered_pubkeys = summary.covered_pubkeys.round() as usize;
    metrics.orphaned_pubkeys = summary.orphaned_pubkeys.round() as usize;
    metrics.structural_orphans = summary.structural_orphans.round() as usize;
    metrics.algorithm_orphans = summary.algorithm_orphans.round() as usize;
    metrics.avg_relays_per_pubkey = summary.avg_relays_per_pubkey;
    metrics.median_relays_per_pubkey = summary.median_relays_per_pubkey;
    metrics.pubkeys_per_relay = summary.pubkeys_per_relay;
    metrics.target_attainment_rate = summary.target_attainment_rate;
    metrics.top1_relay_share = summary.top1_relay_share;
    metrics.top5_relay_share = summary.top5_relay_share;
    metrics.hhi = summary.hhi;
    metrics.gini = summary.gini;
    metrics.execution_time_ms = summary.execution_time_ms;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::testutil::input_from;

    #[test]
    fn unknown_id_is_rejected() {
        let err = get_algorithms(&["greedy", "nope"]).unwrap_err();
        assert!(matches!(err, Error::UnknownAlgorithm(id) if id == "nope"));
    }

    #[test]
    fn all_expands_to_the_full_table() {
        let entries = get_algorithms(&["all"]).unwrap();
        assert_eq!(entries.len(), registry().len());
        let ids: BTreeSet<&str> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), entries.len(), "duplicate ids in registry");
        assert!(ids.contains("greedy"));
        assert!(ids.contains("ilp"));
        assert!(ids.contains("nip66"));
    }

    #[test]
    fn cap_is_idempotent_within_budget() {
        let input = input_from(&[("pk_a", &["wss://r1.example/"])]);
        let entry = find("direct").unwrap();
        let result = run_algorithm(entry, &input, &AlgorithmParams::default());
        let capped = post_process_cap(result.clone(), 10);
        assert_eq!(capped.name, result.name);
        assert!(capped.notes.is_empty());
    }

    #[test]
    fn cap_reorphans_writers_losing_all_relays() {
        // direct keeps every declared relay; capping to 1 keeps the most
        // loaded relay and re-orphans pk_solo.
        let input = input_from(&[
            ("pk_a", &["wss://pop.example/"]),
            ("pk_b", &["wss://pop.example/"]),
            ("pk_solo", &["wss://solo.example/"]),
        ]);
        let entry = find("direct").unwrap();
        let params = AlgorithmParams {
            max_connections: Some(1),
            ..Default::default()
        };
        let result = run_algorithm(entry, &input, &params);
        assert_eq!(result.assignments.relay_count(), 1);
        assert!(result.orphaned.contains("pk_solo"));
        assert!(result.name.ends_with("(cap@1)"));
        assert!(result.notes.iter().any(|n| n.contains("capped from 2 to 1")));
        assert!(result.partitions_follows(&input.follows));
    }

    #[test]
    fn native_cap_strategies_skip_post_processing() {
        let input = input_from(&[
            ("pk_a", &["wss://r1.example/"]),
            ("pk_b", &["wss://r2.example/"]),
        ]);
        let entry = find("greedy").unwrap();
        let params = AlgorithmParams {
            max_connections: Some(1),
            ..Default::default()
        };
        let result = run_algorithm(entry, &input, &params);
        assert!(!result.name.contains("cap@"), "{}", result.name);
        assert_eq!(result.assignments.relay_count(), 1);
    }

    #[test]
    fn overrides_win_over_entry_defaults() {
        let input = input_from(&[(
            "pk_a",
            &["wss://r1.example/", "wss://r2.example/", "wss://r3.example/"],
        )]);
        let entry = find("rust-nostr").unwrap();
        let params = AlgorithmParams {
            write_limit: Some(1),
            ..Default::default()
        };
        let result = run_algorithm(entry, &input, &params);
        assert_eq!(result.assignments.relay_count_for("pk_a"), 1);
    }

    #[test]
    fn stochastic_aggregation_shape() {
        let input = input_from(&[
            ("pk_a", &["wss://r1.example/", "wss://r2.example/"]),
            ("pk_b", &["wss://r2.example/", "wss://r3.example/"]),
        ]);
        let entry = find("welshman").unwrap();
        let (result, metrics) =
            run_stochastic(entry, &input, &AlgorithmParams::default(), 5);
        let stats = metrics.stochastic.as_ref().unwrap();
        assert_eq!(stats.runs, 5);
        assert_eq!(stats.seed, DEFAULT_SEED);
        // Coverage is 1.0 for every seed here, so the CI collapses.
        assert!((stats.mean.assignment_coverage - 1.0).abs() < 1e-12);
        assert!(stats.stddev.assignment_coverage.abs() < 1e-12);
        assert!((stats.ci95_lower.assignment_coverage - 1.0).abs() < 1e-9);
        assert_eq!(result.params.seed, Some(DEFAULT_SEED));
    }

    #[test]
    fn deterministic_entries_repeat_exactly() {
        let input = input_from(&[
            ("pk_a", &["wss://r1.example/", "wss://r2.example/"]),
            ("pk_b", &["wss://r2.example/"]),
        ]);
        for entry in registry().iter().filter(|e| !e.stochastic) {
            let a = run_algorithm(entry, &input, &AlgorithmParams::default());
            let b = run_algorithm(entry, &input, &AlgorithmParams::default());
            assert_eq!(a.assignments, b.assignments, "{} not repeatable", entry.id);
        }
    }
}
