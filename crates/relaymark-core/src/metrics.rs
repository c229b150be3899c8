//! Metrics engine: turns an assignment into coverage, load,
//! concentration, and fairness numbers. Metrics are a derived view and
//! are recomputed fresh from `(result, input)` every time, never stored
//! alongside the assignment.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::input::BenchmarkInput;
use crate::stats::{mean, median_sorted, percentile_sorted, stddev, to_sorted};
use crate::types::{AlgorithmResult, Pubkey};

/// Summary of a sample of per-relay loads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct Distribution {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub p90: f64,
    pub p99: f64,
}

impl Distribution {
    fn from_values(values: &[f64]) -> Self {
        let sorted = to_sorted(values);
        Self {
            min: sorted.first().copied().unwrap_or(0.0),
            max: sorted.last().copied().unwrap_or(0.0),
            mean: mean(values),
            median: median_sorted(&sorted),
            p90: percentile_sorted(&sorted, 0.90),
            p99: percentile_sorted(&sorted, 0.99),
        }
    }
}

/// Full metric set for one algorithm run.
#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmMetrics {
    pub name: String,
    pub total_relays_selected: usize,
    /// Covered follows over all follows, in [0, 1].
    pub assignment_coverage: f64,
    pub covered_pubkeys: usize,
    pub orphaned_pubkeys: usize,
    /// Follows with no relay list at all. The same for every algorithm
    /// on a given input.
    pub structural_orphans: usize,
    /// Follows that had relay data but were left uncovered.
    pub algorithm_orphans: usize,
    pub avg_relays_per_pubkey: f64,
    pub median_relays_per_pubkey: f64,
    pub pubkeys_per_relay: f64,
    /// Histogram: relay count -> number of writers with that count.
    pub pubkey_relay_count_distribution: BTreeMap<usize, usize>,
    pub relay_load_distribution: Distribution,
    /// Fraction of covered writers meeting the redundancy target.
    pub target_attainment_rate: f64,
    /// Unique writers on the heaviest relay over covered writers.
    pub top1_relay_share: f64,
    /// Union of writers on the five heaviest relays over covered writers.
    pub top5_relay_share: f64,
    /// Herfindahl-Hirschman index over per-relay edge shares.
    pub hhi: f64,
    /// Gini coefficient over relay loads.
    pub gini: f64,
    pub execution_time_ms: f64,
    /// Aggregate statistics when the run was repeated with varied seeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stochastic: Option<StochasticStats>,
}

/// Numeric projection of [`AlgorithmMetrics`] used for cross-run
/// aggregation. Kept as a fixed-order array internally so mean/stddev
/// never drift out of sync with the field list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSummary {
    pub total_relays_selected: f64,
    pub assignment_coverage: f64,
    pub covered_pubkeys: f64,
    pub orphaned_pubkeys: f64,
    pub structural_orphans: f64,
    pub algorithm_orphans: f64,
    pub avg_relays_per_pubkey: f64,
    pub median_relays_per_pubkey: f64,
    pub pubkeys_per_relay: f64,
    pub target_attainment_rate: f64,
    pub top1_relay_share: f64,
    pub top5_relay_share: f64,
    pub hhi: f64,
    pub gini: f64,
    pub execution_time_ms: f64,
}

/// Number of scalar fields in [`MetricSummary`].
pub const SUMMARY_WIDTH: usize = 15;

impl MetricSummary {
    pub fn from_metrics(m: &AlgorithmMetrics) -> Self {
        Self {
            total_relays_selected: m.total_relays_selected as f64,
            assignment_coverage: m.assignment_coverage,
            covered_pubkeys: m.covered_pubkeys as f64,
            orphaned_pubkeys: m.orphaned_pubkeys as f64,
            structural_orphans: m.structural_orphans as f64,
            algorithm_orphans: m.algorithm_orphans as f64,
            avg_relays_per_pubkey: m.avg_relays_per_pubkey,
            median_relays_per_pubkey: m.median_relays_per_pubkey,
            pubkeys_per_relay: m.pubkeys_per_relay,
            target_attainment_rate: m.target_attainment_rate,
            top1_relay_share: m.top1_relay_share,
            top5_relay_share: m.top5_relay_share,
            hhi: m.hhi,
            gini: m.gini,
            execution_time_ms: m.execution_time_ms,
        }
    }

    pub fn to_array(self) -> [f64; SUMMARY_WIDTH] {
        [
            self.total_relays_selected,
            self.assignment_coverage,
            self.covered_pubkeys,
            self.orphaned_pubkeys,
            self.structural_orphans,
            self.algorithm_orphans,
            self.avg_relays_per_pubkey,
            self.median_relays_per_pubkey,
            self.pubkeys_per_relay,
            self.target_attainment_rate,
            self.top1_relay_share,
            self.top5_relay_share,
            self.hhi,
            self.gini,
            self.execution_time_ms,
        ]
    }

    pub fn from_array(a: [f64; SUMMARY_WIDTH]) -> Self {
        Self {
            total_relays_selected: a[0],
            assignment_coverage: a[1],
            covered_pubkeys: a[2],
            orphaned_pubkeys: a[3],
            structural_orphans: a[4],
            algorithm_orphans: a[5],
            avg_relays_per_pubkey: a[6],
            median_relays_per_pubkey: a[7],
            pubkeys_per_relay: a[8],
            target_attainment_rate: a[9],
            top1_relay_share: a[10],
            top5_relay_share: a[11],
            hhi: a[12],
            gini: a[13],
            execution_time_ms: a[14],
        }
    }

    /// Elementwise mean over a sample of summaries.
    pub fn mean_of(samples: &[MetricSummary]) -> Self {
        Self::aggregate(samples, mean)
    }

    /// Elementwise population standard deviation.
    pub fn stddev_of(samples: &[MetricSummary]) -> Self {
        Self::aggregate(samples, stddev)
    }

    fn aggregate(samples: &[MetricSummary], f: impl Fn(&[f64]) -> f64) -> Self {
        let mut out = [0.0; SUMMARY_WIDTH];
        let arrays: Vec<[f64; SUMMARY_WIDTH]> =
            samples.iter().map(|s| s.to_array()).collect();
        for (i, slot) in out.iter_mut().enumerate() {
            let column: Vec<f64> = arrays.iter().map(|a| a[i]).collect();
            *slot = f(&column);
        }
        Self::from_array(out)
    }
}

/// Cross-run statistics for a stochastic algorithm.
#[derive(Debug, Clone, Serialize)]
pub struct StochasticStats {
    pub runs: usize,
    pub seed: u32,
    pub mean: MetricSummary,
    pub stddev: MetricSummary,
    pub ci95_lower: MetricSummary,
    pub ci95_upper: MetricSummary,
}

/// Compute all metrics for one run. Degenerate inputs (no follows, no
/// relays) produce zeros, never NaN.
pub fn compute_metrics(result: &AlgorithmResult, input: &BenchmarkInput) -> AlgorithmMetrics {
    let total_follows = input.follows.len();
    let covered_pubkeys = result.assignments.writer_to_relays().len();
    let structural_orphans = input.follows_missing_relay_list.len();
    let algorithm_orphans = total_follows
        .saturating_sub(covered_pubkeys)
        .saturating_sub(structural_orphans);

    let assignment_coverage = if total_follows > 0 {
        covered_pubkeys as f64 / total_follows as f64
    } else {
        0.0
    };

    let relay_counts: Vec<f64> = result
        .assignments
        .writer_to_relays()
        .values()
        .map(|relays| relays.len() as f64)
        .collect();
    let sorted_relay_counts = to_sorted(&relay_counts);

    let mut count_histogram: BTreeMap<usize, usize> = BTreeMap::new();
    for count in &relay_counts {
        *count_histogram.entry(*count as usize).or_default() += 1;
    }

    let relay_loads: Vec<f64> = result
        .assignments
        .relay_to_writers()
        .values()
        .map(|writers| writers.len() as f64)
        .collect();

    let target = result.params.target_per_author();
    let attained = result
        .assignments
        .writer_to_relays()
        .values()
        .filter(|relays| relays.len() >= target)
        .count();
    let target_attainment_rate = if covered_pubkeys > 0 {
        attained as f64 / covered_pubkeys as f64
    } else {
        0.0
    };

    let concentration = compute_concentration(result, covered_pubkeys);

    AlgorithmMetrics {
        name: result.name.clone(),
        total_relays_selected: result.assignments.relay_count(),
        assignment_coverage,
        covered_pubkeys,
        orphaned_pubkeys: result.orphaned.len(),
        structural_orphans,
        algorithm_orphans,
        avg_relays_per_pubkey: mean(&relay_counts),
        median_relays_per_pubkey: median_sorted(&sorted_relay_counts),
        pubkeys_per_relay: mean(&relay_loads),
        pubkey_relay_count_distribution: count_histogram,
        relay_load_distribution: Distribution::from_values(&relay_loads),
        target_attainment_rate,
        top1_relay_share: concentration.top1,
        top5_relay_share: concentration.top5,
        hhi: concentration.hhi,
        gini: concentration.gini,
        execution_time_ms: result.execution_time_ms,
        stochastic: None,
    }
}

struct Concentration {
    top1: f64,
    top5: f64,
    hhi: f64,
    gini: f64,
}

fn compute_concentration(result: &AlgorithmResult, covered_pubkeys: usize) -> Concentration {
    let relay_map = result.assignments.relay_to_writers();
    if covered_pubkeys == 0 || relay_map.is_empty() {
        return Concentration {
            top1: 0.0,
            top5: 0.0,
            hhi: 0.0,
            gini: 0.0,
        };
    }

    // Load descending, URL ascending on ties.
    let mut sorted: Vec<(&String, &BTreeSet<Pubkey>)> = relay_map.iter().collect();
    sorted.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));

    let top1 = sorted[0].1.len() as f64 / covered_pubkeys as f64;

    let mut top5_union: BTreeSet<&Pubkey> = BTreeSet::new();
    for (_, writers) in sorted.iter().take(5) {
        top5_union.extend(writers.iter());
    }
    let top5 = top5_union.len() as f64 / covered_pubkeys as f64;

    let loads: Vec<f64> = sorted.iter().map(|(_, w)| w.len() as f64).collect();
    let total_edges: f64 = loads.iter().sum();
    let hhi = if total_edges > 0.0 {
        loads
            .iter()
            .map(|load| {
                let share = load / total_edges;
                share * share
            })
            .sum()
    } else {
        0.0
    };

    Concentration {
        top1,
        top5,
        hhi,
        gini: compute_gini(&loads),
    }
}

/// Rank-weighted Gini coefficient. 0 for uniform loads, approaching 1
/// as a single relay takes everything.
fn compute_gini(values: &[f64]) -> f64 {
    if values.len() <= 1 {
        return 0.0;
    }
    let sorted = to_sorted(values);
    let n = sorted.len();
    let total: f64 = sorted.iter().sum();
    if total == 0.0 {
        return 0.0;
    }
    let sum_of_diffs: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, v)| (2.0 * (i as f64 + 1.0) - n as f64 - 1.0) * v)
        .sum();
    sum_of_diffs / (n as f64 * total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::testutil::input_from;
    use crate::types::{AlgorithmParams, AssignmentSet};

    fn result_from(edges: &[(&str, &str)], orphans: &[&str]) -> AlgorithmResult {
        let mut assignments = AssignmentSet::new();
        for (relay, writer) in edges {
            assignments.assign(relay, writer);
        }
        AlgorithmResult {
            name: "test".to_string(),
            assignments,
            orphaned: orphans.iter().map(|s| s.to_string()).collect(),
            params: AlgorithmParams::default(),
            execution_time_ms: 1.0,
            notes: Vec::new(),
        }
    }

    #[test]
    fn empty_result_yields_zeros() {
        let input = input_from(&[("pk_a", &["wss://r1.example/"])]);
        let result = result_from(&[], &["pk_a"]);
        let m = compute_metrics(&result, &input);
        assert_eq!(m.assignment_coverage, 0.0);
        assert_eq!(m.top1_relay_share, 0.0);
        assert_eq!(m.hhi, 0.0);
        assert_eq!(m.gini, 0.0);
        assert!(m.avg_relays_per_pubkey == 0.0);
        assert!(!m.median_relays_per_pubkey.is_nan());
    }

    #[test]
    fn orphan_partition_structural_vs_algorithmic() {
        let input = input_from(&[
            ("pk_a", &["wss://r1.example/"]),
            ("pk_b", &["wss://r2.example/"]),
            ("pk_c", &[]),
        ]);
        // Cover only pk_a; pk_b is an algorithmic orphan, pk_c structural.
        let result = result_from(&[("wss://r1.example/", "pk_a")], &["pk_b", "pk_c"]);
        let m = compute_metrics(&result, &input);
        assert_eq!(m.covered_pubkeys, 1);
        assert_eq!(m.orphaned_pubkeys, 2);
        assert_eq!(m.structural_orphans, 1);
        assert_eq!(m.algorithm_orphans, 1);
        assert!((m.assignment_coverage - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn concentration_on_single_relay() {
        let input = input_from(&[
            ("pk_a", &["wss://r1.example/"]),
            ("pk_b", &["wss://r1.example/"]),
        ]);
        let result = result_from(
            &[("wss://r1.example/", "pk_a"), ("wss://r1.example/", "pk_b")],
            &[],
        );
        let m = compute_metrics(&result, &input);
        assert_eq!(m.top1_relay_share, 1.0);
        assert_eq!(m.top5_relay_share, 1.0);
        assert_eq!(m.hhi, 1.0);
        assert_eq!(m.gini, 0.0, "single relay is trivially uniform");
    }

    #[test]
    fn gini_bounds_and_direction() {
        // Uniform loads.
        assert_eq!(compute_gini(&[3.0, 3.0, 3.0]), 0.0);
        // Skewed loads have higher inequality.
        let skewed = compute_gini(&[1.0, 1.0, 10.0]);
        let mild = compute_gini(&[3.0, 4.0, 5.0]);
        assert!(skewed > mild);
        assert!((0.0..=1.0).contains(&skewed));
        assert_eq!(compute_gini(&[5.0]), 0.0);
        assert_eq!(compute_gini(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn target_attainment_counts_covered_only() {
        let input = input_from(&[
            ("pk_a", &["wss://r1.example/", "wss://r2.example/"]),
            ("pk_b", &["wss://r1.example/"]),
        ]);
        let mut result = result_from(
            &[
                ("wss://r1.example/", "pk_a"),
                ("wss://r2.example/", "pk_a"),
                ("wss://r1.example/", "pk_b"),
            ],
            &[],
        );
        result.params.relay_goal_per_author = Some(2);
        let m = compute_metrics(&result, &input);
        // pk_a has 2 relays (attained), pk_b has 1.
        assert!((m.target_attainment_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn top5_share_uses_set_union() {
        // Same two writers on five relays: union is 2, not 10.
        let edges: Vec<(String, &str)> = (1..=5)
            .flat_map(|i| {
                let url = format!("wss://r{i}.example/");
                [(url.clone(), "pk_a"), (url, "pk_b")]
            })
            .collect();
        let edge_refs: Vec<(&str, &str)> =
            edges.iter().map(|(r, w)| (r.as_str(), *w)).collect();
        let input = input_from(&[("pk_a", &["wss://r1.example/"]), ("pk_b", &["wss://r1.example/"])]);
        let result = result_from(&edge_refs, &[]);
        let m = compute_metrics(&result, &input);
        assert_eq!(m.top5_relay_share, 1.0);
        assert_eq!(m.top1_relay_share, 1.0);
    }

    #[test]
    fn summary_round_trips_through_array() {
        let input = input_from(&[("pk_a", &["wss://r1.example/"])]);
        let result = result_from(&[("wss://r1.example/", "pk_a")], &[]);
        let m = compute_metrics(&result, &input);
        let s = MetricSummary::from_metrics(&m);
        assert_eq!(MetricSummary::from_array(s.to_array()), s);
    }

    #[test]
    fn report_serialization_omits_absent_stochastic_block() {
        let input = input_from(&[("pk_a", &["wss://r1.example/"])]);
        let result = result_from(&[("wss://r1.example/", "pk_a")], &[]);
        let m = compute_metrics(&result, &input);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["assignment_coverage"], 1.0);
        assert_eq!(json["total_relays_selected"], 1);
        assert!(json.get("stochastic").is_none());
    }
}
