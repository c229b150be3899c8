//! Relay-selection strategy library.
//!
//! Every strategy has the same shape: take a frozen [`BenchmarkInput`],
//! tuning [`AlgorithmParams`], and a seeded [`Mulberry32`], and return an
//! [`AlgorithmResult`]. Deterministic strategies ignore the generator.
//! Strategies only assign writers to relays those writers declared;
//! broadcast baselines, which model clients that ignore declarations,
//! are the documented exception.

pub mod baselines;
pub mod coverage_sort;
pub mod filter_decomp;
pub mod greedy;
pub mod hybrid;
pub mod ilp;
pub mod mab;
pub mod matching;
pub mod priority;
pub mod quality_greedy;
pub mod spectral;
pub mod stochastic_greedy;
pub mod streaming;
pub mod weighted;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use crate::input::BenchmarkInput;
use crate::rng::Mulberry32;
use crate::types::{AlgorithmParams, AlgorithmResult, AssignmentSet, Pubkey, RelayUrl};

/// Signature every strategy implements.
pub type SelectionFn =
    fn(&BenchmarkInput, &AlgorithmParams, &mut Mulberry32) -> AlgorithmResult;

/// Wall-clock timer for `execution_time_ms`.
pub(crate) struct Timer(Instant);

impl Timer {
    pub(crate) fn start() -> Self {
        Self(Instant::now())
    }

    pub(crate) fn elapsed_ms(&self) -> f64 {
        self.0.elapsed().as_secs_f64() * 1000.0
    }
}

/// Split follows into coverable writers and the structurally orphaned.
pub(crate) fn split_coverable(
    input: &BenchmarkInput,
) -> (BTreeSet<Pubkey>, BTreeSet<Pubkey>) {
    let mut coverable = BTreeSet::new();
    let mut orphaned = BTreeSet::new();
    for pubkey in &input.follows {
        if input
            .graph
            .relays_of(pubkey)
            .is_some_and(|relays| !relays.is_empty())
        {
            coverable.insert(pubkey.clone());
        } else {
            orphaned.insert(pubkey.clone());
        }
    }
    (coverable, orphaned)
}

/// Per-relay coverage restricted to a set of writers still in play.
pub(crate) fn relay_coverage(
    input: &BenchmarkInput,
    relevant: &BTreeSet<Pubkey>,
) -> BTreeMap<RelayUrl, BTreeSet<Pubkey>> {
    let mut coverage = BTreeMap::new();
    for (relay, writers) in input.graph.relay_map() {
        let hits: BTreeSet<Pubkey> = writers.intersection(relevant).cloned().collect();
        if !hits.is_empty() {
            coverage.insert(relay.clone(), hits);
        }
    }
    coverage
}

/// Follows left uncovered by `assignments`.
pub(crate) fn uncovered_follows(
    assignments: &AssignmentSet,
    input: &BenchmarkInput,
) -> BTreeSet<Pubkey> {
    input
        .follows
        .iter()
        .filter(|f| !assignments.is_covered(f))
        .cloned()
        .collect()
}

/// Assemble the result record.
pub(crate) fn build_result(
    name: impl Into<String>,
    assignments: AssignmentSet,
    orphaned: BTreeSet<Pubkey>,
    params: &AlgorithmParams,
    timer: &Timer,
    notes: Vec<String>,
) -> AlgorithmResult {
    AlgorithmResult {
        name: name.into(),
        assignments,
        orphaned,
        params: params.clone(),
        execution_time_ms: timer.elapsed_ms(),
        notes,
    }
}

/// Fisher-Yates partial shuffle: after the call, the first `picks`
/// elements are a uniform sample without replacement.
pub(crate) fn partial_shuffle<T>(items: &mut [T], picks: usize, rng: &mut Mulberry32) {
    let n = items.len();
    for i in 0..picks.min(n) {
        let j = i + rng.next_index(n - i);
        items.swap(i, j);
    }
}
