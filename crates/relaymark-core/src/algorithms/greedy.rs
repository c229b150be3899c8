//! Greedy set-cover and its ε-exploration variant.
//!
//! Classic max-coverage greedy (Gossip/Applesauce style): repeatedly
//! pick the relay covering the most not-yet-satisfied writers. A writer
//! leaves the pool once it has `max_relays_per_user` assignments, so the
//! loop naturally builds redundancy before giving up budget.

use std::collections::{BTreeMap, BTreeSet};

use super::{build_result, relay_coverage, split_coverable, Timer};
use crate::input::BenchmarkInput;
use crate::rng::Mulberry32;
use crate::types::{
    AlgorithmParams, AlgorithmResult, AssignmentSet, Pubkey, RelayUrl, DEFAULT_EPSILON,
    DEFAULT_MAX_CONNECTIONS,
};

/// Deterministic greedy set-cover. Ties break on ascending URL.
pub fn greedy_set_cover(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    _rng: &mut Mulberry32,
) -> AlgorithmResult {
    run_greedy(input, params, None, "Greedy Set-Cover".to_string())
}

/// Greedy with ε-exploration: at each step, with probability ε, pick a
/// uniformly random candidate instead of the best one.
pub fn greedy_epsilon(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    rng: &mut Mulberry32,
) -> AlgorithmResult {
    let epsilon = params.epsilon.unwrap_or(DEFAULT_EPSILON);
    let name = format!("Greedy+ε-Explore (ε={epsilon})");
    run_greedy(input, params, Some((rng, epsilon)), name)
}

fn run_greedy(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    mut explore: Option<(&mut Mulberry32, f64)>,
    name: String,
) -> AlgorithmResult {
    let timer = Timer::start();
    let max_connections = params.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);
    let max_relays_per_user = params.max_relays_per_user.unwrap_or(usize::MAX);

    let (mut uncovered, mut orphaned) = split_coverable(input);
    let mut coverage = relay_coverage(input, &uncovered);

    let mut assignments = AssignmentSet::new();
    let mut per_writer: BTreeMap<Pubkey, usize> = BTreeMap::new();
    let mut selected = 0usize;

    while !uncovered.is_empty() && selected < max_connections {
        let best_relay = match pick_relay(&coverage, &mut explore) {
            Some(relay) => relay,
            None => break,
        };

        let covered_by_relay = match coverage.remove(&best_relay) {
            Some(set) if !set.is_empty() => set,
            _ => break,
        };

        let mut saturated: BTreeSet<Pubkey> = BTreeSet::new();
        for pubkey in &covered_by_relay {
            assignments.assign(&best_relay, pubkey);
            let count = per_writer.entry(pubkey.clone()).or_insert(0);
            *count += 1;
            if *count >= max_relays_per_user {
                uncovered.remove(pubkey);
                saturated.insert(pubkey.clone());
            }
        }
        selected += 1;

        // Saturated writers stop counting toward other relays' coverage.
        if !saturated.is_empty() {
            coverage.retain(|_, covered| {
                for pubkey in &saturated {
                    covered.remove(pubkey);
                }
                !covered.is_empty()
            });
        }
    }

    // Coverable writers the budget never reached.
    for pubkey in &uncovered {
        if !assignments.is_covered(pubkey) {
            orphaned.insert(pubkey.clone());
        }
    }

    build_result(name, assignments, orphaned, params, &timer, Vec::new())
}

fn pick_relay(
    coverage: &BTreeMap<RelayUrl, BTreeSet<Pubkey>>,
    explore: &mut Option<(&mut Mulberry32, f64)>,
) -> Option<RelayUrl> {
    if coverage.is_empty() {
        return None;
    }

    if let Some((rng, epsilon)) = explore {
        if rng.next_f64() < *epsilon {
            let index = rng.next_index(coverage.len());
            return coverage.keys().nth(index).cloned();
        }
    }

    // Best coverage; BTreeMap order means the first maximum is the
    // lexicographically smallest URL.
    let mut best: Option<(&RelayUrl, usize)> = None;
    for (relay, covered) in coverage {
        if best.is_none_or(|(_, count)| covered.len() > count) {
            best = Some((relay, covered.len()));
        }
    }
    best.filter(|(_, count)| *count > 0).map(|(r, _)| r.clone())
}
