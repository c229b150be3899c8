//! Hybrid selection: most of the budget goes to deterministic greedy
//! cover, the tail is spent on weighted-random exploration biased
//! toward small relays that still hold uncovered writers.

use std::collections::BTreeSet;

use super::{build_result, relay_coverage, split_coverable, Timer};
use crate::input::BenchmarkInput;
use crate::rng::Mulberry32;
use crate::types::{
    AlgorithmParams, AlgorithmResult, AssignmentSet, Pubkey, RelayUrl,
    DEFAULT_HYBRID_GREEDY_RATIO, DEFAULT_MAX_CONNECTIONS,
};

/// Bonus per still-uncovered writer in the exploration weight.
const UNCOVERED_BONUS: f64 = 0.5;

pub fn hybrid_greedy_explore(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let budget = params.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);
    let ratio = params
        .hybrid_greedy_ratio
        .unwrap_or(DEFAULT_HYBRID_GREEDY_RATIO);
    let greedy_slots = ((budget as f64 * ratio).round() as usize).max(1).min(budget);

    let (coverable, structural) = split_coverable(input);
    let mut coverage = relay_coverage(input, &coverable);

    let mut assignments = AssignmentSet::new();
    let mut uncovered = coverable;
    let mut explored = 0usize;

    // Phase 1: plain greedy single cover.
    while assignments.relay_count() < greedy_slots && !uncovered.is_empty() {
        let mut best: Option<(&RelayUrl, usize)> = None;
        for (relay, writers) in &coverage {
            let gain = writers.intersection(&uncovered).count();
            let better = match best {
                None => gain > 0,
                Some((best_relay, best_gain)) => {
                    gain > best_gain || (gain == best_gain && relay < best_relay)
                }
            };
            if better {
                best = Some((relay, gain));
            }
        }
        let Some((relay, _)) = best else { break };
        let relay = relay.clone();
        take_relay(&relay, &mut coverage, &mut uncovered, &mut assignments);
    }

    // Phase 2: roulette over the rest. Small relays get an
    // anti-popularity boost so exploration actually explores.
    while assignments.relay_count() < budget && !coverage.is_empty() {
        let candidates: Vec<(&RelayUrl, f64)> = coverage
            .iter()
            .map(|(relay, writers)| {
                let uncovered_here = writers.intersection(&uncovered).count();
                let weight = 1.0 / (writers.len() as f64).sqrt()
                    + UNCOVERED_BONUS * uncovered_here as f64;
                (relay, weight)
            })
            .collect();
        let total: f64 = candidates.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            break;
        }

        let mut spin = rng.next_f64() * total;
        let mut picked = candidates[candidates.len() - 1].0;
        for (relay, weight) in &candidates {
            spin -= weight;
            if spin <= 0.0 {
                picked = relay;
                break;
            }
        }
        let relay = picked.clone();
        take_relay(&relay, &mut coverage, &mut uncovered, &mut assignments);
        explored += 1;
    }

    let mut orphaned = structural;
    orphaned.extend(uncovered);

    let notes = vec![format!(
        "Hybrid: {} greedy + {explored} exploration picks (ratio {ratio})",
        assignments.relay_count() - explored
    )];

    build_result(
        "Hybrid Greedy+Explore",
        assignments,
        orphaned,
        params,
        &timer,
        notes,
    )
}

fn take_relay(
    relay: &RelayUrl,
    coverage: &mut std::collections::BTreeMap<RelayUrl, BTreeSet<Pubkey>>,
    uncovered: &mut BTreeSet<Pubkey>,
    assignments: &mut AssignmentSet,
) {
    let writers = coverage.remove(relay).unwrap_or_default();
    assignments.touch_relay(relay);
    let newly: Vec<Pubkey> = writers.intersection(uncovered).cloned().collect();
    for pubkey in &newly {
        assignments.assign(relay, pubkey);
        uncovered.remove(pubkey);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::testutil::input_from;

    #[test]
    fn greedy_phase_covers_the_bulk() {
        let input = input_from(&[
            ("pk_1", &["wss://big.example/"]),
            ("pk_2", &["wss://big.example/"]),
            ("pk_3", &["wss://big.example/"]),
            ("pk_4", &["wss://small.example/"]),
        ]);
        let params = AlgorithmParams {
            max_connections: Some(2),
            ..Default::default()
        };
        let result = hybrid_greedy_explore(&input, &params, &mut Mulberry32::new(3));
        assert!(result
            .assignments
            .writers_on("wss://big.example/")
            .is_some_and(|w| w.len() == 3));
        assert!(result.orphaned.is_empty());
    }

    #[test]
    fn exploration_can_pick_zero_gain_relays() {
        // Everything is covered after one greedy pick; with budget 3
        // the exploration slots still open extra connections.
        let input = input_from(&[
            ("pk_1", &["wss://r1.example/", "wss://r2.example/", "wss://r3.example/"]),
        ]);
        let params = AlgorithmParams {
            max_connections: Some(3),
            hybrid_greedy_ratio: Some(0.34),
            ..Default::default()
        };
        let result = hybrid_greedy_explore(&input, &params, &mut Mulberry32::new(5));
        assert_eq!(result.assignments.relay_count(), 3);
        assert_eq!(result.assignments.relay_count_for("pk_1"), 1);
    }

    #[test]
    fn seed_deterministic() {
        let input = input_from(&[
            ("pk_1", &["wss://r1.example/", "wss://r2.example/"]),
            ("pk_2", &["wss://r3.example/", "wss://r4.example/"]),
            ("pk_3", &["wss://r5.example/"]),
        ]);
        let params = AlgorithmParams {
            max_connections: Some(3),
            ..Default::default()
        };
        let a = hybrid_greedy_explore(&input, &params, &mut Mulberry32::new(42));
        let b = hybrid_greedy_explore(&input, &params, &mut Mulberry32::new(42));
        assert_eq!(a.assignments, b.assignments);
    }
}
