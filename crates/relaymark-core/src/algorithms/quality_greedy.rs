//! Quality-weighted greedy cover: the same loop as plain greedy, but
//! the marginal gain of a relay is scaled by its monitor-derived
//! quality score, so a slightly smaller relay with good uptime and RTT
//! can beat a larger flaky one.

use std::collections::{BTreeMap, BTreeSet};

use super::{build_result, relay_coverage, split_coverable, Timer};
use crate::input::BenchmarkInput;
use crate::quality::NEUTRAL_SCORE;
use crate::rng::Mulberry32;
use crate::types::{
    AlgorithmParams, AlgorithmResult, AssignmentSet, Pubkey, RelayUrl,
    DEFAULT_MAX_CONNECTIONS, DEFAULT_QUALITY_WEIGHT,
};

pub fn quality_weighted_greedy(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    _rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let max_connections = params.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);
    let max_relays_per_user = params.max_relays_per_user.unwrap_or(usize::MAX);
    let alpha = params.quality_weight.unwrap_or(DEFAULT_QUALITY_WEIGHT);

    let empty = BTreeMap::new();
    let scores = params.quality_scores.as_ref().unwrap_or(&empty);

    let (mut uncovered, mut orphaned) = split_coverable(input);
    let mut coverage = relay_coverage(input, &uncovered);

    let mut assignments = AssignmentSet::new();
    let mut per_writer: BTreeMap<Pubkey, usize> = BTreeMap::new();
    let mut selected = 0usize;

    while !uncovered.is_empty() && selected < max_connections {
        // gain = marginal * (1 + alpha * quality), neutral 0.5 when the
        // relay was never observed by a monitor.
        let mut best: Option<(&RelayUrl, f64)> = None;
        for (relay, covered) in &coverage {
            let quality = scores.get(relay).copied().unwrap_or(NEUTRAL_SCORE);
            let gain = covered.len() as f64 * (1.0 + alpha * quality);
            if best.is_none_or(|(_, g)| gain > g) {
                best = Some((relay, gain));
            }
        }
        let Some((best_relay, best_gain)) = best else { break };
        if best_gain <= 0.0 {
            break;
        }
        let best_relay = best_relay.clone();

        let Some(covered_by_relay) = coverage.remove(&best_relay) else {
            break;
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

        if !saturated.is_empty() {
            coverage.retain(|_, covered| {
                for pubkey in &saturated {
                    covered.remove(pubkey);
                }
                !covered.is_empty()
            });
        }
    }

    for pubkey in &uncovered {
        if !assignments.is_covered(pubkey) {
            orphaned.insert(pubkey.clone());
        }
    }

    let notes = if scores.is_empty() {
        vec!["No quality data, all relays scored neutral 0.5".to_string()]
    } else {
        let mean: f64 = scores.values().sum::<f64>() / scores.len() as f64;
        vec![format!(
            "Quality scores: {} relays scored, mean {mean:.2}, weight {alpha}",
            scores.len()
        )]
    };

    build_result(
        "NIP-66 Weighted Greedy",
        assignments,
        orphaned,
        params,
        &timer,
        notes,
    )
}
