//! Stochastic greedy set cover (Mirzasoleiman et al.): each round
//! evaluates a random sample of the remaining relays instead of all of
//! them, trading a (1 - 1/e - epsilon) guarantee for near-linear time.

use std::collections::BTreeSet;

use super::{build_result, partial_shuffle, relay_coverage, split_coverable, Timer};
use crate::input::BenchmarkInput;
use crate::rng::Mulberry32;
use crate::types::{
    AlgorithmParams, AlgorithmResult, AssignmentSet, Pubkey, RelayUrl,
    DEFAULT_MAX_CONNECTIONS, DEFAULT_STOCHASTIC_EPSILON,
};

pub fn stochastic_greedy(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let budget = params.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);
    let epsilon = params.epsilon.unwrap_or(DEFAULT_STOCHASTIC_EPSILON);

    let (coverable, structural) = split_coverable(input);
    let mut coverage = relay_coverage(input, &coverable);

    let n = coverage.len();
    let sample_size = if budget == 0 || n == 0 {
        0
    } else {
        let ideal = (n as f64 / budget as f64) * (1.0 / epsilon).ln();
        (ideal.ceil() as usize).max(1)
    };

    let mut assignments = AssignmentSet::new();
    let mut uncovered = coverable;

    while assignments.relay_count() < budget && !uncovered.is_empty() && !coverage.is_empty()
    {
        let mut candidates: Vec<&RelayUrl> = coverage.keys().collect();
        let picks = sample_size.min(candidates.len());
        partial_shuffle(&mut candidates, picks, rng);

        // Best marginal in the sample, ascending URL on ties.
        let mut best: Option<(&RelayUrl, usize)> = None;
        for relay in candidates.into_iter().take(picks) {
            let gain = coverage[relay].intersection(&uncovered).count();
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
        let Some((relay, _)) = best else {
            // The whole sample was useless; resample next round unless
            // nothing can still gain.
            let any_gain = coverage
                .values()
                .any(|writers| writers.intersection(&uncovered).next().is_some());
            if !any_gain {
                break;
            }
            continue;
        };
        let relay = relay.clone();

        let newly: Vec<Pubkey> = coverage[&relay]
            .intersection(&uncovered)
            .cloned()
            .collect();
        for pubkey in &newly {
            assignments.assign(&relay, pubkey);
            uncovered.remove(pubkey);
        }
        coverage.remove(&relay);
    }

    let mut orphaned = structural;
    orphaned.extend(uncovered);

    let notes = vec![format!(
        "Stochastic greedy: sample size {sample_size} of {n} relays per round (epsilon={epsilon})"
    )];

    build_result(
        "Stochastic Greedy",
        assignments,
        orphaned,
        params,
        &timer,
        notes,
    )
}
