//! Weighted bipartite matching heuristic: writers with few declared
//! relays weigh more, so relays carrying hard-to-place writers win
//! selection rounds over merely popular ones.

use std::collections::BTreeMap;

use super::{build_result, relay_coverage, split_coverable, Timer};
use crate::input::BenchmarkInput;
use crate::rng::Mulberry32;
use crate::types::{
    AlgorithmParams, AlgorithmResult, AssignmentSet, Pubkey, RelayUrl,
    DEFAULT_MAX_CONNECTIONS,
};

pub fn bipartite_matching(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    _rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let budget = params.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);

    let (coverable, structural) = split_coverable(input);
    let mut coverage = relay_coverage(input, &coverable);

    // A writer declaring one relay carries weight 1.0; a writer on ten
    // relays contributes 0.1 to each. Scarcity is what matters.
    let weights: BTreeMap<Pubkey, f64> = coverable
        .iter()
        .map(|pubkey| {
            let declared = input
                .graph
                .relays_of(pubkey)
                .map_or(1, |relays| relays.len().max(1));
            (pubkey.clone(), 1.0 / declared as f64)
        })
        .collect();

    let mut assignments = AssignmentSet::new();
    let mut uncovered = coverable;

    while assignments.relay_count() < budget && !uncovered.is_empty() {
        let mut best: Option<(&RelayUrl, f64)> = None;
        for (relay, writers) in &coverage {
            let score: f64 = writers
                .intersection(&uncovered)
                .map(|pk| weights[pk])
                .sum();
            let better = match best {
                None => score > 0.0,
                Some((best_relay, best_score)) => {
                    score > best_score || (score == best_score && relay < best_relay)
                }
            };
            if better {
                best = Some((relay, score));
            }
        }
        let Some((relay, _)) = best else { break };
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

    build_result(
        "Bipartite Matching",
        assignments,
        orphaned,
        params,
        &timer,
        Vec::new(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::testutil::input_from;

    #[test]
    fn scarce_writers_outweigh_popularity() {
        // "niche" carries two writers with no other relay (weight 1.0
        // each); "pop" carries three writers who all have alternatives
        // (weight 1/2 each). niche must be selected first.
        let input = input_from(&[
            ("pk_n1", &["wss://niche.example/"]),
            ("pk_n2", &["wss://niche.example/"]),
            ("pk_p1", &["wss://pop.example/", "wss://alt.example/"]),
            ("pk_p2", &["wss://pop.example/", "wss://alt.example/"]),
            ("pk_p3", &["wss://pop.example/", "wss://alt.example/"]),
        ]);
        let params = AlgorithmParams {
            max_connections: Some(1),
            ..Default::default()
        };
        let result = bipartite_matching(&input, &params, &mut Mulberry32::new(1));
        assert!(result.assignments.writers_on("wss://niche.example/").is_some());
        assert!(result.assignments.writers_on("wss://pop.example/").is_none());
    }

    #[test]
    fn stops_when_nothing_left_to_gain() {
        let input = input_from(&[("pk_a", &["wss://r1.example/", "wss://r2.example/"])]);
        let result = bipartite_matching(
            &input,
            &AlgorithmParams::default(),
            &mut Mulberry32::new(1),
        );
        // Second relay has zero marginal weight after the first covers
        // pk_a.
        assert_eq!(result.assignments.relay_count(), 1);
        assert!(result.orphaned.is_empty());
    }

    #[test]
    fn url_breaks_weight_ties() {
        let input = input_from(&[
            ("pk_a", &["wss://a.example/", "wss://b.example/"]),
        ]);
        let params = AlgorithmParams {
            max_connections: Some(1),
            ..Default::default()
        };
        let result = bipartite_matching(&input, &params, &mut Mulberry32::new(1));
        assert!(result.assignments.writers_on("wss://a.example/").is_some());
    }
}
