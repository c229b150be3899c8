//! Log-popularity weighted stochastic selection (Welshman/Coracle
//! style) and its Thompson-Sampling refinement.

use std::collections::BTreeSet;

use super::{build_result, Timer};
use crate::input::BenchmarkInput;
use crate::rng::Mulberry32;
use crate::sampling::sample_beta;
use crate::types::{AlgorithmParams, AlgorithmResult, AssignmentSet, RelayUrl};

/// Per-author: score each declared relay `(1 + ln(weight)) * u` with a
/// fresh uniform draw `u`, keep the top N. `weight` is the relay's
/// global popularity among follows.
pub fn weighted_stochastic(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let limit = params
        .relay_limit
        .or(params.max_relays_per_user)
        .unwrap_or(3);

    let (assignments, orphaned) =
        select_by_score(input, limit, |_relay, weight, rng| {
            (1.0 + weight.ln()) * rng.next_f64()
        }, rng);

    build_result(
        "Weighted Stochastic",
        assignments,
        orphaned,
        params,
        &timer,
        Vec::new(),
    )
}

/// Same structure, but the uniform draw is replaced by a Beta sample
/// from the relay's learned delivery posterior. Cold start (no priors)
/// degenerates to [`weighted_stochastic`].
pub fn welshman_thompson(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let limit = params
        .relay_limit
        .or(params.max_relays_per_user)
        .unwrap_or(3);

    let priors_total = params.relay_priors.as_ref().map_or(0, |m| m.len());
    let mut priors_used = 0usize;

    let (assignments, orphaned) = select_by_score(
        input,
        limit,
        |relay, weight, rng| {
            let has_prior = params
                .relay_priors
                .as_ref()
                .is_some_and(|m| m.contains_key(relay));
            if has_prior {
                priors_used += 1;
            }
            let prior = params.prior_for(relay);
            (1.0 + weight.ln()) * sample_beta(prior.alpha, prior.beta, rng)
        },
        rng,
    );

    let notes = if priors_total > 0 {
        vec![format!(
            "Thompson Sampling: {priors_total} relay priors loaded, {priors_used} prior lookups used"
        )]
    } else {
        vec!["Thompson Sampling: cold start (uniform priors)".to_string()]
    };

    build_result(
        "Welshman+Thompson",
        assignments,
        orphaned,
        params,
        &timer,
        notes,
    )
}

fn select_by_score(
    input: &BenchmarkInput,
    limit: usize,
    mut score: impl FnMut(&RelayUrl, f64, &mut Mulberry32) -> f64,
    rng: &mut Mulberry32,
) -> (AssignmentSet, BTreeSet<String>) {
    let mut assignments = AssignmentSet::new();
    let mut orphaned = BTreeSet::new();

    for pubkey in &input.follows {
        let Some(author_relays) = input.graph.relays_of(pubkey).filter(|r| !r.is_empty())
        else {
            orphaned.insert(pubkey.clone());
            continue;
        };

        let mut scored: Vec<(&RelayUrl, f64)> = author_relays
            .iter()
            .map(|relay| {
                let weight = input
                    .graph
                    .writers_on(relay)
                    .map_or(1.0, |w| w.len() as f64);
                let s = score(relay, weight, rng);
                (relay, s)
            })
            .collect();

        // Score descending, URL ascending on ties.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        for (relay, _) in scored.into_iter().take(limit) {
            assignments.assign(relay, pubkey);
        }
    }

    (assignments, orphaned)
}
