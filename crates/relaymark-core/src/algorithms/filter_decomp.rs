//! Filter decomposition (rust-nostr style): purely per-author relay
//! picks with no global view, plus its Thompson-Sampling refinement.

use std::collections::BTreeSet;

use super::{build_result, Timer};
use crate::input::BenchmarkInput;
use crate::rng::Mulberry32;
use crate::sampling::sample_beta;
use crate::types::{AlgorithmParams, AlgorithmResult, AssignmentSet, RelayUrl};

/// Per-author: first N declared write relays in ascending URL order.
pub fn filter_decomposition(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    _rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let write_limit = params.write_limit.unwrap_or(3);

    let mut assignments = AssignmentSet::new();
    let mut orphaned = BTreeSet::new();

    for pubkey in &input.follows {
        let Some(author_relays) = input.graph.relays_of(pubkey).filter(|r| !r.is_empty())
        else {
            orphaned.insert(pubkey.clone());
            continue;
        };
        // BTreeSet iteration is already ascending lexicographic.
        for relay in author_relays.iter().take(write_limit) {
            assignments.assign(relay, pubkey);
        }
    }

    build_result(
        "Filter Decomposition",
        assignments,
        orphaned,
        params,
        &timer,
        Vec::new(),
    )
}

/// Same per-author structure, ranked by pure Beta-sampled delivery
/// scores instead of URL order. Unlike the Welshman variant there is no
/// popularity weight, so learning is not biased toward high-volume
/// relays that prune aggressively.
pub fn fd_thompson(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let write_limit = params.write_limit.or(params.relay_limit).unwrap_or(3);

    let priors_total = params.relay_priors.as_ref().map_or(0, |m| m.len());
    let mut priors_used = 0usize;

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
                if params
                    .relay_priors
                    .as_ref()
                    .is_some_and(|m| m.contains_key(relay))
                {
                    priors_used += 1;
                }
                let prior = params.prior_for(relay);
                (relay, sample_beta(prior.alpha, prior.beta, rng))
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        for (relay, _) in scored.into_iter().take(write_limit) {
            assignments.assign(relay, pubkey);
        }
    }

    let notes = if priors_total > 0 {
        vec![format!(
            "FD+Thompson: {priors_total} relay priors loaded, {priors_used} prior lookups used"
        )]
    } else {
        vec!["FD+Thompson: cold start (uniform priors)".to_string()]
    };

    build_result("FD+Thompson", assignments, orphaned, params, &timer, notes)
}
