//! Baseline strategies: upper bounds, fixed-relay shortcuts, and the
//! broadcast behavior of clients that skip outbox routing entirely.
//!
//! The broadcast family assigns writers to relays they never declared.
//! That is the point: Phase 2 measures what those relays actually hold.

use std::collections::BTreeSet;

use super::{build_result, partial_shuffle, Timer};
use crate::input::BenchmarkInput;
use crate::rng::Mulberry32;
use crate::sampling::sample_beta;
use crate::types::{AlgorithmParams, AlgorithmResult, AssignmentSet, RelayUrl};

/// Caching aggregator relay used by the aggregator baseline.
pub const AGGREGATOR_RELAY: &str = "wss://relay.primal.net";

/// The two biggest general-purpose relays.
pub const BIG_RELAYS: [&str; 2] = ["wss://relay.damus.io", "wss://nos.lol"];

/// Hardcoded app relays broadcast clients query for every feed.
pub const APP_RELAYS: [&str; 4] = [
    "wss://relay.ditto.pub",
    "wss://relay.primal.net",
    "wss://relay.damus.io",
    "wss://nos.lol",
];

/// Use every declared write relay. Unoptimized coverage upper bound.
pub fn direct_mapping(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    _rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let mut assignments = AssignmentSet::new();
    let mut orphaned = BTreeSet::new();

    for pubkey in &input.follows {
        let Some(relays) = input.graph.relays_of(pubkey).filter(|r| !r.is_empty()) else {
            orphaned.insert(pubkey.clone());
            continue;
        };
        for relay in relays {
            assignments.assign(relay, pubkey);
        }
    }

    build_result(
        "Direct Mapping",
        assignments,
        orphaned,
        params,
        &timer,
        Vec::new(),
    )
}

/// Route every author, relay list or not, to one caching aggregator.
/// The aggregator sees most of the network, so even writers without
/// declarations stay assigned rather than orphaned.
pub fn aggregator_baseline(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    _rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let mut assignments = AssignmentSet::new();
    assignments.touch_relay(AGGREGATOR_RELAY);

    for pubkey in &input.follows {
        assignments.assign(AGGREGATOR_RELAY, pubkey);
    }

    build_result(
        "Primal Aggregator",
        assignments,
        BTreeSet::new(),
        params,
        &timer,
        Vec::new(),
    )
}

/// Assign follows only to the two biggest relays, and only when they
/// declared them. Everyone else is orphaned.
pub fn big_relays_baseline(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    _rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let mut assignments = AssignmentSet::new();
    let mut orphaned = BTreeSet::new();

    // Declarations may or may not carry the trailing slash.
    let big: BTreeSet<String> = BIG_RELAYS
        .iter()
        .flat_map(|url| [url.to_string(), format!("{url}/")])
        .collect();

    for pubkey in &input.follows {
        let Some(relays) = input.graph.relays_of(pubkey).filter(|r| !r.is_empty()) else {
            orphaned.insert(pubkey.clone());
            continue;
        };
        let mut matched = false;
        for relay in relays {
            if big.contains(relay) {
                assignments.assign(relay, pubkey);
                matched = true;
            }
        }
        if !matched {
            orphaned.insert(pubkey.clone());
        }
    }

    build_result(
        "Big Relays (damus+nos.lol)",
        assignments,
        orphaned,
        params,
        &timer,
        Vec::new(),
    )
}

/// Broadcast every author to the four hardcoded app relays. No routing,
/// no orphans; mirrors feed behavior of broadcast clients.
pub fn broadcast_baseline(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    _rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let mut assignments = AssignmentSet::new();

    for relay in APP_RELAYS {
        assignments.touch_relay(relay);
        for pubkey in &input.follows {
            assignments.assign(relay, pubkey);
        }
    }

    let notes = vec![
        format!(
            "Broadcast: {} authors x {} relays",
            input.follows.len(),
            APP_RELAYS.len()
        ),
        "No per-author routing".to_string(),
    ];

    build_result(
        "Ditto-Mew (4 app relays)",
        assignments,
        BTreeSet::new(),
        params,
        &timer,
        notes,
    )
}

/// The broadcast app relays plus, per author, up to `write_limit` of
/// their declared write relays ranked by Thompson-sampled delivery
/// scores. Models the profile-lookup path of a broadcast client with
/// outbox routing bolted on.
pub fn broadcast_outbox_thompson(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let write_limit = params.write_limit.unwrap_or(3);

    let mut assignments = AssignmentSet::new();
    let app_set: BTreeSet<&str> = APP_RELAYS.into();
    let priors_total = params.relay_priors.as_ref().map_or(0, |m| m.len());
    let mut priors_used = 0usize;
    let mut authors_with_outbox = 0usize;

    for relay in APP_RELAYS {
        assignments.touch_relay(relay);
    }

    for pubkey in &input.follows {
        for relay in APP_RELAYS {
            assignments.assign(relay, pubkey);
        }

        let Some(author_relays) = input.graph.relays_of(pubkey).filter(|r| !r.is_empty())
        else {
            continue;
        };

        let mut scored: Vec<(&RelayUrl, f64)> = author_relays
            .iter()
            .filter(|relay| !app_set.contains(relay.as_str()))
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

        if scored.is_empty() {
            continue;
        }
        authors_with_outbox += 1;

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        for (relay, _) in scored.into_iter().take(write_limit) {
            assignments.assign(relay, pubkey);
        }
    }

    let mut notes = vec![
        format!(
            "App relays: {} (broadcast to all {} authors)",
            APP_RELAYS.len(),
            input.follows.len()
        ),
        format!(
            "Outbox: {authors_with_outbox}/{} authors got additional write relays (top {write_limit})",
            input.follows.len()
        ),
    ];
    if priors_total > 0 {
        notes.push(format!(
            "Thompson Sampling: {priors_total} relay priors loaded, {priors_used} prior lookups used"
        ));
    } else {
        notes.push("Thompson Sampling: cold start (uniform priors)".to_string());
    }

    build_result(
        "Ditto+Outbox Thompson",
        assignments,
        BTreeSet::new(),
        params,
        &timer,
        notes,
    )
}

/// The two big relays for everyone, plus two random picks from each
/// author's declared relays for diversity.
pub fn popular_plus_random(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let mut assignments = AssignmentSet::new();

    for pubkey in &input.follows {
        for relay in BIG_RELAYS {
            assignments.assign(relay, pubkey);
        }

        let Some(declared) = input.graph.relays_of(pubkey).filter(|r| !r.is_empty())
        else {
            continue;
        };

        let mut candidates: Vec<&RelayUrl> = declared
            .iter()
            .filter(|r| !BIG_RELAYS.contains(&r.as_str()))
            .collect();
        let picks = candidates.len().min(2);
        partial_shuffle(&mut candidates, picks, rng);
        for relay in candidates.into_iter().take(picks) {
            assignments.assign(relay, pubkey);
        }
    }

    build_result(
        "Popular+Random",
        assignments,
        BTreeSet::new(),
        params,
        &timer,
        Vec::new(),
    )
}
