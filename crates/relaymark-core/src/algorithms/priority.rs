//! Priority-based per-author selection (NDK style).

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use super::{build_result, Timer};
use crate::input::BenchmarkInput;
use crate::rng::Mulberry32;
use crate::types::{AlgorithmParams, AlgorithmResult, AssignmentSet, RelayUrl};

/// Per-author assignment favoring connection reuse: relays already
/// selected for earlier authors rank first, then global popularity,
/// then ascending URL. Authors are visited in sorted pubkey order.
pub fn priority_based(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    _rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let goal = params
        .relay_goal_per_author
        .or(params.max_relays_per_user)
        .unwrap_or(2);
    let max_connections = params.max_connections.unwrap_or(usize::MAX);

    let mut assignments = AssignmentSet::new();
    let mut orphaned = BTreeSet::new();
    let mut selected_relays: BTreeSet<RelayUrl> = BTreeSet::new();

    let popularity: BTreeMap<&RelayUrl, usize> = input
        .graph
        .relay_map()
        .iter()
        .map(|(relay, writers)| (relay, writers.len()))
        .collect();

    let mut sorted_follows = input.follows.clone();
    sorted_follows.sort();

    for pubkey in &sorted_follows {
        let Some(author_relays) = input.graph.relays_of(pubkey).filter(|r| !r.is_empty())
        else {
            orphaned.insert(pubkey.clone());
            continue;
        };

        let mut candidates: Vec<&RelayUrl> = author_relays.iter().collect();
        candidates.sort_by(|a, b| {
            let a_selected = selected_relays.contains(*a);
            let b_selected = selected_relays.contains(*b);
            match b_selected.cmp(&a_selected) {
                Ordering::Equal => {}
                other => return other,
            }
            let a_pop = popularity.get(a).copied().unwrap_or(0);
            let b_pop = popularity.get(b).copied().unwrap_or(0);
            b_pop.cmp(&a_pop).then_with(|| a.cmp(b))
        });

        let mut assigned = 0usize;
        for relay in candidates {
            if assigned >= goal {
                break;
            }
            // A new relay cannot be opened past the connection cap.
            if !selected_relays.contains(relay) && selected_relays.len() >= max_connections
            {
                continue;
            }
            selected_relays.insert(relay.clone());
            assignments.assign(relay, pubkey);
            assigned += 1;
        }

        if assigned == 0 {
            orphaned.insert(pubkey.clone());
        }
    }

    build_result(
        "Priority-Based (NDK)",
        assignments,
        orphaned,
        params,
        &timer,
        Vec::new(),
    )
}
