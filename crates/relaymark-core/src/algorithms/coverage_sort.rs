//! One-shot coverage sort (Nostur style): rank relays by popularity
//! once, skip the few most popular, assign down the list without
//! recalculating marginal coverage.

use std::collections::{BTreeMap, BTreeSet};

use super::{build_result, Timer};
use crate::input::BenchmarkInput;
use crate::rng::Mulberry32;
use crate::types::{
    AlgorithmParams, AlgorithmResult, AssignmentSet, Pubkey, RelayUrl,
    DEFAULT_SKIP_TOP_RELAYS,
};

pub fn greedy_coverage_sort(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    _rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let skip_top = params.skip_top_relays.unwrap_or(DEFAULT_SKIP_TOP_RELAYS);
    let max_relays_per_user = params.max_relays_per_user.unwrap_or(2);
    let max_connections = params.max_connections.unwrap_or(usize::MAX);

    // Popularity descending, URL ascending on ties.
    let mut sorted_relays: Vec<(&RelayUrl, &BTreeSet<Pubkey>)> =
        input.graph.relay_map().iter().collect();
    sorted_relays.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));

    let follows: BTreeSet<&Pubkey> = input.follows.iter().collect();
    let mut per_writer: BTreeMap<&Pubkey, usize> = BTreeMap::new();
    let mut assignments = AssignmentSet::new();
    let mut selected = 0usize;

    for (relay, writers) in sorted_relays.into_iter().skip(skip_top) {
        if selected >= max_connections {
            break;
        }
        let mut assigned_any = false;
        for pubkey in writers {
            if !follows.contains(pubkey) {
                continue;
            }
            let count = per_writer.entry(pubkey).or_insert(0);
            if *count >= max_relays_per_user {
                continue;
            }
            assignments.assign(relay, pubkey);
            *count += 1;
            assigned_any = true;
        }
        if assigned_any {
            selected += 1;
        }
    }

    let mut orphaned = BTreeSet::new();
    for pubkey in &input.follows {
        if !assignments.is_covered(pubkey) {
            orphaned.insert(pubkey.clone());
        }
    }

    build_result(
        "Greedy Coverage Sort",
        assignments,
        orphaned,
        params,
        &timer,
        Vec::new(),
    )
}
