//! Streaming coverage: one pass over the relays in random order,
//! keeping a fixed-size buffer and swapping a member out whenever the
//! incoming relay improves total buffer coverage. Models selection
//! under memory pressure where relays arrive as a stream.

use std::collections::BTreeSet;

use super::{build_result, partial_shuffle, relay_coverage, split_coverable, Timer};
use crate::input::BenchmarkInput;
use crate::rng::Mulberry32;
use crate::types::{
    AlgorithmParams, AlgorithmResult, AssignmentSet, Pubkey, RelayUrl,
    DEFAULT_MAX_CONNECTIONS,
};

pub fn streaming_coverage(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let budget = params.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);

    let (coverable, structural) = split_coverable(input);
    let coverage = relay_coverage(input, &coverable);
    let mut stream: Vec<(&RelayUrl, &BTreeSet<Pubkey>)> = coverage.iter().collect();
    let n = stream.len();
    partial_shuffle(&mut stream, n, rng);

    let split = budget.min(n);
    let mut buffer: Vec<(&RelayUrl, &BTreeSet<Pubkey>)> = stream[..split].to_vec();
    let mut swaps = 0usize;

    for incoming in &stream[split..] {
        let current = union_count(&buffer);
        // Replace the member whose loss the incoming relay best makes
        // up for, but only when the buffer as a whole gains.
        let mut best: Option<(usize, usize)> = None;
        for i in 0..buffer.len() {
            let evicted = std::mem::replace(&mut buffer[i], *incoming);
            let candidate = union_count(&buffer);
            buffer[i] = evicted;
            if candidate > current && best.is_none_or(|(_, c)| candidate > c) {
                best = Some((i, candidate));
            }
        }
        if let Some((i, _)) = best {
            buffer[i] = *incoming;
            swaps += 1;
        }
    }

    let mut assignments = AssignmentSet::new();
    for (relay, writers) in &buffer {
        for pubkey in *writers {
            assignments.assign(relay, pubkey);
        }
    }

    let mut orphaned = structural;
    for pubkey in &coverable {
        if !assignments.is_covered(pubkey) {
            orphaned.insert(pubkey.clone());
        }
    }

    let notes = vec![format!(
        "Streaming: {swaps} swaps over {n} relays (buffer {split})"
    )];

    build_result(
        "Streaming Coverage",
        assignments,
        orphaned,
        params,
        &timer,
        notes,
    )
}

fn union_count(buffer: &[(&RelayUrl, &BTreeSet<Pubkey>)]) -> usize {
    let mut union: BTreeSet<&Pubkey> = BTreeSet::new();
    for (_, writers) in buffer {
        union.extend(writers.iter());
    }
    union.len()
}
