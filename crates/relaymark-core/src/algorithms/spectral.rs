//! Cluster-then-cover selection. Label propagation over the relay
//! co-declaration graph (edge weight = shared writers) approximates the
//! spectral communities; phase one picks a representative per cluster
//! for diversity, phase two fills the remaining budget greedily.

use std::collections::{BTreeMap, BTreeSet};

use super::{build_result, partial_shuffle, relay_coverage, split_coverable, Timer};
use crate::input::BenchmarkInput;
use crate::rng::Mulberry32;
use crate::types::{
    AlgorithmParams, AlgorithmResult, AssignmentSet, Pubkey, RelayUrl,
    DEFAULT_MAX_CONNECTIONS,
};

const MAX_PROPAGATION_ITERS: usize = 20;

pub fn spectral_clustering(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let budget = params.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);

    let (coverable, structural) = split_coverable(input);
    let coverage = relay_coverage(input, &coverable);
    let relays: Vec<(&RelayUrl, &BTreeSet<Pubkey>)> = coverage.iter().collect();
    let n = relays.len();

    let mut assignments = AssignmentSet::new();
    let mut notes = Vec::new();

    if n <= budget {
        // Fewer candidates than slots: clustering buys nothing.
        for (relay, writers) in &relays {
            for pubkey in *writers {
                assignments.assign(relay, pubkey);
            }
        }
        notes.push(format!("All {n} relays fit the budget, no clustering needed"));
    } else {
        let (labels, iters) = propagate_labels(&relays, &coverable, input, rng);

        // Clusters ranked by the coverage they collectively reach.
        let mut clusters: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (idx, label) in labels.iter().enumerate() {
            clusters.entry(*label).or_default().push(idx);
        }
        let mut ranked: Vec<Vec<usize>> = clusters.into_values().collect();
        ranked.sort_by_key(|members| {
            let mut union: BTreeSet<&Pubkey> = BTreeSet::new();
            for &idx in members {
                union.extend(relays[idx].1.iter());
            }
            std::cmp::Reverse(union.len())
        });
        notes.push(format!(
            "Label propagation: {} clusters after {iters} iterations",
            ranked.len()
        ));

        let mut covered: BTreeSet<&Pubkey> = BTreeSet::new();
        let mut selected: BTreeSet<usize> = BTreeSet::new();

        // Phase 1: best representative of each cluster, while slots last.
        for members in &ranked {
            if selected.len() >= budget {
                break;
            }
            let rep = members
                .iter()
                .copied()
                .map(|idx| {
                    let gain = relays[idx].1.iter().filter(|pk| !covered.contains(pk)).count();
                    (idx, gain)
                })
                .filter(|(_, gain)| *gain > 0)
                .max_by(|a, b| a.1.cmp(&b.1).then_with(|| relays[b.0].0.cmp(relays[a.0].0)));
            if let Some((idx, _)) = rep {
                selected.insert(idx);
                covered.extend(relays[idx].1.iter());
            }
        }

        // Phase 2: plain greedy over everything left.
        while selected.len() < budget {
            let best = (0..n)
                .filter(|idx| !selected.contains(idx))
                .map(|idx| {
                    let gain = relays[idx].1.iter().filter(|pk| !covered.contains(pk)).count();
                    (idx, gain)
                })
                .filter(|(_, gain)| *gain > 0)
                .max_by(|a, b| a.1.cmp(&b.1).then_with(|| relays[b.0].0.cmp(relays[a.0].0)));
            let Some((idx, _)) = best else { break };
            selected.insert(idx);
            covered.extend(relays[idx].1.iter());
        }

        for idx in selected {
            let (relay, writers) = relays[idx];
            for pubkey in writers {
                assignments.assign(relay, pubkey);
            }
        }
    }

    let mut orphaned = structural;
    for pubkey in &coverable {
        if !assignments.is_covered(pubkey) {
            orphaned.insert(pubkey.clone());
        }
    }

    build_result(
        "Spectral Clustering",
        assignments,
        orphaned,
        params,
        &timer,
        notes,
    )
}

/// Synchronous-ish label propagation: every relay adopts the label with
/// the highest total edge weight among its neighbors, visiting relays
/// in a fresh random order each iteration. Ties go to the smaller
/// label, which keeps the fixpoint stable.
fn propagate_labels(
    relays: &[(&RelayUrl, &BTreeSet<Pubkey>)],
    coverable: &BTreeSet<Pubkey>,
    input: &BenchmarkInput,
    rng: &mut Mulberry32,
) -> (Vec<usize>, usize) {
    let n = relays.len();
    let index_of: BTreeMap<&RelayUrl, usize> = relays
        .iter()
        .enumerate()
        .map(|(i, (relay, _))| (*relay, i))
        .collect();

    // Edge weight = number of writers declaring both relays.
    let mut neighbors: Vec<BTreeMap<usize, usize>> = vec![BTreeMap::new(); n];
    for pubkey in coverable {
        let Some(declared) = input.graph.relays_of(pubkey) else {
            continue;
        };
        let ids: Vec<usize> = declared
            .iter()
            .filter_map(|relay| index_of.get(relay).copied())
            .collect();
        for (a, &i) in ids.iter().enumerate() {
            for &j in &ids[a + 1..] {
                *neighbors[i].entry(j).or_insert(0) += 1;
                *neighbors[j].entry(i).or_insert(0) += 1;
            }
        }
    }

    let mut labels: Vec<usize> = (0..n).collect();
    let mut order: Vec<usize> = (0..n).collect();
    let mut iters = 0;

    for _ in 0..MAX_PROPAGATION_ITERS {
        iters += 1;
        partial_shuffle(&mut order, n, rng);
        let mut changed = false;
        for &i in &order {
            if neighbors[i].is_empty() {
                continue;
            }
            let mut weight_by_label: BTreeMap<usize, usize> = BTreeMap::new();
            for (&j, &w) in &neighbors[i] {
                *weight_by_label.entry(labels[j]).or_insert(0) += w;
            }
            // Max weight, smaller label on ties (BTreeMap order makes
            // the first maximum the smallest label).
            let best = weight_by_label
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
                .map(|(label, _)| *label);
            if let Some(label) = best {
                if label != labels[i] {
                    labels[i] = label;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    (labels, iters)
}
