//! Multi-armed bandit relay selection: each relay is an arm, a pull is
//! including it in a k-set, and the reward is the share of coverable
//! writers only that relay covered in the set. UCB1 balances
//! exploitation of high-reward relays against exploring untried ones.

use std::collections::{BTreeMap, BTreeSet};

use super::{build_result, partial_shuffle, relay_coverage, split_coverable, Timer};
use crate::input::BenchmarkInput;
use crate::rng::Mulberry32;
use crate::types::{
    AlgorithmParams, AlgorithmResult, AssignmentSet, Pubkey, RelayUrl,
    DEFAULT_MAB_EXPLORATION, DEFAULT_MAB_ROUNDS, DEFAULT_MAX_CONNECTIONS,
};

/// Random-initialization rounds are capped so huge relay pools do not
/// starve the UCB phase.
const MAX_INIT_ROUNDS: usize = 50;

pub fn mab_ucb(
    input: &BenchmarkInput,
    params: &AlgorithmParams,
    rng: &mut Mulberry32,
) -> AlgorithmResult {
    let timer = Timer::start();
    let budget = params.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);
    let rounds = params.mab_rounds.unwrap_or(DEFAULT_MAB_ROUNDS);
    let c = params.mab_exploration.unwrap_or(DEFAULT_MAB_EXPLORATION);

    let (coverable, structural) = split_coverable(input);
    let coverage = relay_coverage(input, &coverable);
    let arms: Vec<(&RelayUrl, &BTreeSet<Pubkey>)> = coverage.iter().collect();
    let n = arms.len();
    let total_coverable = coverable.len();

    if budget == 0 || n == 0 || total_coverable == 0 {
        let mut orphaned = structural;
        orphaned.extend(coverable);
        return build_result(
            "MAB-UCB Relay",
            AssignmentSet::new(),
            orphaned,
            params,
            &timer,
            vec!["MAB-UCB: nothing to select (no candidates or coverable writers)".to_string()],
        );
    }

    let k = budget.min(n);
    let init_rounds = n.div_ceil(k).min(MAX_INIT_ROUNDS);

    let mut pulls = vec![0u64; n];
    let mut means = vec![0.0f64; n];
    let mut best_selection: Vec<usize> = Vec::new();
    let mut best_coverage = 0usize;

    let mut play = |selection: &[usize],
                    pulls: &mut [u64],
                    means: &mut [f64],
                    best_selection: &mut Vec<usize>,
                    best_coverage: &mut usize| {
        // Writers covered once in this set reward exactly one arm;
        // writers covered twice reward nobody, which is the signal that
        // penalizes redundant picks.
        let mut hit_count: BTreeMap<&Pubkey, usize> = BTreeMap::new();
        for &idx in selection {
            for pubkey in arms[idx].1 {
                *hit_count.entry(pubkey).or_insert(0) += 1;
            }
        }
        let union = hit_count.len();
        for &idx in selection {
            let unique = arms[idx]
                .1
                .iter()
                .filter(|pk| hit_count.get(pk) == Some(&1))
                .count();
            let reward = unique as f64 / total_coverable as f64;
            pulls[idx] += 1;
            means[idx] += (reward - means[idx]) / pulls[idx] as f64;
        }
        if union > *best_coverage {
            *best_coverage = union;
            *best_selection = selection.to_vec();
        }
    };

    // Random k-sets first so every arm has a chance at a pull.
    let mut indices: Vec<usize> = (0..n).collect();
    for _ in 0..init_rounds {
        partial_shuffle(&mut indices, k, rng);
        let selection: Vec<usize> = indices[..k].to_vec();
        play(
            &selection,
            &mut pulls,
            &mut means,
            &mut best_selection,
            &mut best_coverage,
        );
    }

    for round in 0..rounds {
        let t = (init_rounds * k + round as usize + 1) as f64;
        let mut ranked: Vec<usize> = (0..n).collect();
        ranked.sort_by(|&a, &b| {
            let ua = ucb(means[a], pulls[a], t, c);
            let ub = ucb(means[b], pulls[b], t, c);
            ub.total_cmp(&ua).then_with(|| arms[a].0.cmp(arms[b].0))
        });
        let selection: Vec<usize> = ranked.into_iter().take(k).collect();
        play(
            &selection,
            &mut pulls,
            &mut means,
            &mut best_selection,
            &mut best_coverage,
        );
        if best_coverage == total_coverable {
            break;
        }
    }

    let mut assignments = AssignmentSet::new();
    for &idx in &best_selection {
        let (relay, writers) = arms[idx];
        for pubkey in writers {
            assignments.assign(relay, pubkey);
        }
    }

    let mut orphaned = structural;
    for pubkey in &coverable {
        if !assignments.is_covered(pubkey) {
            orphaned.insert(pubkey.clone());
        }
    }

    let notes = vec![
        format!("MAB-UCB: {init_rounds} init rounds, {rounds} UCB rounds, c={c}"),
        format!(
            "Best coverage: {best_coverage}/{total_coverable} across {} arms",
            n
        ),
    ];

    build_result("MAB-UCB Relay", assignments, orphaned, params, &timer, notes)
}

fn ucb(mean: f64, pulls: u64, t: f64, c: f64) -> f64 {
    if pulls == 0 {
        f64::INFINITY
    } else {
        mean + c * (t.ln() / pulls as f64).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::testutil::input_from;

    #[test]
    fn converges_on_complementary_relays() {
        // {left, right} is the only full cover with budget 2; "decoy"
        // overlaps both halves and rewards poorly.
        let input = input_from(&[
            ("pk_1", &["wss://left.example/", "wss://decoy.example/"]),
            ("pk_2", &["wss://left.example/"]),
            ("pk_3", &["wss://right.example/", "wss://decoy.example/"]),
            ("pk_4", &["wss://right.example/"]),
        ]);
        let params = AlgorithmParams {
            max_connections: Some(2),
            ..Default::default()
        };
        let result = mab_ucb(&input, &params, &mut Mulberry32::new(13));
        assert!(result.orphaned.is_empty());
        assert_eq!(result.assignments.relay_count(), 2);
    }

    #[test]
    fn empty_candidate_pool_short_circuits() {
        let input = input_from(&[("pk_1", &[]), ("pk_2", &[])]);
        let result = mab_ucb(&input, &AlgorithmParams::default(), &mut Mulberry32::new(1));
        assert_eq!(result.assignments.relay_count(), 0);
        assert_eq!(result.orphaned.len(), 2);
        assert!(result.notes[0].contains("nothing to select"));
    }

    #[test]
    fn seed_deterministic() {
        let input = input_from(&[
            ("pk_1", &["wss://r1.example/", "wss://r2.example/"]),
            ("pk_2", &["wss://r2.example/", "wss://r3.example/"]),
            ("pk_3", &["wss://r3.example/"]),
        ]);
        let params = AlgorithmParams {
            max_connections: Some(2),
            mab_rounds: Some(50),
            ..Default::default()
        };
        let a = mab_ucb(&input, &params, &mut Mulberry32::new(6));
        let b = mab_ucb(&input, &params, &mut Mulberry32::new(6));
        assert_eq!(a.assignments, b.assignments);
    }
}
