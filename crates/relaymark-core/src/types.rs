//! Shared types for algorithm runs: tuning parameters, the dual
//! assignment relation, and the per-run result record.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Hex-encoded author public key. Treated as an opaque identifier.
pub type Pubkey = String;

/// Normalized `wss://` relay URL.
pub type RelayUrl = String;

/// Default cap on simultaneously selected relays.
pub const DEFAULT_MAX_CONNECTIONS: usize = 20;

/// Default redundancy target: relays per covered author.
pub const DEFAULT_TARGET_PER_AUTHOR: usize = 2;

/// Default exploration rate for the ε-greedy variant.
pub const DEFAULT_EPSILON: f64 = 0.05;

/// Sample-size parameter for stochastic greedy (probability of missing
/// the best marginal element per round).
pub const DEFAULT_STOCHASTIC_EPSILON: f64 = 0.1;

/// Wall-clock budget for the branch-and-bound exact solver.
pub const DEFAULT_ILP_TIME_LIMIT_MS: u64 = 3000;

/// Rounds of UCB1 simulation in the bandit selector.
pub const DEFAULT_MAB_ROUNDS: u32 = 500;

/// UCB1 exploration constant.
pub const DEFAULT_MAB_EXPLORATION: f64 = 2.0;

/// Fraction of the budget the hybrid selector fills greedily before
/// switching to anti-popularity exploration.
pub const DEFAULT_HYBRID_GREEDY_RATIO: f64 = 0.7;

/// Multiplier applied to the quality score in quality-weighted gain.
pub const DEFAULT_QUALITY_WEIGHT: f64 = 0.5;

/// How many of the most popular relays the coverage-sort strategy skips.
pub const DEFAULT_SKIP_TOP_RELAYS: usize = 3;

/// Beta-distribution posterior for one relay's delivery reliability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BetaPrior {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for BetaPrior {
    /// Uninformed prior: Beta(1, 1), i.e. uniform.
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }
}

impl BetaPrior {
    /// Posterior mean.
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }
}

/// Tuning knobs accepted by every algorithm. All fields are optional;
/// unset fields fall back to the registry entry's defaults and finally
/// to the `DEFAULT_*` constants in this module.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlgorithmParams {
    /// Hard cap on selected relays.
    pub max_connections: Option<usize>,
    /// Per-author cap on assigned relays.
    pub max_relays_per_user: Option<usize>,
    /// Desired redundancy per author (soft goal).
    pub relay_goal_per_author: Option<usize>,
    /// Client-style relay limit (some ported strategies use this name).
    pub relay_limit: Option<usize>,
    /// Write-relay limit (outbox-model strategies).
    pub write_limit: Option<usize>,
    /// Seed for the per-run RNG.
    pub seed: Option<u32>,
    /// Learned Beta posteriors per relay, for Thompson variants.
    pub relay_priors: Option<BTreeMap<RelayUrl, BetaPrior>>,
    /// Precomputed quality scores per relay in [0, 1], for the
    /// quality-weighted strategy. Built by [`crate::quality::score_all`].
    pub quality_scores: Option<BTreeMap<RelayUrl, f64>>,
    /// ε for the ε-greedy variant.
    pub epsilon: Option<f64>,
    /// Wall-clock budget for the exact solver.
    pub ilp_time_limit_ms: Option<u64>,
    /// Simulation rounds for the bandit selector.
    pub mab_rounds: Option<u32>,
    /// UCB1 exploration constant.
    pub mab_exploration: Option<f64>,
    /// Greedy fraction for the hybrid selector.
    pub hybrid_greedy_ratio: Option<f64>,
    /// Quality multiplier for quality-weighted gain.
    pub quality_weight: Option<f64>,
    /// Popular relays skipped by the coverage-sort strategy.
    pub skip_top_relays: Option<usize>,
}

impl AlgorithmParams {
    /// Overlay `self` on top of `defaults`: set fields win, unset fields
    /// inherit.
    pub fn merged_over(&self, defaults: &AlgorithmParams) -> AlgorithmParams {
        macro_rules! pick {
            ($field:ident) => {
                self.$field.clone().or_else(|| defaults.$field.clone())
            };
        }
        AlgorithmParams {
            max_connections: pick!(max_connections),
            max_relays_per_user: pick!(max_relays_per_user),
            relay_goal_per_author: pick!(relay_goal_per_author),
            relay_limit: pick!(relay_limit),
            write_limit: pick!(write_limit),
            seed: pick!(seed),
            relay_priors: pick!(relay_priors),
            quality_scores: pick!(quality_scores),
            epsilon: pick!(epsilon),
            ilp_time_limit_ms: pick!(ilp_time_limit_ms),
            mab_rounds: pick!(mab_rounds),
            mab_exploration: pick!(mab_exploration),
            hybrid_greedy_ratio: pick!(hybrid_greedy_ratio),
            quality_weight: pick!(quality_weight),
            skip_top_relays: pick!(skip_top_relays),
        }
    }

    /// Connection budget with the default applied.
    pub fn connection_budget(&self) -> usize {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    /// Redundancy target per author. First set field wins, in the order
    /// the ported client strategies expect.
    pub fn target_per_author(&self) -> usize {
        self.relay_goal_per_author
            .or(self.max_relays_per_user)
            .or(self.relay_limit)
            .or(self.write_limit)
            .unwrap_or(DEFAULT_TARGET_PER_AUTHOR)
    }

    /// Thompson prior for one relay, uniform when unlearned.
    pub fn prior_for(&self, relay: &str) -> BetaPrior {
        self.relay_priors
            .as_ref()
            .and_then(|m| m.get(relay).copied())
            .unwrap_or_default()
    }
}

/// The relay→writers / writer→relays assignment relation. Both
/// directions live behind one type and every mutation goes through
/// [`AssignmentSet::assign`], so the duals cannot drift apart.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssignmentSet {
    relay_to_writers: BTreeMap<RelayUrl, BTreeSet<Pubkey>>,
    writer_to_relays: BTreeMap<Pubkey, BTreeSet<RelayUrl>>,
}

impl AssignmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `writer`'s content is expected on `relay`. Returns
    /// false if the pair was already present.
    pub fn assign(&mut self, relay: &str, writer: &str) -> bool {
        let inserted = self
            .relay_to_writers
            .entry(relay.to_string())
            .or_default()
            .insert(writer.to_string());
        if inserted {
            self.writer_to_relays
                .entry(writer.to_string())
                .or_default()
                .insert(relay.to_string());
        }
        inserted
    }

    /// Pre-register a relay with no writers yet. Broadcast baselines use
    /// this so empty relays still count against the budget.
    pub fn touch_relay(&mut self, relay: &str) {
        self.relay_to_writers.entry(relay.to_string()).or_default();
    }

    pub fn relay_to_writers(&self) -> &BTreeMap<RelayUrl, BTreeSet<Pubkey>> {
        &self.relay_to_writers
    }

    pub fn writer_to_relays(&self) -> &BTreeMap<Pubkey, BTreeSet<RelayUrl>> {
        &self.writer_to_relays
    }

    pub fn relay_count(&self) -> usize {
        self.relay_to_writers.len()
    }

    pub fn is_covered(&self, writer: &str) -> bool {
        self.writer_to_relays
            .get(writer)
            .is_some_and(|r| !r.is_empty())
    }

    pub fn relays_for(&self, writer: &str) -> Option<&BTreeSet<RelayUrl>> {
        self.writer_to_relays.get(writer)
    }

    pub fn writers_on(&self, relay: &str) -> Option<&BTreeSet<Pubkey>> {
        self.relay_to_writers.get(relay)
    }

    /// Number of relays already assigned to `writer`.
    pub fn relay_count_for(&self, writer: &str) -> usize {
        self.writer_to_relays.get(writer).map_or(0, BTreeSet::len)
    }

    /// Drop every relay except those in `keep`, then rebuild the writer
    /// direction from what remains.
    pub fn retain_relays(&mut self, keep: &BTreeSet<RelayUrl>) {
        self.relay_to_writers.retain(|url, _| keep.contains(url));
        self.writer_to_relays.clear();
        let pairs: Vec<(RelayUrl, Pubkey)> = self
            .relay_to_writers
            .iter()
            .flat_map(|(url, writers)| {
                writers.iter().map(move |w| (url.clone(), w.clone()))
            })
            .collect();
        for (url, writer) in pairs {
            self.writer_to_relays.entry(writer).or_default().insert(url);
        }
    }

    /// Check that the two directions describe the same edge set.
    pub fn duality_holds(&self) -> bool {
        let forward: BTreeSet<(&str, &str)> = self
            .relay_to_writers
            .iter()
            .flat_map(|(r, ws)| ws.iter().map(move |w| (r.as_str(), w.as_str())))
            .collect();
        let backward: BTreeSet<(&str, &str)> = self
            .writer_to_relays
            .iter()
            .flat_map(|(w, rs)| rs.iter().map(move |r| (r.as_str(), w.as_str())))
            .collect();
        forward == backward
    }
}

/// Outcome of one algorithm run over one input.
#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmResult {
    /// Display name, possibly annotated by post-processing (`"(cap@N)"`).
    pub name: String,
    /// The selected relay↔writer relation.
    pub assignments: AssignmentSet,
    /// Follows with no assigned relay. Includes both writers without a
    /// relay list and writers the strategy chose not to cover.
    pub orphaned: BTreeSet<Pubkey>,
    /// Effective parameters the run used, post-merge.
    pub params: AlgorithmParams,
    /// Wall-clock time of the selection itself.
    pub execution_time_ms: f64,
    /// Free-form notes (time-box hits, fallbacks taken).
    pub notes: Vec<String>,
}

impl AlgorithmResult {
    /// Every follow must be covered or orphaned, never both, never
    /// neither.
    pub fn partitions_follows(&self, follows: &[Pubkey]) -> bool {
        follows.iter().all(|f| {
            let covered = self.assignments.is_covered(f);
            let orphaned = self.orphaned.contains(f);
            covered != orphaned
        })
    }
}
