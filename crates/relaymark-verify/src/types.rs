//! Phase-2 result types: per-author ground truth, per-algorithm recall,
//! and the latency replay records.

use std::collections::{BTreeMap, BTreeSet};

use relaymark_core::{Pubkey, RelayUrl};
use serde::{Deserialize, Serialize};

/// Event-id cap per (relay, writer) cache slot.
pub const MAX_EVENTS_PER_PAIR: usize = 100;

/// Knobs for one Phase-2 run.
#[derive(Debug, Clone, Serialize)]
pub struct Phase2Options {
    /// Event kinds to query (text notes by default).
    pub kinds: Vec<u16>,
    /// Look-back window in seconds.
    pub window_seconds: u64,
    /// Concurrent relay queries.
    pub max_concurrent_conns: usize,
    /// Open-socket cap across the pool.
    pub max_open_sockets: usize,
    /// Event cap per (relay, writer) pair.
    pub max_events_per_pair: usize,
    /// Writers per REQ batch.
    pub batch_size: usize,
    /// Per-subscription EOSE timeout.
    pub eose_timeout_ms: u64,
    /// WebSocket connect timeout.
    pub connect_timeout_ms: u64,
}

impl Default for Phase2Options {
    fn default() -> Self {
        Self {
            kinds: vec![1],
            window_seconds: 86_400,
            max_concurrent_conns: 20,
            max_open_sockets: 50,
            max_events_per_pair: MAX_EVENTS_PER_PAIR,
            batch_size: 50,
            eose_timeout_ms: 15_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// 4-way author classification against ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BaselineClassification {
    /// Events found, majority of declared relays answered.
    TestableReliable,
    /// Events found, under half of declared relays answered.
    TestablePartial,
    /// Relays answered but held nothing in the window.
    ZeroBaseline,
    /// Too few relays answered to say anything.
    Unreliable,
}

/// Per-author ground truth from baseline collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubkeyBaseline {
    pub pubkey: Pubkey,
    /// Union of event ids across succeeded declared relays.
    pub event_ids: BTreeSet<String>,
    pub relays_queried: usize,
    pub relays_succeeded: BTreeSet<RelayUrl>,
    pub relays_failed: BTreeSet<RelayUrl>,
    pub relays_with_events: BTreeSet<RelayUrl>,
    /// True when at least half of the declared relays succeeded.
    pub reliable: bool,
    pub classification: BaselineClassification,
}

/// One relay's observed connection and query outcome. The latency
/// replay is computed purely from these records after the fact.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayOutcome {
    pub connected: bool,
    pub reached_eose: bool,
    /// The subscription hit its EOSE timeout at least once.
    pub timed_out: bool,
    pub connect_ms: f64,
    /// Total time spent in subscriptions on this relay.
    pub query_ms: f64,
    /// Time from REQ to the first EVENT frame, if any arrived.
    pub first_event_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Simulated latency of querying one algorithm's relay set in parallel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlgorithmLatencyStats {
    /// min(connect + first event) across relays with events.
    pub ttfe_ms: Option<f64>,
    /// Connect-only fallback when no first-event time was recorded.
    pub ttfe_connect_only_ms: Option<f64>,
    pub query_p50_ms: Option<f64>,
    pub query_p80_ms: Option<f64>,
    pub query_max_ms: Option<f64>,
    pub timeout_count: usize,
    pub relays_with_outcomes: usize,
    pub relays_connected: usize,
    pub relays_with_events: usize,
    pub total_events: usize,
    /// `ceil(timeouts / concurrency) * eose_timeout`: wall-clock cost of
    /// dead relays occupying concurrency slots.
    pub timeout_tax_ms: u64,
    pub relays_connected_no_events: usize,
    /// Fraction of eventual recall reached by each cutoff (seconds).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub progressive_completeness: BTreeMap<u64, f64>,
    /// Recall fraction if the query stopped at first-EOSE + grace (ms).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub eose_race: BTreeMap<u64, EoseRacePoint>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EoseRacePoint {
    pub cutoff_ms: f64,
    pub completeness: f64,
}

/// Simulated per-author profile view: querying the author's declared
/// write relays directly, outside any algorithm's selection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileViewLatencyStats {
    pub author_count: usize,
    pub mean_ttfe_ms: Option<f64>,
    pub median_ttfe_ms: Option<f64>,
    pub p95_ttfe_ms: Option<f64>,
    pub mean_relays_queried: f64,
    pub mean_relays_with_events: f64,
    /// Profile views where at least one relay returned events.
    pub hit_rate: f64,
    pub mean_timeouts: f64,
}

/// Recall of one algorithm's selection against the baseline.
#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmVerification {
    pub algorithm_name: String,
    /// Headline: event recall over testable-reliable authors.
    pub event_recall_rate: f64,
    pub author_recall_rate: f64,
    /// Secondary: recall including testable-partial authors.
    pub event_recall_inc_partial: f64,
    pub author_recall_inc_partial: f64,
    /// Fraction of the selected declared relays that succeeded. `None`
    /// when nothing qualifies for the denominator.
    pub selected_relay_success_rate: Option<f64>,
    pub total_baseline_events_reliable: usize,
    pub total_baseline_events_incl_partial: usize,
    pub total_found_events_reliable: usize,
    pub total_found_events_incl_partial: usize,
    pub testable_reliable_authors: usize,
    pub testable_partial_authors: usize,
    pub authors_with_events: usize,
    /// Selected relays never queried during baseline collection.
    pub out_of_baseline_relays: Vec<RelayUrl>,
    /// Per-author event recall over the headline set, ascending.
    pub per_author_recall_rates: Vec<f64>,
    /// Only present for fresh (non-cached) runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<AlgorithmLatencyStats>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TimingSummary {
    pub median: f64,
    pub p95: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimingStats {
    pub connect_ms: TimingSummary,
    pub query_ms: TimingSummary,
    /// Subscription-level timeouts.
    pub timeout_count: usize,
    /// Relays with at least one timeout.
    pub timeout_relay_count: usize,
    pub total_relay_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BaselineStats {
    pub total_relays_queried: usize,
    pub relay_success_rate: f64,
    pub total_unique_events: usize,
    pub mean_events_per_testable_author: f64,
    pub median_events_per_testable_author: f64,
    pub collection_time_ms: f64,
    /// Fresh runs only; cache hits carry no timings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing_stats: Option<TimingStats>,
}

/// The full Phase-2 outcome handed to reporting and score persistence.
#[derive(Debug, Clone, Serialize)]
pub struct Phase2Result {
    pub options: Phase2Options,
    /// Window start (unix seconds).
    pub since: u64,
    pub total_authors_with_relay_data: usize,
    pub testable_reliable_authors: usize,
    pub testable_partial_authors: usize,
    pub authors_zero_baseline: usize,
    pub authors_unreliable_baseline: usize,
    pub baseline_stats: BaselineStats,
    pub algorithms: Vec<AlgorithmVerification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_view_latency: Option<ProfileViewLatencyStats>,
    /// Carried for score persistence, not part of the report surface.
    #[serde(skip)]
    pub baselines: BTreeMap<Pubkey, PubkeyBaseline>,
}
