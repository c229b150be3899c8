//! Relay quality scoring from NIP-66 monitor observations.
//!
//! Produces a score in [0, 1] per relay from four weighted factors:
//! uptime/liveness (0.4), round-trip time (0.3), observation freshness
//! (0.2), and relevant NIP support (0.1). Relays without monitor data
//! score neutral 0.5 so quality-weighted selection degrades to plain
//! greedy rather than penalizing unknown relays.
//!
//! The caller owns the resulting score map and hands it to algorithms
//! through `AlgorithmParams::quality_scores`; there is no hidden cache.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::types::RelayUrl;

/// Neutral score for relays with no monitor data.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// NIPs that matter for outbox-model relay selection.
const RELEVANT_NIPS: [u16; 9] = [1, 2, 9, 11, 15, 40, 42, 50, 65];

// RTT thresholds (ms) for the piecewise-linear curve.
const RTT_EXCELLENT_MS: f64 = 100.0;
const RTT_GOOD_MS: f64 = 300.0;
const RTT_ACCEPTABLE_MS: f64 = 800.0;
const RTT_POOR_MS: f64 = 2000.0;

// Observation age thresholds (seconds).
const FRESH_THRESHOLD_S: u64 = 3600;
const ACCEPTABLE_THRESHOLD_S: u64 = 21_600;
const STALE_THRESHOLD_S: u64 = 86_400;

/// One relay's NIP-66 monitor observation.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorObservation {
    pub relay_url: RelayUrl,
    pub rtt_open_ms: Option<f64>,
    pub rtt_read_ms: Option<f64>,
    pub rtt_write_ms: Option<f64>,
    pub supported_nips: Vec<u16>,
    pub network: Option<String>,
    /// Unix seconds of the observation.
    pub last_seen_at: u64,
    /// Monitor identity, or the markers `"synthetic"` / `"http-api"`
    /// for data that did not come from a real NIP-66 monitor.
    pub monitor_pubkey: String,
}

/// Composite score plus the per-factor breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityScore {
    pub score: f64,
    pub uptime: f64,
    pub rtt: f64,
    pub freshness: f64,
    pub nip_support: f64,
}

/// Factor weights. Must sum to 1 for the composite to stay in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub uptime: f64,
    pub rtt: f64,
    pub freshness: f64,
    pub nip_support: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            uptime: 0.4,
            rtt: 0.3,
            freshness: 0.2,
            nip_support: 0.1,
        }
    }
}

/// Score one relay at time `now` (unix seconds).
pub fn score_relay(
    relay_url: &str,
    data: &BTreeMap<RelayUrl, MonitorObservation>,
    weights: ScoreWeights,
    now: u64,
) -> QualityScore {
    let Some(entry) = data.get(relay_url) else {
        return QualityScore {
            score: NEUTRAL_SCORE,
            uptime: NEUTRAL_SCORE,
            rtt: NEUTRAL_SCORE,
            freshness: NEUTRAL_SCORE,
            nip_support: NEUTRAL_SCORE,
        };
    };

    let uptime = uptime_score(entry, now);
    let rtt = rtt_score(entry);
    let freshness = freshness_score(entry, now);
    let nip_support = nip_support_score(entry);

    let composite = weights.uptime * uptime
        + weights.rtt * rtt
        + weights.freshness * freshness
        + weights.nip_support * nip_support;

    QualityScore {
        score: composite.clamp(0.0, 1.0),
        uptime,
        rtt,
        freshness,
        nip_support,
    }
}

/// Score every relay in `relay_urls`, producing the map algorithms
/// consume via `AlgorithmParams::quality_scores`.
pub fn score_all<'a, I>(
    relay_urls: I,
    data: &BTreeMap<RelayUrl, MonitorObservation>,
    weights: ScoreWeights,
    now: u64,
) -> BTreeMap<RelayUrl, f64>
where
    I: IntoIterator<Item = &'a RelayUrl>,
{
    relay_urls
        .into_iter()
        .map(|url| (url.clone(), score_relay(url, data, weights, now).score))
        .collect()
}

fn observation_age_s(entry: &MonitorObservation, now: u64) -> u64 {
    now.saturating_sub(entry.last_seen_at)
}

/// Presence in monitor data means a monitor saw the relay online; score
/// by how recently. Synthetic and HTTP-API entries are muted since no
/// real monitor vouches for them.
fn uptime_score(entry: &MonitorObservation, now: u64) -> f64 {
    let age_s = observation_age_s(entry, now);
    match entry.monitor_pubkey.as_str() {
        "synthetic" => 0.5,
        "http-api" => {
            if age_s <= FRESH_THRESHOLD_S {
                0.7
            } else {
                0.5
            }
        }
        _ => {
            if age_s <= FRESH_THRESHOLD_S {
                1.0
            } else if age_s <= ACCEPTABLE_THRESHOLD_S {
                0.8
            } else if age_s <= STALE_THRESHOLD_S {
                0.6
            } else {
                0.3
            }
        }
    }
}

/// Piecewise-linear score over the open RTT, falling back to read RTT.
fn rtt_score(entry: &MonitorObservation) -> f64 {
    let Some(rtt) = entry.rtt_open_ms.or(entry.rtt_read_ms) else {
        return NEUTRAL_SCORE;
    };
    if rtt <= 0.0 {
        return NEUTRAL_SCORE;
    }
    if rtt <= RTT_EXCELLENT_MS {
        1.0
    } else if rtt <= RTT_GOOD_MS {
        lerp(1.0, 0.8, (rtt - RTT_EXCELLENT_MS) / (RTT_GOOD_MS - RTT_EXCELLENT_MS))
    } else if rtt <= RTT_ACCEPTABLE_MS {
        lerp(0.8, 0.5, (rtt - RTT_GOOD_MS) / (RTT_ACCEPTABLE_MS - RTT_GOOD_MS))
    } else if rtt <= RTT_POOR_MS {
        lerp(
            0.5,
            0.2,
            (rtt - RTT_ACCEPTABLE_MS) / (RTT_POOR_MS - RTT_ACCEPTABLE_MS),
        )
    } else {
        0.1
    }
}

fn freshness_score(entry: &MonitorObservation, now: u64) -> f64 {
    let age_s = observation_age_s(entry, now) as f64;
    let fresh = FRESH_THRESHOLD_S as f64;
    let acceptable = ACCEPTABLE_THRESHOLD_S as f64;
    let stale = STALE_THRESHOLD_S as f64;

    if age_s <= fresh {
        1.0
    } else if age_s <= acceptable {
        lerp(1.0, 0.7, (age_s - fresh) / (acceptable - fresh))
    } else if age_s <= stale {
        lerp(0.7, 0.4, (age_s - acceptable) / (stale - acceptable))
    } else {
        0.2
    }
}

/// Fraction of the relevant NIPs the relay advertises. Neutral when the
/// relay advertises nothing.
fn nip_support_score(entry: &MonitorObservation) -> f64 {
    if entry.supported_nips.is_empty() {
        return NEUTRAL_SCORE;
    }
    let matches = RELEVANT_NIPS
        .iter()
        .filter(|nip| entry.supported_nips.contains(nip))
        .count();
    matches as f64 / RELEVANT_NIPS.len() as f64
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t.clamp(0.0, 1.0)
}
