//! Learned relay reliability, persisted across runs as Beta posteriors.
//!
//! Each verification session updates one Beta(α, β) per queried relay:
//! delivered fraction feeds α, the shortfall feeds β. All entries decay
//! toward the uniform prior first, so a relay that went dark stops
//! coasting on old evidence. The Thompson-sampling strategies load
//! these posteriors back through [`relay_priors`].

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use relaymark_core::stats::ols_slope;
use relaymark_core::types::AssignmentSet;
use relaymark_core::{BetaPrior, Pubkey, RelayUrl};

use crate::error::Result;
use crate::pool::QueryCache;
use crate::types::PubkeyBaseline;

pub const SCHEMA_VERSION: u32 = 1;

/// Per-session decay applied to every posterior before the update.
pub const DECAY_FACTOR: f64 = 0.95;

/// Rolling window of per-session delivery rates kept for the trend.
pub const MAX_SESSION_RATES: usize = 10;

/// OLS slope beyond which a relay counts as improving or declining.
pub const TREND_SLOPE_THRESHOLD: f64 = 0.05;

const DEFAULT_SCORE_DIR: &str = ".cache";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayScoreEntry {
    pub alpha: f64,
    pub beta: f64,
    /// Last session that queried this relay (unix ms).
    pub last_queried: i64,
    pub total_events: u64,
    pub total_expected: u64,
    /// Most recent per-session delivery rates, oldest first.
    pub session_rates: Vec<f64>,
    pub trend: Trend,
}

impl Default for RelayScoreEntry {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            last_queried: 0,
            total_events: 0,
            total_expected: 0,
            session_rates: Vec::new(),
            trend: Trend::Stable,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayScoreDb {
    pub schema_version: u32,
    pub pubkey: Pubkey,
    pub window_seconds: u64,
    /// Unix ms of the last update.
    pub updated_at: i64,
    pub session_count: u32,
    pub relays: BTreeMap<RelayUrl, RelayScoreEntry>,
}

impl RelayScoreDb {
    pub fn fresh(pubkey: &str, window_seconds: u64) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            pubkey: pubkey.to_string(),
            window_seconds,
            updated_at: 0,
            session_count: 0,
            relays: BTreeMap::new(),
        }
    }
}

/// File-backed store, one score DB per (reader, window, filter mode,
/// algorithm). Separate algorithms learn separate posteriors; their
/// selections query different relay subsets and would otherwise poison
/// each other's evidence.
pub struct RelayScoreStore {
    dir: PathBuf,
    /// Distinguishes score files for filtered runs (e.g. a kind subset).
    filter_suffix: Option<String>,
    /// Registry id of the algorithm the scores belong to.
    algorithm_id: Option<String>,
}

impl Default for RelayScoreStore {
    fn default() -> Self {
        Self::new(DEFAULT_SCORE_DIR, None, None)
    }
}

impl RelayScoreStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        filter_suffix: Option<String>,
        algorithm_id: Option<String>,
    ) -> Self {
        Self {
            dir: dir.into(),
            filter_suffix,
            algorithm_id,
        }
    }

    fn path_for(&self, pubkey: &str, window_seconds: u64) -> PathBuf {
        let prefix = pubkey.get(..16).unwrap_or(pubkey);
        let mut suffix = String::new();
        if let Some(filter) = &self.filter_suffix {
            suffix.push('_');
            suffix.push_str(filter);
        }
        if let Some(algorithm) = &self.algorithm_id {
            suffix.push('_');
            suffix.push_str(algorithm);
        }
        self.dir
            .join(format!("relay_scores_{prefix}_{window_seconds}{suffix}.json"))
    }

    /// Load the score DB, falling back to a fresh one on any miss. A
    /// score file is an optimization, never a hard requirement.
    pub fn load(&self, pubkey: &str, window_seconds: u64) -> RelayScoreDb {
        let path = self.path_for(pubkey, window_seconds);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) => {
                debug!(path = %path.display(), %err, "no score file, starting fresh");
                return RelayScoreDb::fresh(pubkey, window_seconds);
            }
        };
        match serde_json::from_str::<RelayScoreDb>(&raw) {
            Ok(db) if db.schema_version == SCHEMA_VERSION => {
                info!(
                    relays = db.relays.len(),
                    sessions = db.session_count,
                    "loaded relay scores"
                );
                db
            }
            Ok(db) => {
                info!(found = db.schema_version, "score schema changed, starting fresh");
                RelayScoreDb::fresh(pubkey, window_seconds)
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "unreadable score file, starting fresh");
                RelayScoreDb::fresh(pubkey, window_seconds)
            }
        }
    }

    pub fn save(&self, db: &RelayScoreDb) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&db.pubkey, db.window_seconds);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(db)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Fold one session's observed deliveries into the score DB.
///
/// Every entry decays first, then the queried relays get their Beta
/// update: per assigned author with a non-empty baseline, the delivered
/// fraction (capped at 1) goes to α and the shortfall to β.
pub fn record_session(
    db: &mut RelayScoreDb,
    assignments: &AssignmentSet,
    baselines: &BTreeMap<Pubkey, PubkeyBaseline>,
    cache: &QueryCache,
) {
    let now = Utc::now().timestamp_millis();

    for entry in db.relays.values_mut() {
        entry.alpha = 1.0 + (entry.alpha - 1.0) * DECAY_FACTOR;
        entry.beta = 1.0 + (entry.beta - 1.0) * DECAY_FACTOR;
    }

    for (relay, writers) in assignments.relay_to_writers() {
        let entry = db.relays.entry(relay.clone()).or_default();
        entry.last_queried = now;

        let mut delivered_sum = 0.0;
        let mut authors = 0usize;
        for writer in writers {
            let Some(baseline) = baselines.get(writer) else {
                continue;
            };
            if baseline.event_ids.is_empty() {
                continue;
            }
            let relay_events = cache.get(relay, writer).map_or(0, |ids| ids.len());
            let delivered = (relay_events as f64 / baseline.event_ids.len() as f64).min(1.0);
            entry.alpha += delivered;
            entry.beta += 1.0 - delivered;
            entry.total_events += relay_events as u64;
            entry.total_expected += baseline.event_ids.len() as u64;
            delivered_sum += delivered;
            authors += 1;
        }

        if authors > 0 {
            entry.session_rates.push(delivered_sum / authors as f64);
            if entry.session_rates.len() > MAX_SESSION_RATES {
                let excess = entry.session_rates.len() - MAX_SESSION_RATES;
                entry.session_rates.drain(..excess);
            }
            entry.trend = classify_trend(&entry.session_rates);
        }
    }

    db.session_count += 1;
    db.updated_at = now;
}

fn classify_trend(session_rates: &[f64]) -> Trend {
    if session_rates.len() < 3 {
        return Trend::Stable;
    }
    let slope = ols_slope(session_rates);
    if slope > TREND_SLOPE_THRESHOLD {
        Trend::Improving
    } else if slope < -TREND_SLOPE_THRESHOLD {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

/// Posterior map in the shape the Thompson strategies consume.
pub fn relay_priors(db: &RelayScoreDb) -> BTreeMap<RelayUrl, BetaPrior> {
    db.relays
        .iter()
        .map(|(url, entry)| {
            (
                url.clone(),
                BetaPrior {
                    alpha: entry.alpha,
                    beta: entry.beta,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use tempfile::tempdir;

    use crate::types::BaselineClassification;

    use super::*;

    fn baseline_with_events(pubkey: &str, count: usize) -> PubkeyBaseline {
        PubkeyBaseline {
            pubkey: pubkey.to_string(),
            event_ids: (0..count).map(|i| format!("e{i}")).collect(),
            relays_queried: 1,
            relays_succeeded: ["wss://a.example/".to_string()].into(),
            relays_failed: Default::default(),
            relays_with_events: Default::default(),
            reliable: true,
            classification: BaselineClassification::TestableReliable,
        }
    }

    #[test]
    fn decay_then_zero_delivery() {
        let mut db = RelayScoreDb::fresh(&"a".repeat(64), 86_400);
        db.relays.insert(
            "wss://a.example/".to_string(),
            RelayScoreEntry {
                alpha: 6.0,
                beta: 2.0,
                ..Default::default()
            },
        );

        let mut assignments = AssignmentSet::new();
        assignments.assign("wss://a.example/", "pk1");
        let mut baselines = BTreeMap::new();
        baselines.insert("pk1".to_string(), baseline_with_events("pk1", 4));
        let cache = QueryCache::new();
        // Relay delivered nothing this session.
        cache.set("wss://a.example/", "pk1", BTreeSet::new());

        record_session(&mut db, &assignments, &baselines, &cache);

        let entry = &db.relays["wss://a.example/"];
        // Decay: 1 + 5*0.95 = 5.75 and 1 + 1*0.95 = 1.95, then the
        // missed author adds a full unit to beta.
        assert!((entry.alpha - 5.75).abs() < 1e-12);
        assert!((entry.beta - 2.95).abs() < 1e-12);
        assert_eq!(entry.total_expected, 4);
        assert_eq!(entry.session_rates, vec![0.0]);
        assert_eq!(db.session_count, 1);
    }

    #[test]
    fn full_delivery_feeds_alpha() {
        let mut db = RelayScoreDb::fresh(&"a".repeat(64), 86_400);
        let mut assignments = AssignmentSet::new();
        assignments.assign("wss://a.example/", "pk1");
        let mut baselines = BTreeMap::new();
        baselines.insert("pk1".to_string(), baseline_with_events("pk1", 2));
        let cache = QueryCache::new();
        cache.set(
            "wss://a.example/",
            "pk1",
            ["e0", "e1"].map(String::from).into(),
        );

        record_session(&mut db, &assignments, &baselines, &cache);

        let entry = &db.relays["wss://a.example/"];
        assert!((entry.alpha - 2.0).abs() < 1e-12);
        assert!((entry.beta - 1.0).abs() < 1e-12);
        assert!((relay_priors(&db)["wss://a.example/"].mean() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn zero_baseline_authors_do_not_update() {
        let mut db = RelayScoreDb::fresh(&"a".repeat(64), 86_400);
        let mut assignments = AssignmentSet::new();
        assignments.assign("wss://a.example/", "pk1");
        let mut baselines = BTreeMap::new();
        baselines.insert("pk1".to_string(), baseline_with_events("pk1", 0));
        let cache = QueryCache::new();

        record_session(&mut db, &assignments, &baselines, &cache);

        let entry = &db.relays["wss://a.example/"];
        // No evidence either way: the posterior stays uniform.
        assert_eq!(entry.alpha, 1.0);
        assert_eq!(entry.beta, 1.0);
        assert!(entry.session_rates.is_empty());
        assert_eq!(entry.trend, Trend::Stable);
    }

    #[test]
    fn trend_tracks_session_rates() {
        assert_eq!(classify_trend(&[0.1, 0.9]), Trend::Stable, "too few sessions");
        assert_eq!(classify_trend(&[0.1, 0.4, 0.7, 0.9]), Trend::Improving);
        assert_eq!(classify_trend(&[0.9, 0.6, 0.3, 0.1]), Trend::Declining);
        assert_eq!(classify_trend(&[0.5, 0.52, 0.49, 0.5]), Trend::Stable);
    }

    #[test]
    fn session_rates_stay_bounded() {
        let mut entry = RelayScoreEntry::default();
        entry.session_rates = (0..MAX_SESSION_RATES).map(|i| i as f64 * 0.1).collect();
        entry.session_rates.push(1.0);
        let excess = entry.session_rates.len() - MAX_SESSION_RATES;
        entry.session_rates.drain(..excess);
        assert_eq!(entry.session_rates.len(), MAX_SESSION_RATES);
        // Oldest rate dropped, newest kept.
        assert_eq!(*entry.session_rates.last().unwrap(), 1.0);
        assert_eq!(entry.session_rates[0], 0.1);
    }

    #[test]
    fn store_round_trips_and_survives_corruption() {
        let dir = tempdir().unwrap();
        let store = RelayScoreStore::new(dir.path(), None, None);
        let pubkey = "b".repeat(64);

        let mut db = RelayScoreDb::fresh(&pubkey, 86_400);
        db.session_count = 3;
        db.relays.insert(
            "wss://a.example/".to_string(),
            RelayScoreEntry {
                alpha: 4.5,
                beta: 1.5,
                ..Default::default()
            },
        );
        store.save(&db).unwrap();

        let loaded = store.load(&pubkey, 86_400);
        assert_eq!(loaded.session_count, 3);
        assert!((loaded.relays["wss://a.example/"].alpha - 4.5).abs() < 1e-12);

        // Clobber the file: load falls back to fresh instead of failing.
        let path = store.path_for(&pubkey, 86_400);
        fs::write(&path, "garbage").unwrap();
        let fresh = store.load(&pubkey, 86_400);
        assert_eq!(fresh.session_count, 0);
        assert!(fresh.relays.is_empty());
    }

    #[test]
    fn key_components_separate_files() {
        let dir = tempdir().unwrap();
        let plain = RelayScoreStore::new(dir.path(), None, None);
        let filtered = RelayScoreStore::new(dir.path(), Some("k1".to_string()), None);
        let per_algo =
            RelayScoreStore::new(dir.path(), None, Some("welshman-thompson".to_string()));
        let pubkey = "c".repeat(64);
        let paths = [
            plain.path_for(&pubkey, 86_400),
            filtered.path_for(&pubkey, 86_400),
            per_algo.path_for(&pubkey, 86_400),
        ];
        assert_ne!(paths[0], paths[1]);
        assert_ne!(paths[0], paths[2]);
        assert_ne!(paths[1], paths[2]);
    }
}
