//! On-disk baseline cache. A fresh collection run is minutes of
//! wall-clock against live relays; reusing it within the TTL lets
//! algorithm changes be re-scored in milliseconds.
//!
//! Cache files are written via a temp file and an atomic rename, so a
//! crashed run never leaves a half-written envelope behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use relaymark_core::Pubkey;

use crate::error::Result;
use crate::types::PubkeyBaseline;

pub const SCHEMA_VERSION: u32 = 1;

/// Baselines go stale after four hours.
pub const DEFAULT_TTL_MS: i64 = 4 * 60 * 60 * 1000;

/// Cached runs with a relay success rate below this are kept but
/// flagged: their baselines undercount.
const LOW_SUCCESS_WARN: f64 = 0.8;

const DEFAULT_CACHE_DIR: &str = ".cache";

/// Serialized envelope of one baseline collection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineCacheFile {
    pub schema_version: u32,
    pub pubkey: Pubkey,
    pub window_seconds: u64,
    /// Window start (unix seconds).
    pub since: u64,
    pub follow_count: usize,
    pub relay_count: usize,
    /// Collection time (unix ms).
    pub fetched_at: i64,
    pub ttl_ms: i64,
    pub relay_success_rate: f64,
    pub total_relays_queried: usize,
    pub total_relays_succeeded: usize,
    pub baselines: Vec<PubkeyBaseline>,
}

impl BaselineCacheFile {
    pub fn baselines_by_pubkey(&self) -> BTreeMap<Pubkey, PubkeyBaseline> {
        self.baselines
            .iter()
            .map(|b| (b.pubkey.clone(), b.clone()))
            .collect()
    }
}

/// Directory-backed cache keyed by reader, window, and graph shape.
pub struct BaselineCache {
    dir: PathBuf,
}

impl Default for BaselineCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_DIR)
    }
}

impl BaselineCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// A change in follow count or relay count invalidates the cache by
    /// changing the file name.
    fn path_for(
        &self,
        pubkey: &str,
        window_seconds: u64,
        follow_count: usize,
        relay_count: usize,
    ) -> PathBuf {
        let prefix = pubkey.get(..16).unwrap_or(pubkey);
        self.dir.join(format!(
            "phase2_{prefix}_{window_seconds}_{follow_count}_{relay_count}.json"
        ))
    }

    /// Load a cached run if one exists, matches the schema, and is
    /// within its TTL.
    pub fn load(
        &self,
        pubkey: &str,
        window_seconds: u64,
        follow_count: usize,
        relay_count: usize,
    ) -> Option<BaselineCacheFile> {
        let path = self.path_for(pubkey, window_seconds, follow_count, relay_count);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) => {
                debug!(path = %path.display(), %err, "no usable cache file");
                return None;
            }
        };
        let file: BaselineCacheFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %path.display(), %err, "discarding unreadable cache file");
                return None;
            }
        };
        if file.schema_version != SCHEMA_VERSION {
            info!(
                found = file.schema_version,
                expected = SCHEMA_VERSION,
                "cache schema changed, ignoring"
            );
            return None;
        }
        let age_ms = Utc::now().timestamp_millis() - file.fetched_at;
        if age_ms > file.ttl_ms {
            info!(age_ms, ttl_ms = file.ttl_ms, "cache expired");
            return None;
        }
        if file.relay_success_rate < LOW_SUCCESS_WARN {
            warn!(
                success_rate = file.relay_success_rate,
                "cached baseline had a poor relay success rate, recall may undercount"
            );
        }
        Some(file)
    }

    /// Write through a temp file and rename into place.
    pub fn store(&self, file: &BaselineCacheFile) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(
            &file.pubkey,
            file.window_seconds,
            file.follow_count,
            file.relay_count,
        );
        let tmp = tmp_path(&path);
        fs::write(&tmp, serde_json::to_vec_pretty(file)?)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), baselines = file.baselines.len(), "cache written");
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
