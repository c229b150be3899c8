//! Live-relay verification for the benchmark: collect per-author ground
//! truth from declared relays, score every algorithm's selection
//! against it, and persist learned relay reliability as Beta posteriors
//! for the Thompson-sampling strategies.
//!
//! The pipeline runs in two phases. Baseline collection queries each
//! writer's declared relays over real WebSockets, classifies writers by
//! how much of their relay list answered, and caches the result on
//! disk. Verification then replays each algorithm's relay assignment
//! against the cached events, entirely offline. Network failure is
//! never fatal here: an unreachable relay degrades the baseline, the
//! classification absorbs it.

pub mod baseline;
pub mod cache;
pub mod error;
pub mod latency;
pub mod pool;
pub mod run;
pub mod scores;
pub mod types;
pub mod verify;

pub use baseline::{build_baselines, collect_baselines, RELIABLE_THRESHOLD};
pub use cache::{BaselineCache, BaselineCacheFile};
pub use error::{Error, Result};
pub use latency::{compute_algorithm_latency, compute_profile_view_latency};
pub use pool::{NostrEvent, QueryCache, QueryFilter, RelayPool};
pub use run::run_phase2;
pub use scores::{record_session, relay_priors, RelayScoreDb, RelayScoreEntry, RelayScoreStore};
pub use types::{
    AlgorithmVerification, BaselineClassification, BaselineStats, Phase2Options, Phase2Result,
    ProfileViewLatencyStats, PubkeyBaseline, RelayOutcome,
};
