//! Core benchmark engine for relay-selection strategies.
//!
//! The model is a bipartite graph between followed authors (writers)
//! and the relays they declare write access to. A strategy consumes a
//! frozen [`input::BenchmarkInput`] and produces an
//! [`types::AlgorithmResult`]: which relays to open and which authors
//! to expect on each. The [`metrics`] module turns a result into
//! coverage, redundancy, and concentration numbers; [`registry`] drives
//! runs, seed sweeps, and connection capping.
//!
//! Everything in this crate is synchronous and deterministic for a
//! fixed seed. Live-relay verification lives in the companion
//! `relaymark-verify` crate.

pub mod algorithms;
pub mod bitset;
pub mod error;
pub mod input;
pub mod metrics;
pub mod quality;
pub mod registry;
pub mod rng;
pub mod sampling;
pub mod stats;
pub mod types;

pub use error::{Error, Result};
pub use input::{BenchmarkInput, RelayGraph};
pub use metrics::{compute_metrics, AlgorithmMetrics, MetricSummary, StochasticStats};
pub use registry::{get_algorithms, registry, run_algorithm, run_stochastic, AlgorithmEntry};
pub use rng::Mulberry32;
pub use types::{AlgorithmParams, AlgorithmResult, AssignmentSet, BetaPrior, Pubkey, RelayUrl};
