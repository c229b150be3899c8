//! Error types for the verification pipeline.
//!
//! Network trouble during collection is not represented here: a relay
//! that fails to connect or times out is a degraded-success outcome
//! recorded in its [`crate::types::RelayOutcome`], never an `Err`.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] relaymark_core::Error),
}
