//! Error types for the algorithm library.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while selecting or running algorithms.
#[derive(Error, Debug)]
pub enum Error {
    /// Requested algorithm id is not in the registry.
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Parameter combination the algorithm cannot honor.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// Malformed benchmark input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
