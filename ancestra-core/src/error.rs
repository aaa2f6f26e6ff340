//! Structured error types for the Ancestra toolkit.

use thiserror::Error;

/// Unified error type for all Ancestra operations.
#[derive(Debug, Error)]
pub enum AncestraError {
    /// Invalid input (bad arguments, out-of-range configuration values).
    /// Raised before any computation starts.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The dynamic program assigned zero probability to every complete path,
    /// even after all local recovery (band doubling, guide removal).
    #[error("zero likelihood: {0}")]
    ZeroLikelihood(String),

    /// An internal structural invariant was violated. Always a bug.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the Ancestra toolkit.
pub type Result<T> = std::result::Result<T, AncestraError>;
