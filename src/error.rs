// src/error.rs

use thiserror::Error;

/// Errors produced by the crosstalk-removal core.
#[derive(Debug, Error)]
pub enum CrosstalkError {
    /// Malformed signal shape or invalid configuration. Fatal, no retry.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Fewer usable points than a regression fit requires. Recoverable at
    /// the per-pair level inside the estimator, fatal everywhere else.
    #[error("insufficient data: {needed} points required, {got} available")]
    InsufficientData { needed: usize, got: usize },

    /// A mixing matrix (or per-iteration estimate) could not be inverted.
    #[error("mixing matrix is singular and cannot be inverted")]
    SingularMatrix,

    /// Every channel pair was skipped in one estimator iteration, leaving
    /// the convergence check without any slope to look at.
    #[error("no channel pair produced a usable fit in iteration {iteration}")]
    NoConvergenceData { iteration: usize },

    /// Cooperative cancellation was observed. Not a failure: the caller
    /// asked the computation to stop and it did, producing no result.
    #[error("operation cancelled")]
    Cancelled,
}

impl CrosstalkError {
    /// Whether this outcome is a caller-requested stop rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CrosstalkError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, CrosstalkError>;
