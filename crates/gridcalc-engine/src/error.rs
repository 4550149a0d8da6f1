//! Engine error types

use thiserror::Error;

/// Result type for recalculation passes
pub type Result<T> = std::result::Result<T, CalcError>;

/// Errors that end a recalculation pass
///
/// Results written before the error are kept.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CalcError {
    /// The pass was cancelled through an [`AbortHandle`](crate::AbortHandle)
    #[error("Calculation aborted after {calculated} cells")]
    Aborted { calculated: usize },

    /// More cells needed evaluation than the configured ceiling allows
    #[error("Maximum iterations ({limit}) exceeded after {calculated} cells")]
    IterationLimit { limit: usize, calculated: usize },
}

/// Failure reported by an evaluator for a single cell
///
/// These never escape [`CalcEngine::recalculate`](crate::CalcEngine::recalculate);
/// the cell is marked with a generic error instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// Evaluation failed with a message
    #[error("{0}")]
    Message(String),

    /// The evaluator panicked
    #[error("Evaluator panicked: {0}")]
    Panicked(String),
}

impl EvalError {
    /// Create a new evaluation error with a message
    pub fn new<S: Into<String>>(msg: S) -> Self {
        EvalError::Message(msg.into())
    }
}

impl From<String> for EvalError {
    fn from(msg: String) -> Self {
        EvalError::Message(msg)
    }
}

impl From<&str> for EvalError {
    fn from(msg: &str) -> Self {
        EvalError::Message(msg.to_string())
    }
}
