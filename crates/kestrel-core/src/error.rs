//! Error types for Kestrel.

use std::fmt;
use thiserror::Error;

/// Why an execution scope was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The configured timeout elapsed.
    DeadlineExceeded,
    /// An interrupt signal was received from the operator.
    Interrupted,
    /// Cancelled programmatically.
    Requested,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::DeadlineExceeded => f.write_str("deadline exceeded"),
            CancelReason::Interrupted => f.write_str("interrupted"),
            CancelReason::Requested => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    // Definition errors
    #[error("Matrix parse failed: {0}")]
    MatrixParse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Invalid pipeline definition: {0}")]
    DefinitionParse(String),

    #[error("Lint failed: {0}")]
    Lint(String),

    #[error("Compile failed: {0}")]
    Compile(String),

    // Execution errors
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Execution cancelled: {0}")]
    Cancelled(CancelReason),

    #[error("Step {step} exited with code {exit_code}")]
    StepFailed { step: String, exit_code: i64 },

    #[error("Step {step} was killed: out of memory")]
    OomKilled { step: String },

    #[error("Log stream error: {0}")]
    LogStream(String),

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true when the error stems from a cancelled execution scope.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_display() {
        let err = Error::Cancelled(CancelReason::DeadlineExceeded);
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "Execution cancelled: deadline exceeded");
    }

    #[test]
    fn test_step_failed_is_not_cancelled() {
        let err = Error::StepFailed {
            step: "build".to_string(),
            exit_code: 2,
        };
        assert!(!err.is_cancelled());
        assert_eq!(err.to_string(), "Step build exited with code 2");
    }
}
