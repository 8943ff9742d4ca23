//! Error types for Routewise

use thiserror::Error;

/// Result type alias using Routewise's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Routewise error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Routing errors (E100-E199)
    #[error("No candidates available for task type '{0}'. Supply at least one candidate whose circuit is closed.")]
    NoCandidatesAvailable(String),

    #[error("Prediction failed: {0}")]
    PredictionError(String),

    #[error("Model selection failed: {0}")]
    SelectionError(String),

    // Execution errors (E200-E299)
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoCandidatesAvailable(_) => "E100",
            Self::PredictionError(_) => "E101",
            Self::SelectionError(_) => "E102",
            Self::ExecutionFailed(_) => "E200",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NoCandidatesAvailable(_) => {
                Some("routewise config get circuit_breaker.reset_timeout_ms".to_string())
            }
            Self::InvalidInput(_) => Some("Candidates are written as provider:model".to_string()),
            _ => None,
        }
    }

    /// Whether this error is recovered inside the engine rather than surfaced
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::PredictionError(_) | Self::SelectionError(_))
    }
}
