// Error types for orchestration

use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Transport or service error
    #[error("{0}")]
    Model(#[from] forge_abstraction::ModelError),

    /// Every specialist failed in phase 1
    #[error("All {failed} specialist agents failed. Please check your connection settings and try again.")]
    AllSpecialistsFailed {
        /// Number of specialists that ran
        failed: usize,
    },

    /// A tool-use loop used up its turn allowance
    #[error("Specialist '{specialist}' did not finish within {max_turns} turns")]
    MaxTurns {
        /// Specialist identity
        specialist: String,
        /// Turn allowance
        max_turns: u32,
    },

    /// A specialist or sub-call exceeded its wall-clock allowance
    #[error("{what} timed out after {seconds}s")]
    Timeout {
        /// What timed out
        what: String,
        /// Allowance in seconds
        seconds: u64,
    },

    /// Delegation input did not match the tool schema
    #[error("Invalid tool arguments for '{tool}': {reason}")]
    InvalidToolArguments {
        /// Tool name
        tool: String,
        /// Reason why arguments are invalid
        reason: String,
    },

    /// Specialist catalogue could not be loaded
    #[error("Catalogue error: {0}")]
    Catalogue(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
