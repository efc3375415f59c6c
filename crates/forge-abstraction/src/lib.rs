//! Model abstraction layer for Forge.
//!
//! This crate defines the wire data model shared by the transport and the
//! orchestration engine: conversation turns, tool declarations, the request and
//! response envelopes, the content-block decoder and the run-scoped usage
//! accumulator. The [`CompletionTransport`] trait is the seam between the two.

pub mod decode;
pub mod message;
pub mod usage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use decode::{ContentBlock, DecodedResponse, ToolInvocation, decode, decode_blocks, extract_text};
pub use message::{
    CompletionRequest, CompletionResponse, Role, StopReason, ThinkingDirective, ToolDeclaration,
    ToolResult, Turn, TurnContent, Usage, WEB_SEARCH_TOOL_NAME, WEB_SEARCH_TOOL_TYPE,
};
pub use usage::{UsageAccumulator, UsageSnapshot};

/// Represents an error that can occur when talking to the completion service.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelError {
    /// No response was received (connection refused, reset, DNS failure).
    #[error("Network error: {0}")]
    Network(String),

    /// The service asked us to slow down (HTTP 429).
    #[error("Rate limited ({status}): {message}")]
    RateLimited {
        /// HTTP status code.
        status: u16,
        /// Message reported by the service.
        message: String,
    },

    /// The service is overloaded or failed internally (HTTP 5xx).
    #[error("Server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Message reported by the service.
        message: String,
    },

    /// The request was rejected (any other 4xx). Never retried.
    #[error("{message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message reported by the service.
        message: String,
    },

    /// The response envelope could not be decoded.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A call did not finish within its time allowance.
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// The transport is not usable as configured (bad credential, bad URL).
    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),
}

impl ModelError {
    /// Classifies an unsuccessful HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited { status, message },
            s if s >= 500 => Self::Server { status, message },
            _ => Self::Api { status, message },
        }
    }

    /// Whether a second attempt may succeed.
    ///
    /// Network failures, rate limiting and server-side errors are transient;
    /// everything else is permanent.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited { .. } | Self::Server { .. })
    }
}

/// Performs exactly one logical call against the completion service.
///
/// Implementations own retry and usage accounting; callers see either a
/// decoded envelope or a terminal [`ModelError`].
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Sends the request and returns the raw response envelope.
    ///
    /// # Errors
    /// Returns a `ModelError` once the call has failed terminally.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        assert!(matches!(ModelError::from_status(429, "slow down"), ModelError::RateLimited { .. }));
        assert!(matches!(ModelError::from_status(500, "boom"), ModelError::Server { .. }));
        assert!(matches!(ModelError::from_status(529, "overloaded"), ModelError::Server { .. }));
        assert!(matches!(ModelError::from_status(400, "bad"), ModelError::Api { status: 400, .. }));
        assert!(matches!(ModelError::from_status(401, "auth"), ModelError::Api { status: 401, .. }));
    }

    #[test]
    fn test_transient_errors() {
        assert!(ModelError::Network("reset".to_string()).is_transient());
        assert!(ModelError::from_status(429, "").is_transient());
        assert!(ModelError::from_status(503, "").is_transient());
        assert!(!ModelError::from_status(404, "").is_transient());
        assert!(!ModelError::InvalidResponse("eof".to_string()).is_transient());
        assert!(!ModelError::Timeout(60).is_transient());
    }

    #[test]
    fn test_api_error_displays_service_message() {
        let err = ModelError::from_status(400, "max_tokens: too large");
        assert_eq!(err.to_string(), "max_tokens: too large");
    }
}
