//! Messages API client.

use std::sync::Arc;

use async_trait::async_trait;
use forge_abstraction::{CompletionRequest, CompletionResponse, CompletionTransport, ModelError, UsageAccumulator};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error};

use crate::connection::{ConnectionConfig, DIRECT_API_URL};
use crate::retry::RetryPolicy;

/// HTTP transport for the Messages API.
///
/// Every successful call adds its token counts to the shared
/// [`UsageAccumulator`]; transient failures are retried per [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    /// Direct or proxied connection.
    connection: ConnectionConfig,
    /// Endpoint used in direct mode.
    direct_url: String,
    /// Retry policy for transient failures.
    retry: RetryPolicy,
    /// Run-scoped usage counters.
    usage: Arc<UsageAccumulator>,
    /// HTTP client for making requests.
    client: Client,
}

impl AnthropicClient {
    /// Creates a client for the given connection.
    pub fn new(connection: ConnectionConfig, usage: Arc<UsageAccumulator>) -> Self {
        Self {
            connection,
            direct_url: DIRECT_API_URL.to_string(),
            retry: RetryPolicy::default(),
            usage,
            client: Client::new(),
        }
    }

    /// Overrides the direct-mode endpoint.
    #[must_use]
    pub fn with_direct_url(mut self, url: impl Into<String>) -> Self {
        self.direct_url = url.into();
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The URL requests are posted to.
    pub fn endpoint(&self) -> String {
        self.connection.endpoint(&self.direct_url)
    }

    /// The shared usage counters.
    pub fn usage(&self) -> &Arc<UsageAccumulator> {
        &self.usage
    }

    /// One HTTP round trip, no retry.
    async fn send_once(&self, request: &CompletionRequest, attempt: u32) -> Result<CompletionResponse, ModelError> {
        let url = self.endpoint();
        let headers = self.connection.headers(request.declares_web_search())?;

        debug!(
            model = %request.model,
            max_tokens = request.max_tokens,
            turns = request.messages.len(),
            tools = request.tools.len(),
            thinking = request.thinking.is_some(),
            attempt,
            "Sending completion request"
        );

        let response = self.client.post(&url).headers(headers).json(request).send().await.map_err(|e| {
            error!(error = %e, "Failed to send request to completion service");
            ModelError::Network(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = api_error_message(&body).unwrap_or_else(|| format!("API error: {}", status.as_u16()));
            error!(status = %status, error = %message, "Completion service returned error status");
            return Err(ModelError::from_status(status.as_u16(), message));
        }

        response.json::<CompletionResponse>().await.map_err(|e| {
            error!(error = %e, "Failed to parse completion response");
            ModelError::InvalidResponse(e.to_string())
        })
    }
}

#[async_trait]
impl CompletionTransport for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ModelError> {
        let response = self.retry.run(|attempt| self.send_once(request, attempt)).await?;

        self.usage.record_tokens(&response.usage);
        debug!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            stop_reason = ?response.stop_reason,
            "Completion request finished"
        );

        Ok(response)
    }
}

/// Error envelope: `{"type": "error", "error": {"type": "...", "message": "..."}}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

fn api_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorEnvelope>(body).ok().map(|envelope| envelope.error.message)
}
