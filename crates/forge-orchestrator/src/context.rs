// Shared handles for one engine instance

use std::sync::Arc;

use forge_abstraction::{CompletionRequest, CompletionTransport, Turn, UsageAccumulator, decode_blocks, extract_text};

use crate::config::EngineConfig;
use crate::error::Result;

/// Transport, configuration and usage counters shared by every phase.
///
/// The accumulator must be the one the transport records token usage into;
/// the engine adds search and sub-call counts to it.
#[derive(Clone)]
pub struct EngineContext {
    pub transport: Arc<dyn CompletionTransport>,
    pub config: Arc<EngineConfig>,
    pub usage: Arc<UsageAccumulator>,
}

impl EngineContext {
    pub fn new(transport: Arc<dyn CompletionTransport>, config: EngineConfig, usage: Arc<UsageAccumulator>) -> Self {
        Self { transport, config: Arc::new(config), usage }
    }

    /// One tool-less call with a single user turn; returns the narrative text.
    pub async fn complete_text(&self, model: &str, max_tokens: u32, system: &str, user: String) -> Result<String> {
        let request = CompletionRequest::new(model, max_tokens).with_system(system).with_messages(vec![Turn::user(user)]);
        let response = self.transport.complete(&request).await?;
        Ok(extract_text(&decode_blocks(&response.content)))
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext").field("config", &self.config).field("usage", &self.usage).finish_non_exhaustive()
    }
}
