//! Delegated research sub-calls.

use forge_abstraction::{CompletionRequest, ToolDeclaration, Turn, decode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::context::EngineContext;
use crate::error::{OrchestrationError, Result};

/// Name of the client-side delegation tool.
pub const DELEGATION_TOOL_NAME: &str = "research_subagent";

const SUB_CALL_USER_TURN: &str =
    "Execute the research task described in your instructions. Return your findings as plain text.";

/// Declaration of the delegation tool offered to delegation-capable specialists.
pub fn delegation_tool(max_sub_calls: u32) -> ToolDeclaration {
    ToolDeclaration::Client {
        name: DELEGATION_TOOL_NAME.to_string(),
        description: format!(
            "Spawn a focused research sub-agent to investigate a specific claim, find evidence, or explore a \
             question in depth. The sub-agent has web search access and returns a research report. Use it when a \
             claim needs verification across several sources or tracing back to an original study; use web_search \
             directly for simple lookups. Limit to {max_sub_calls} sub-agents per analysis."
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "objective": {
                    "type": "string",
                    "description": "What the sub-agent should research: the exact claim, its context in the document, and the evidence to look for."
                },
                "return_format": {
                    "type": "string",
                    "description": "What the sub-agent should return, e.g. a summary of evidence for and against the claim with source URLs."
                }
            },
            "required": ["objective", "return_format"]
        }),
    }
}

/// Input of one delegation request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DelegationRequest {
    pub objective: String,
    pub return_format: String,
}

impl DelegationRequest {
    /// Validates a delegation tool input.
    ///
    /// # Errors
    /// Returns [`OrchestrationError::InvalidToolArguments`] if a required field
    /// is missing or not a string.
    pub fn from_input(input: &Value) -> Result<Self> {
        Self::deserialize(input).map_err(|e| OrchestrationError::InvalidToolArguments {
            tool: DELEGATION_TOOL_NAME.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Issues delegated research calls on behalf of a specialist.
#[derive(Debug, Clone)]
pub struct SubCallHandler<'a> {
    ctx: &'a EngineContext,
}

impl<'a> SubCallHandler<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// Runs one research call and returns its narrative text verbatim.
    ///
    /// The call gets its own framing naming `parent`, the smaller sub-call
    /// output allowance and web search. It is bounded by the sub-call timeout.
    ///
    /// # Errors
    /// Transport failures and timeouts are returned to the caller.
    pub async fn run(&self, parent: &str, request: &DelegationRequest) -> Result<String> {
        let config = &self.ctx.config;
        let completion = CompletionRequest::new(&config.model, config.sub_call_max_tokens)
            .with_system(instructions(parent, request))
            .with_messages(vec![Turn::user(SUB_CALL_USER_TURN)])
            .with_tools(vec![ToolDeclaration::web_search(config.web_search_max_uses)]);

        self.ctx.usage.record_sub_call();
        info!(parent = %parent, "Starting research sub-call");

        let response = tokio::time::timeout(config.sub_call_timeout(), self.ctx.transport.complete(&completion))
            .await
            .map_err(|_| OrchestrationError::Timeout {
                what: "Sub-agent".to_string(),
                seconds: config.sub_call_timeout_secs,
            })??;

        let decoded = decode(&response);
        if decoded.search_invocations > 0 {
            self.ctx.usage.record_searches(decoded.search_invocations as u64);
        }
        debug!(parent = %parent, searches = decoded.search_invocations, chars = decoded.text.len(), "Research sub-call finished");

        Ok(decoded.text)
    }
}

fn instructions(parent: &str, request: &DelegationRequest) -> String {
    format!(
        "You are a focused research sub-agent spawned by the {parent} specialist.\n\
         Research one specific question and return a concise, evidence-based report.\n\
         \n\
         INSTRUCTIONS:\n\
         1. Use web search to find relevant, authoritative sources\n\
         2. Cross-reference several sources when you can\n\
         3. Be specific about what you found and what the evidence says\n\
         4. Include source URLs for every claim\n\
         5. Stay under 500 words\n\
         6. If you cannot find reliable information, say so instead of speculating\n\
         \n\
         OBJECTIVE: {}\n\
         \n\
         RETURN FORMAT: {}",
        request.objective, request.return_format
    )
}
