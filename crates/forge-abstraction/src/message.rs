//! Conversation turns and the Messages API request/response envelopes.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// `type` of the server-executed web search tool.
pub const WEB_SEARCH_TOOL_TYPE: &str = "web_search_20250305";

/// Name the service reports for web search invocations.
pub const WEB_SEARCH_TOOL_NAME: &str = "web_search";

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Caller-authored turn (document, tool results).
    User,
    /// Model-authored turn.
    Assistant,
}

/// Body of a turn.
///
/// Assistant turns are echoed back verbatim as raw blocks so that server tool
/// results and reasoning blocks survive the round trip untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    /// Plain text.
    Text(String),
    /// Raw content blocks.
    Blocks(Vec<Value>),
}

/// One entry of the append-only conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Who authored the turn.
    pub role: Role,
    /// What was said.
    pub content: TurnContent,
}

impl Turn {
    /// A user turn carrying plain text.
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: TurnContent::Text(text.into()) }
    }

    /// The model's turn, echoed as it was received.
    pub fn assistant_blocks(blocks: Vec<Value>) -> Self {
        Self { role: Role::Assistant, content: TurnContent::Blocks(blocks) }
    }

    /// A user turn answering the model's tool invocations.
    pub fn tool_results(results: &[ToolResult]) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::Blocks(results.iter().map(ToolResult::to_block).collect()),
        }
    }
}

/// Answer to one client-side tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    /// Identifier of the invocation being answered.
    pub tool_use_id: String,
    /// Text handed back to the model.
    pub content: String,
    /// Marks the result as a failure the model should work around.
    pub is_error: bool,
}

impl ToolResult {
    /// A successful result.
    pub fn success(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { tool_use_id: tool_use_id.into(), content: content.into(), is_error: false }
    }

    /// An error-flagged result.
    pub fn error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { tool_use_id: tool_use_id.into(), content: content.into(), is_error: true }
    }

    /// Wire form of the result block.
    pub fn to_block(&self) -> Value {
        let mut block = json!({
            "type": "tool_result",
            "tool_use_id": self.tool_use_id,
            "content": self.content,
        });
        if self.is_error {
            block["is_error"] = Value::Bool(true);
        }
        block
    }
}

/// A tool the model may invoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolDeclaration {
    /// A tool executed by the service itself (web search).
    Server {
        /// Versioned tool type.
        #[serde(rename = "type")]
        kind: String,
        /// Tool name.
        name: String,
        /// Per-request invocation ceiling.
        max_uses: u32,
    },
    /// A tool executed by this process.
    Client {
        /// Tool name.
        name: String,
        /// What the tool does, shown to the model.
        description: String,
        /// JSON schema of the tool input.
        input_schema: Value,
    },
}

impl ToolDeclaration {
    /// The server-side web search tool.
    pub fn web_search(max_uses: u32) -> Self {
        Self::Server {
            kind: WEB_SEARCH_TOOL_TYPE.to_string(),
            name: WEB_SEARCH_TOOL_NAME.to_string(),
            max_uses,
        }
    }

    /// Tool name.
    pub fn name(&self) -> &str {
        match self {
            Self::Server { name, .. } | Self::Client { name, .. } => name,
        }
    }

    /// Whether this is the server web search tool.
    pub fn is_web_search(&self) -> bool {
        matches!(self, Self::Server { kind, .. } if kind == WEB_SEARCH_TOOL_TYPE)
    }
}

/// Extended reasoning request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThinkingDirective {
    /// Reason privately with the given budget before answering.
    Enabled {
        /// Tokens reserved for reasoning.
        budget_tokens: u32,
    },
}

/// Request body for one Messages API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// Output-size cap.
    pub max_tokens: u32,
    /// System framing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Conversation so far.
    pub messages: Vec<Turn>,
    /// Declared tools.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDeclaration>,
    /// Extended reasoning directive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingDirective>,
}

impl CompletionRequest {
    /// A request with no framing, turns or tools.
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            system: None,
            messages: Vec::new(),
            tools: Vec::new(),
            thinking: None,
        }
    }

    /// Sets the system framing.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Sets the conversation.
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<Turn>) -> Self {
        self.messages = messages;
        self
    }

    /// Sets the declared tools.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDeclaration>) -> Self {
        self.tools = tools;
        self
    }

    /// Requests extended reasoning.
    #[must_use]
    pub fn with_thinking(mut self, budget_tokens: u32) -> Self {
        self.thinking = Some(ThinkingDirective::Enabled { budget_tokens });
        self
    }

    /// Whether any declared tool is the server web search tool.
    pub fn declares_web_search(&self) -> bool {
        self.tools.iter().any(ToolDeclaration::is_web_search)
    }
}

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural completion.
    EndTurn,
    /// The model is waiting on client tool results.
    ToolUse,
    /// Output cap reached.
    MaxTokens,
    /// A stop sequence matched.
    StopSequence,
    /// A long server-tool turn was paused and can be resumed.
    PauseTurn,
    /// The model declined to answer.
    Refusal,
    /// Anything newer than this client.
    #[serde(other)]
    Other,
}

/// Token counts for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens billed.
    #[serde(default)]
    pub input_tokens: u64,
    /// Output tokens billed.
    #[serde(default)]
    pub output_tokens: u64,
}

/// Response envelope for one Messages API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Raw content blocks, in order.
    #[serde(default)]
    pub content: Vec<Value>,
    /// Stop condition.
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    /// Token counts.
    #[serde(default)]
    pub usage: Usage,
}

impl CompletionResponse {
    /// A response made of a single text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![json!({ "type": "text", "text": text.into() })],
            stop_reason: Some(StopReason::EndTurn),
            usage: Usage::default(),
        }
    }
}
