//! Response decoding.
//!
//! A response is a list of typed content blocks. Only `text` blocks carry the
//! model's narrative; reasoning blocks and server tool echoes are skipped.
//! Client tool invocations and server search invocations are surfaced
//! separately so the tool-use loop can act on them and count them.

use serde::Deserialize;
use serde_json::Value;

use crate::message::{CompletionResponse, WEB_SEARCH_TOOL_NAME};

/// One decoded content block.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Narrative text.
    Text {
        /// The text itself.
        text: String,
    },
    /// The model asks this process to run a tool.
    ToolUse {
        /// Opaque invocation identifier.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input.
        #[serde(default)]
        input: Value,
    },
    /// The service ran one of its own tools (web search).
    ServerToolUse {
        /// Opaque invocation identifier.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input.
        #[serde(default)]
        input: Value,
    },
    /// Reasoning traces, server tool results and anything unrecognised.
    #[serde(other)]
    Other,
}

/// A client-side tool invocation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// Opaque invocation identifier, echoed in the tool result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool input.
    pub input: Value,
}

/// Everything the orchestration engine needs from one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedResponse {
    /// Text blocks joined with newlines, in block order. Empty means no output.
    pub text: String,
    /// Client tool invocations, in block order.
    pub tool_invocations: Vec<ToolInvocation>,
    /// Number of server web search invocations.
    pub search_invocations: usize,
}

/// Decodes raw blocks; malformed blocks decode as [`ContentBlock::Other`].
pub fn decode_blocks(content: &[Value]) -> Vec<ContentBlock> {
    content
        .iter()
        .map(|raw| ContentBlock::deserialize(raw).unwrap_or(ContentBlock::Other))
        .collect()
}

/// Joins the text blocks.
pub fn extract_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decodes a response envelope.
pub fn decode(response: &CompletionResponse) -> DecodedResponse {
    let blocks = decode_blocks(&response.content);
    let text = extract_text(&blocks);

    let mut tool_invocations = Vec::new();
    let mut search_invocations = 0;
    for block in blocks {
        match block {
            ContentBlock::ToolUse { id, name, input } => {
                tool_invocations.push(ToolInvocation { id, name, input });
            }
            ContentBlock::ServerToolUse { name, .. } if name == WEB_SEARCH_TOOL_NAME => {
                search_invocations += 1;
            }
            _ => {}
        }
    }

    DecodedResponse { text, tool_invocations, search_invocations }
}
