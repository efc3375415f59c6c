//! Transport implementations for Forge.
//!
//! [`AnthropicClient`] implements [`forge_abstraction::CompletionTransport`]
//! over HTTP, in either direct or proxied [`ConnectionConfig`] mode.

pub mod client;
pub mod connection;
pub mod retry;

pub use client::AnthropicClient;
pub use connection::{ANTHROPIC_VERSION, ConnectionConfig, DIRECT_API_URL, MESSAGES_PATH, WEB_SEARCH_BETA};
pub use retry::RetryPolicy;
