//! Engine configuration and per-run analysis options.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Id of the quantitative specialist whose search can be forced on.
pub const QUANTITATIVE_SPECIALIST: &str = "math";

/// Fixed engine parameters.
///
/// Defaults reproduce the production profile; every field can be overridden
/// from a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Model used by specialists, sub-calls and both refinement passes.
    pub model: String,
    /// Smaller, faster model used by the mechanical-correctness pass.
    pub mechanical_model: String,
    /// Output cap for specialist and refinement calls.
    pub max_tokens: u32,
    /// Output cap for delegated sub-calls.
    pub sub_call_max_tokens: u32,
    /// Delegated sub-calls allowed per specialist.
    pub max_sub_calls: u32,
    /// Specialists started together.
    pub batch_size: usize,
    /// Pause between batches, in milliseconds.
    pub batch_delay_ms: u64,
    /// Safety bound on request/response turns per specialist.
    pub max_turns: u32,
    /// Wall-clock allowance for one specialist, in seconds.
    pub specialist_timeout_secs: u64,
    /// Wall-clock allowance for one sub-call, in seconds.
    pub sub_call_timeout_secs: u64,
    /// Output cap on the first turn when extended thinking is on.
    pub thinking_max_tokens: u32,
    /// Reasoning budget when extended thinking is on.
    pub thinking_budget_tokens: u32,
    /// Per-request ceiling on server web searches.
    pub web_search_max_uses: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-6".to_string(),
            mechanical_model: "claude-haiku-4-5-20251001".to_string(),
            max_tokens: 16_000,
            sub_call_max_tokens: 4_000,
            max_sub_calls: 3,
            batch_size: 2,
            batch_delay_ms: 15_000,
            max_turns: 10,
            specialist_timeout_secs: 180,
            sub_call_timeout_secs: 60,
            thinking_max_tokens: 32_000,
            thinking_budget_tokens: 10_000,
            web_search_max_uses: 5,
        }
    }
}

impl EngineConfig {
    /// Pause between batches.
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// Wall-clock allowance for one specialist.
    pub fn specialist_timeout(&self) -> Duration {
        Duration::from_secs(self.specialist_timeout_secs)
    }

    /// Wall-clock allowance for one sub-call.
    pub fn sub_call_timeout(&self) -> Duration {
        Duration::from_secs(self.sub_call_timeout_secs)
    }

    /// Batch size, never zero.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    /// Turn bound, never zero.
    pub fn effective_max_turns(&self) -> u32 {
        self.max_turns.max(1)
    }
}

/// Caller-chosen switches for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Let search-capable specialists use web search.
    pub web_search: bool,
    /// Let delegation-capable specialists spawn research sub-calls.
    pub delegation: bool,
    /// Run the mechanical-correctness pass after phase 1.
    pub mechanical_pass: bool,
    /// Ask for extended reasoning on each specialist's first turn.
    pub extended_thinking: bool,
    /// Specialists whose search is enabled regardless of `web_search`.
    pub force_search: BTreeSet<String>,
}

impl AnalysisOptions {
    /// Forces search on for the quantitative specialist.
    #[must_use]
    pub fn with_quantitative_search(mut self) -> Self {
        self.force_search.insert(QUANTITATIVE_SPECIALIST.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.batch_delay(), Duration::from_secs(15));
        assert_eq!(config.max_sub_calls, 3);
        assert_eq!(config.max_turns, 10);
        assert_eq!(config.sub_call_max_tokens, 4_000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str("batch_size = 3\nmodel = \"claude-opus-4-5\"").unwrap();
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.model, "claude-opus-4-5");
        assert_eq!(config.max_tokens, 16_000);
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let config = EngineConfig { batch_size: 0, ..EngineConfig::default() };
        assert_eq!(config.effective_batch_size(), 1);
    }

    #[test]
    fn test_zero_max_turns_is_clamped() {
        let config = EngineConfig { max_turns: 0, ..EngineConfig::default() };
        assert_eq!(config.effective_max_turns(), 1);
        assert_eq!(EngineConfig::default().effective_max_turns(), 10);
    }

    #[test]
    fn test_quantitative_search() {
        let options = AnalysisOptions::default().with_quantitative_search();
        assert!(options.force_search.contains("math"));
        assert!(!options.web_search);
    }
}
