//! CLI configuration file support.
//!
//! Configuration precedence:
//! 1. CLI arguments (handled by clap)
//! 2. Local config file (./.forgerc)
//! 3. Global config file (~/.forge/config.toml)
//! 4. Defaults

use std::path::{Path, PathBuf};

use forge_models::RetryPolicy;
use forge_orchestrator::{AnalysisOptions, EngineConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable read for the API key when none is configured.
pub const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// CLI configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Proxy base URL; when set, requests go through the proxy without a key.
    #[serde(default)]
    pub proxy_url: Option<String>,

    /// Environment variable holding the API key in direct mode.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Log level
    #[serde(default)]
    pub log_level: Option<String>,

    /// Output format (human, json)
    #[serde(default)]
    pub format: Option<String>,

    /// Replacement specialist catalogue
    #[serde(default)]
    pub catalogue: Option<PathBuf>,

    /// Engine parameter overrides
    #[serde(default)]
    pub engine: EngineOverrides,

    /// Default analysis switches
    #[serde(default)]
    pub analysis: AnalysisDefaults,
}

/// Optional overrides of [`EngineConfig`] and the retry policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOverrides {
    pub model: Option<String>,
    pub mechanical_model: Option<String>,
    pub max_tokens: Option<u32>,
    pub sub_call_max_tokens: Option<u32>,
    pub max_sub_calls: Option<u32>,
    pub batch_size: Option<usize>,
    pub batch_delay_ms: Option<u64>,
    pub max_turns: Option<u32>,
    pub specialist_timeout_secs: Option<u64>,
    pub sub_call_timeout_secs: Option<u64>,
    pub retry_max: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

/// Analysis switches applied unless a flag turns them on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisDefaults {
    pub web_search: Option<bool>,
    pub delegation: Option<bool>,
    pub mechanical_pass: Option<bool>,
    pub extended_thinking: Option<bool>,
    pub math_search: Option<bool>,
}

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum CliConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),
}

/// Result type for configuration operations.
pub type CliConfigResult<T> = std::result::Result<T, CliConfigError>;

macro_rules! override_some {
    ($target:expr, $source:expr, [$($field:ident),* $(,)?]) => {
        $(
            if let Some(ref value) = $source.$field {
                $target.$field = Some(value.clone());
            }
        )*
    };
}

impl CliConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> CliConfigResult<Self> {
        if !path.exists() {
            return Err(CliConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| CliConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content).map_err(|e| CliConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Get default global configuration file path.
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME").map_or_else(|_| PathBuf::from("."), PathBuf::from).join(".forge").join("config.toml")
    }

    /// Get default local configuration file path.
    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".forgerc")
    }

    /// Discover and load configuration files.
    ///
    /// Missing files are skipped. A file that exists but cannot be read or
    /// parsed is an error.
    pub fn discover_and_load() -> CliConfigResult<Self> {
        let mut config = Self::default();

        for path in [Self::default_global_path(), Self::default_local_path()] {
            match Self::load_from_file(&path) {
                Ok(found) => config.merge(&found),
                Err(CliConfigError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(config)
    }

    /// Merge another configuration into this one.
    ///
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &Self) {
        override_some!(self, other, [proxy_url, api_key_env, log_level, format, catalogue]);
        override_some!(
            self.engine,
            other.engine,
            [
                model,
                mechanical_model,
                max_tokens,
                sub_call_max_tokens,
                max_sub_calls,
                batch_size,
                batch_delay_ms,
                max_turns,
                specialist_timeout_secs,
                sub_call_timeout_secs,
                retry_max,
                retry_delay_ms,
            ]
        );
        override_some!(
            self.analysis,
            other.analysis,
            [web_search, delegation, mechanical_pass, extended_thinking, math_search]
        );
    }

    /// Engine configuration with the overrides applied to the defaults.
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        let o = &self.engine;
        if let Some(ref model) = o.model {
            config.model.clone_from(model);
        }
        if let Some(ref model) = o.mechanical_model {
            config.mechanical_model.clone_from(model);
        }
        config.max_tokens = o.max_tokens.unwrap_or(config.max_tokens);
        config.sub_call_max_tokens = o.sub_call_max_tokens.unwrap_or(config.sub_call_max_tokens);
        config.max_sub_calls = o.max_sub_calls.unwrap_or(config.max_sub_calls);
        config.batch_size = o.batch_size.unwrap_or(config.batch_size);
        config.batch_delay_ms = o.batch_delay_ms.unwrap_or(config.batch_delay_ms);
        config.max_turns = o.max_turns.unwrap_or(config.max_turns);
        config.specialist_timeout_secs = o.specialist_timeout_secs.unwrap_or(config.specialist_timeout_secs);
        config.sub_call_timeout_secs = o.sub_call_timeout_secs.unwrap_or(config.sub_call_timeout_secs);
        config
    }

    /// Retry policy with the overrides applied to the defaults.
    pub fn retry_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::default();
        policy.max_retries = self.engine.retry_max.unwrap_or(policy.max_retries);
        if let Some(ms) = self.engine.retry_delay_ms {
            policy.delay = std::time::Duration::from_millis(ms);
        }
        policy
    }

    /// Analysis options from the configured defaults.
    pub fn analysis_options(&self) -> AnalysisOptions {
        let a = &self.analysis;
        let options = AnalysisOptions {
            web_search: a.web_search.unwrap_or(false),
            delegation: a.delegation.unwrap_or(false),
            mechanical_pass: a.mechanical_pass.unwrap_or(false),
            extended_thinking: a.extended_thinking.unwrap_or(false),
            ..AnalysisOptions::default()
        };
        if a.math_search.unwrap_or(false) { options.with_quantitative_search() } else { options }
    }

    /// Name of the environment variable holding the API key.
    pub fn api_key_env(&self) -> &str {
        self.api_key_env.as_deref().unwrap_or(DEFAULT_API_KEY_ENV)
    }
}
