//! Runtime configuration for the compaction engine.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variable overrides (e.g. `COMPACTION_DEFAULT_THRESHOLD`)
//! 2. Values from a TOML file passed to [`CompactionConfig::load`]
//! 3. Built-in defaults

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::policy::BudgetPolicy;

const DEFAULT_THRESHOLD: u64 = 30_000;
const DEFAULT_MAX_SUMMARY_TOKENS: u32 = 512;
const DEFAULT_SUMMARY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_CONCURRENT_SUMMARIES: usize = 4;
const DEFAULT_SUMMARIZER_URL: &str = "http://localhost:8080/v1";
const DEFAULT_SUMMARIZER_MODEL: &str = "qwen3-coder";

const ENV_DEFAULT_THRESHOLD: &str = "COMPACTION_DEFAULT_THRESHOLD";
const ENV_PROTECTED_TAIL: &str = "COMPACTION_PROTECTED_TAIL";
const ENV_MAX_SUMMARY_TOKENS: &str = "COMPACTION_MAX_SUMMARY_TOKENS";
const ENV_SUMMARY_TIMEOUT_SECS: &str = "COMPACTION_SUMMARY_TIMEOUT_SECS";
const ENV_SUMMARIZER_URL: &str = "COMPACTION_SUMMARIZER_URL";
const ENV_SUMMARIZER_MODEL: &str = "COMPACTION_SUMMARIZER_MODEL";
const ENV_SUMMARIZER_API_KEY: &str = "COMPACTION_SUMMARIZER_API_KEY";

/// OpenAI-compatible endpoint used by [`crate::RigSummarizer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerEndpoint {
    pub base_url: String,
    /// Most local servers accept any non-empty value.
    pub api_key: String,
    pub model: String,
}

impl Default for SummarizerEndpoint {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SUMMARIZER_URL.to_string(),
            api_key: "local".to_string(),
            model: DEFAULT_SUMMARIZER_MODEL.to_string(),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Threshold passed to the policy when the caller has none of its own.
    pub default_threshold: u64,
    /// Output-token cap for every summarizer call.
    pub max_summary_tokens: u32,
    /// Wall-clock limit for a single summarizer call.
    pub summary_timeout_secs: u64,
    /// Summarizer calls in flight per invocation.
    pub max_concurrent_summaries: usize,
    pub policy: BudgetPolicy,
    pub summarizer: SummarizerEndpoint,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            default_threshold: DEFAULT_THRESHOLD,
            max_summary_tokens: DEFAULT_MAX_SUMMARY_TOKENS,
            summary_timeout_secs: DEFAULT_SUMMARY_TIMEOUT_SECS,
            max_concurrent_summaries: DEFAULT_MAX_CONCURRENT_SUMMARIES,
            policy: BudgetPolicy::default(),
            summarizer: SummarizerEndpoint::default(),
        }
    }
}

impl CompactionConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config = Self::from_toml_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document. Missing keys fall back to defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("invalid compaction config")?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_parse::<u64>(ENV_DEFAULT_THRESHOLD)? {
            self.default_threshold = v;
        }
        if let Some(v) = env_parse::<usize>(ENV_PROTECTED_TAIL)? {
            self.policy.default_protected_tail = v;
        }
        if let Some(v) = env_parse::<u32>(ENV_MAX_SUMMARY_TOKENS)? {
            self.max_summary_tokens = v;
        }
        if let Some(v) = env_parse::<u64>(ENV_SUMMARY_TIMEOUT_SECS)? {
            self.summary_timeout_secs = v;
        }
        if let Ok(v) = env::var(ENV_SUMMARIZER_URL) {
            self.summarizer.base_url = v;
        }
        if let Ok(v) = env::var(ENV_SUMMARIZER_MODEL) {
            self.summarizer.model = v;
        }
        if let Ok(v) = env::var(ENV_SUMMARIZER_API_KEY) {
            self.summarizer.api_key = v;
        }
        Ok(())
    }

    pub fn summary_timeout(&self) -> Duration {
        Duration::from_secs(self.summary_timeout_secs)
    }

    /// Validate the config; return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.default_threshold == 0 {
            anyhow::bail!("default_threshold must be > 0");
        }
        if self.max_summary_tokens == 0 {
            anyhow::bail!("max_summary_tokens must be > 0");
        }
        if self.summary_timeout_secs == 0 {
            anyhow::bail!("summary_timeout_secs must be > 0");
        }
        if self.max_concurrent_summaries == 0 {
            anyhow::bail!("max_concurrent_summaries must be > 0");
        }
        if self.policy.unknown_model_ceiling == 0 {
            anyhow::bail!("policy.unknown_model_ceiling must be > 0");
        }
        Ok(())
    }
}

fn env_parse<T>(var: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{var} must be a number, got {raw:?}")),
        Err(_) => Ok(None),
    }
}
