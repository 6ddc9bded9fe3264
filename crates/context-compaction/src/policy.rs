//! Token budget policy: maps the active model to a compaction threshold
//! and a protected-tail size.
//!
//! The model table is injected configuration, not process-wide state, so
//! tests and callers can substitute their own tables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Threshold used for large-context models in the shipped table.
pub const LARGE_CONTEXT_THRESHOLD: u64 = 200_000;

/// Ceiling applied when the consuming model is unknown.
pub const DEFAULT_UNKNOWN_MODEL_CEILING: u64 = 30_000;

/// Number of most-recent records that are never compacted.
pub const DEFAULT_PROTECTED_TAIL: usize = 3;

/// Budget entry for one model identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelBudget {
    /// Fixed threshold for this model. `None` uses the caller's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u64>,
    /// Records at the end of the transcript exempt from compaction.
    #[serde(default = "default_protected_tail")]
    pub protected_tail: usize,
}

fn default_protected_tail() -> usize {
    DEFAULT_PROTECTED_TAIL
}

impl ModelBudget {
    /// A large-context model with an extended fixed threshold.
    pub fn large_context(threshold: u64) -> Self {
        Self {
            threshold: Some(threshold),
            protected_tail: DEFAULT_PROTECTED_TAIL,
        }
    }

    /// A recognized model that uses the caller's default threshold.
    pub fn standard() -> Self {
        Self {
            threshold: None,
            protected_tail: DEFAULT_PROTECTED_TAIL,
        }
    }
}

/// Model-aware compaction thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetPolicy {
    /// Upper bound on the threshold when no model is active.
    #[serde(default = "default_unknown_ceiling")]
    pub unknown_model_ceiling: u64,
    /// Tail size for models absent from the table.
    #[serde(default = "default_protected_tail")]
    pub default_protected_tail: usize,
    /// Known model identifiers.
    #[serde(default)]
    pub models: BTreeMap<String, ModelBudget>,
}

fn default_unknown_ceiling() -> u64 {
    DEFAULT_UNKNOWN_MODEL_CEILING
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        for id in [
            "gemini-2.5-pro",
            "gemini-2.5-flash",
            "gpt-4.1",
            "claude-sonnet-4-5",
        ] {
            models.insert(
                id.to_string(),
                ModelBudget::large_context(LARGE_CONTEXT_THRESHOLD),
            );
        }
        for id in ["gpt-4o", "gpt-4o-mini", "claude-3-5-haiku", "qwen3-coder"] {
            models.insert(id.to_string(), ModelBudget::standard());
        }
        Self {
            models,
            unknown_model_ceiling: DEFAULT_UNKNOWN_MODEL_CEILING,
            default_protected_tail: DEFAULT_PROTECTED_TAIL,
        }
    }
}

/// Outcome of comparing a transcript's size against the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetDecision {
    /// Within budget; pass the transcript through.
    WithinBudget { current_tokens: u64, threshold: u64 },
    /// Over budget; compaction required.
    OverBudget { current_tokens: u64, threshold: u64 },
}

impl BudgetDecision {
    pub fn should_compact(&self) -> bool {
        matches!(self, Self::OverBudget { .. })
    }

    pub fn threshold(&self) -> u64 {
        match self {
            Self::WithinBudget { threshold, .. } | Self::OverBudget { threshold, .. } => *threshold,
        }
    }
}

impl std::fmt::Display for BudgetDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WithinBudget {
                current_tokens,
                threshold,
            } => write!(f, "within_budget ({}/{})", current_tokens, threshold),
            Self::OverBudget {
                current_tokens,
                threshold,
            } => write!(
                f,
                "over_budget ({}/{}, {} over)",
                current_tokens,
                threshold,
                current_tokens.saturating_sub(*threshold)
            ),
        }
    }
}

impl BudgetPolicy {
    /// An empty table: every present model uses the default threshold.
    pub fn empty() -> Self {
        Self {
            models: BTreeMap::new(),
            unknown_model_ceiling: DEFAULT_UNKNOWN_MODEL_CEILING,
            default_protected_tail: DEFAULT_PROTECTED_TAIL,
        }
    }

    /// Add or replace a model entry.
    pub fn with_model(mut self, id: impl Into<String>, budget: ModelBudget) -> Self {
        self.models.insert(id.into(), budget);
        self
    }

    /// Token threshold above which the transcript is compacted.
    ///
    /// - table entry with a fixed threshold → that threshold
    /// - table entry without one, or an unlisted model → `default_threshold`
    /// - no active model → `min(default_threshold, unknown_model_ceiling)`
    pub fn threshold(&self, active_model: Option<&str>, default_threshold: u64) -> u64 {
        match active_model {
            Some(model) => self
                .models
                .get(model)
                .and_then(|b| b.threshold)
                .unwrap_or(default_threshold),
            None => default_threshold.min(self.unknown_model_ceiling),
        }
    }

    /// Number of most-recent records never touched by the compactor.
    pub fn protected_tail(&self, active_model: Option<&str>) -> usize {
        active_model
            .and_then(|m| self.models.get(m))
            .map(|b| b.protected_tail)
            .unwrap_or(self.default_protected_tail)
    }

    /// Compare a transcript size against the threshold for `active_model`.
    pub fn evaluate(
        &self,
        current_tokens: u64,
        active_model: Option<&str>,
        default_threshold: u64,
    ) -> BudgetDecision {
        let threshold = self.threshold(active_model, default_threshold);
        if current_tokens <= threshold {
            BudgetDecision::WithinBudget {
                current_tokens,
                threshold,
            }
        } else {
            BudgetDecision::OverBudget {
                current_tokens,
                threshold,
            }
        }
    }

    /// Whether `model` is configured with an extended threshold.
    pub fn is_large_context(&self, model: &str) -> bool {
        self.models
            .get(model)
            .is_some_and(|b| b.threshold.is_some())
    }
}
