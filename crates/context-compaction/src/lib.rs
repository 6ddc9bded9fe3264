//! Context Compaction Library
//!
//! Keeps an agent transcript inside a model's token budget before each turn:
//! - Budget policy: model-aware compaction thresholds and protected tails
//! - Compactor: bounded, concurrent summarization of eligible older records
//! - Relevance pruner: placeholders for tool output about unrelated files
//! - Orchestrator: budget check → compaction → pruning, with stage fallback
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use context_compaction::{
//!     CharCountEstimator, CompactionConfig, CompactionOrchestrator, RigSummarizer,
//! };
//!
//! # async fn turn(records: Vec<context_compaction::Record>) -> anyhow::Result<()> {
//! let config = CompactionConfig::from_env()?;
//! let summarizer = Arc::new(RigSummarizer::from_endpoint(&config.summarizer)?);
//! let orchestrator =
//!     CompactionOrchestrator::from_config(&config, summarizer, Arc::new(CharCountEstimator::default()));
//!
//! let (records, stats) = orchestrator
//!     .compact_for_query(&records, None, Some("gpt-4o"), "fix app/auth.py login bug")
//!     .await;
//! tracing::info!(saved = stats.tokens_saved(), kept = records.len(), "context ready");
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod compactor;
pub mod config;
pub mod errors;
pub mod observability;
pub mod orchestrator;
pub mod policy;
pub mod pruner;
pub mod record;
pub mod rig_summarizer;
pub mod state_machine;
pub mod summarizer;
pub mod token;

pub use compactor::{CompactionPass, CompactionPassStats, Compactor};
pub use config::{CompactionConfig, SummarizerEndpoint};
pub use errors::{CompactionErrorKind, PipelineError, SummarizationError};
pub use observability::{CompactionObserver, ObserverStats, TurnMetrics};
pub use orchestrator::{CompactionOrchestrator, CompactionReport, CompactionStats, StageOutcome};
pub use policy::{BudgetDecision, BudgetPolicy, ModelBudget};
pub use pruner::{PrunePass, RelevancePruner};
pub use record::{total_tokens, Record, RecordState, Role};
pub use rig_summarizer::RigSummarizer;
pub use state_machine::{PipelineState, TransitionRecord};
pub use summarizer::{MockSummarizer, SummaryRequest, SummaryStyle, Summarizer};
pub use token::{CharCountEstimator, TokenCounter, WordCountEstimator};
