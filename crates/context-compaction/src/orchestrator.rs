//! Compaction orchestrator: budget check, compaction, then relevance pruning.
//!
//! One call per inbound turn. Each stage is isolated: an invalid transcript or
//! a panicking collaborator makes that stage fall back to its input, and the
//! run continues. The orchestrator never returns an error.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::compactor::{CompactionPassStats, Compactor};
use crate::config::CompactionConfig;
use crate::errors::PipelineError;
use crate::policy::{BudgetDecision, BudgetPolicy};
use crate::pruner::RelevancePruner;
use crate::record::{total_tokens, Record};
use crate::state_machine::{PipelineState, StateMachine, TransitionRecord};
use crate::summarizer::Summarizer;
use crate::token::TokenCounter;

/// Before/after figures for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionStats {
    /// True when the transcript was over budget and the pipeline ran.
    pub was_compacted: bool,
    pub original_tokens: u64,
    pub compacted_tokens: u64,
    pub record_count_before: usize,
    pub record_count_after: usize,
    /// Summarizer name, when at least one summary was requested.
    pub summarizer_used: Option<String>,
}

impl CompactionStats {
    fn unchanged(records: &[Record]) -> Self {
        let tokens = total_tokens(records);
        Self {
            was_compacted: false,
            original_tokens: tokens,
            compacted_tokens: tokens,
            record_count_before: records.len(),
            record_count_after: records.len(),
            summarizer_used: None,
        }
    }

    pub fn tokens_saved(&self) -> u64 {
        self.original_tokens.saturating_sub(self.compacted_tokens)
    }

    /// `compacted / original`, or 1.0 for an empty transcript.
    pub fn ratio(&self) -> f64 {
        if self.original_tokens == 0 {
            1.0
        } else {
            self.compacted_tokens as f64 / self.original_tokens as f64
        }
    }
}

/// Result of one isolated stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Completed(T),
    /// The stage failed; `value` is the input it was given.
    FellBack { value: T, error: PipelineError },
}

impl<T> StageOutcome<T> {
    pub fn value(&self) -> &T {
        match self {
            Self::Completed(v) | Self::FellBack { value: v, .. } => v,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Completed(v) | Self::FellBack { value: v, .. } => v,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            Self::Completed(_) => None,
            Self::FellBack { error, .. } => Some(error),
        }
    }

    pub fn fell_back(&self) -> bool {
        matches!(self, Self::FellBack { .. })
    }
}

/// Full trace of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionReport {
    pub stats: CompactionStats,
    pub decision: BudgetDecision,
    pub transitions: Vec<TransitionRecord>,
    /// Compactor counters; absent on pass-through or compactor fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction: Option<CompactionPassStats>,
    /// Per-record summarizer failures absorbed by the compactor.
    pub compaction_failures: usize,
    pub records_pruned: usize,
    /// Stage-level errors that triggered a fallback.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<PipelineError>,
    pub duration_ms: u64,
}

impl CompactionReport {
    pub fn had_fallback(&self) -> bool {
        !self.fallbacks.is_empty()
    }
}

/// Entry point for the compaction pipeline.
///
/// Holds read-only collaborators only, so one instance can serve concurrent
/// invocations on different transcripts.
pub struct CompactionOrchestrator {
    policy: BudgetPolicy,
    default_threshold: u64,
    compactor: Compactor,
    pruner: RelevancePruner,
}

impl CompactionOrchestrator {
    /// Default configuration and model table.
    pub fn new(summarizer: Arc<dyn Summarizer>, counter: Arc<dyn TokenCounter>) -> Self {
        Self::from_config(&CompactionConfig::default(), summarizer, counter)
    }

    pub fn from_config(
        config: &CompactionConfig,
        summarizer: Arc<dyn Summarizer>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            policy: config.policy.clone(),
            default_threshold: config.default_threshold,
            compactor: Compactor::with_config(summarizer, counter.clone(), config),
            pruner: RelevancePruner::new(counter),
        }
    }

    /// Replace the model table.
    pub fn with_policy(mut self, policy: BudgetPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &BudgetPolicy {
        &self.policy
    }

    /// Compare `records` against the threshold for `active_model`.
    pub fn evaluate(
        &self,
        records: &[Record],
        threshold: Option<u64>,
        active_model: Option<&str>,
    ) -> BudgetDecision {
        self.policy.evaluate(
            total_tokens(records),
            active_model,
            threshold.unwrap_or(self.default_threshold),
        )
    }

    /// Compact without relevance pruning.
    ///
    /// `threshold` is the caller's default; `None` uses the configured one.
    pub async fn compact(
        &self,
        records: &[Record],
        threshold: Option<u64>,
        active_model: Option<&str>,
    ) -> (Vec<Record>, CompactionStats) {
        let (records, report) = self.run(records, threshold, active_model, None).await;
        (records, report.stats)
    }

    /// Compact, then prune tool output unrelated to `current_query`.
    pub async fn compact_for_query(
        &self,
        records: &[Record],
        threshold: Option<u64>,
        active_model: Option<&str>,
        current_query: &str,
    ) -> (Vec<Record>, CompactionStats) {
        let (records, report) = self
            .run(records, threshold, active_model, Some(current_query))
            .await;
        (records, report.stats)
    }

    /// Relevance pruning alone, outside the budget pipeline.
    pub fn prune(&self, records: &[Record], current_query: &str) -> Vec<Record> {
        self.prune_stage(records, current_query).into_value().0
    }

    /// Run the full pipeline and return a detailed report.
    pub async fn run(
        &self,
        records: &[Record],
        threshold: Option<u64>,
        active_model: Option<&str>,
        current_query: Option<&str>,
    ) -> (Vec<Record>, CompactionReport) {
        let started = Instant::now();
        let mut sm = StateMachine::new();

        let decision = self.evaluate(records, threshold, active_model);
        step(&mut sm, PipelineState::BudgetChecked, None);

        if !decision.should_compact() {
            debug!(%decision, model = active_model, "transcript within budget");
            step(&mut sm, PipelineState::PassThrough, Some("within_budget"));
            step(&mut sm, PipelineState::Done, None);
            debug!(trace = %sm.summary(), "pipeline finished");
            let report = CompactionReport {
                stats: CompactionStats::unchanged(records),
                decision,
                transitions: sm.into_transitions(),
                compaction: None,
                compaction_failures: 0,
                records_pruned: 0,
                fallbacks: Vec::new(),
                duration_ms: started.elapsed().as_millis() as u64,
            };
            return (records.to_vec(), report);
        }

        info!(%decision, model = active_model, "transcript over budget; compacting");
        step(&mut sm, PipelineState::Compacting, Some("over_budget"));

        let keep_tail = self.policy.protected_tail(active_model);
        let mut fallbacks = Vec::new();

        let (compacted, pass_stats) = match self.compact_stage(records, keep_tail).await {
            StageOutcome::Completed((recs, stats)) => (recs, Some(stats)),
            StageOutcome::FellBack { value, error } => {
                warn!(error = %error, "compaction stage failed; continuing with original records");
                fallbacks.push(error);
                (value.0, None)
            }
        };

        step(&mut sm, PipelineState::Pruning, None);

        let (output, records_pruned) = match current_query {
            Some(query) => match self.prune_stage(&compacted, query) {
                StageOutcome::Completed((recs, n)) => (recs, n),
                StageOutcome::FellBack { value, error } => {
                    warn!(error = %error, "pruning stage failed; keeping compacted records");
                    fallbacks.push(error);
                    value
                }
            },
            None => (compacted, 0),
        };

        step(&mut sm, PipelineState::Done, None);

        let compacted_tokens = total_tokens(&output);
        let summarizer_used = pass_stats
            .as_ref()
            .filter(|s| s.summarizer_calls > 0)
            .map(|_| self.compactor.summarizer_name().to_string());
        let stats = CompactionStats {
            was_compacted: true,
            original_tokens: total_tokens(records),
            compacted_tokens,
            record_count_before: records.len(),
            record_count_after: output.len(),
            summarizer_used,
        };

        let records_compacted = pass_stats.as_ref().map_or(0, |s| s.records_compacted);
        info!(
            tokens_before = stats.original_tokens,
            tokens_after = stats.compacted_tokens,
            records_compacted,
            records_pruned,
            ratio = stats.ratio(),
            trace = %sm.summary(),
            "compaction complete"
        );

        let report = CompactionReport {
            compaction_failures: pass_stats.as_ref().map_or(0, |s| s.summary_failures),
            compaction: pass_stats,
            stats,
            decision,
            transitions: sm.into_transitions(),
            records_pruned,
            fallbacks,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        (output, report)
    }

    async fn compact_stage(
        &self,
        records: &[Record],
        keep_tail: usize,
    ) -> StageOutcome<(Vec<Record>, CompactionPassStats)> {
        let fallback = || (records.to_vec(), CompactionPassStats::default());
        match AssertUnwindSafe(self.compactor.compact_eligible(records, keep_tail))
            .catch_unwind()
            .await
        {
            Ok(Ok(pass)) => StageOutcome::Completed((pass.records, pass.stats)),
            Ok(Err(error)) => StageOutcome::FellBack {
                value: fallback(),
                error,
            },
            Err(payload) => StageOutcome::FellBack {
                value: fallback(),
                error: PipelineError::from_panic("compactor", payload),
            },
        }
    }

    fn prune_stage(&self, records: &[Record], query: &str) -> StageOutcome<(Vec<Record>, usize)> {
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.pruner.prune(records, query))) {
            Ok(pass) => StageOutcome::Completed((pass.records, pass.records_pruned)),
            Err(payload) => StageOutcome::FellBack {
                value: (records.to_vec(), 0),
                error: PipelineError::from_panic("pruner", payload),
            },
        }
    }
}

/// Advance the run's state machine. Edges are fixed by `run`, so a refusal
/// is only logged.
fn step(sm: &mut StateMachine, to: PipelineState, reason: Option<&str>) {
    if let Err(e) = sm.advance(to, reason) {
        warn!(error = %e, "unexpected pipeline transition");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ModelBudget;
    use crate::record::Role;
    use crate::summarizer::MockSummarizer;
    use crate::token::CharCountEstimator;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn counter() -> Arc<dyn TokenCounter> {
        Arc::new(CharCountEstimator::default())
    }

    fn transcript(n: usize) -> Vec<Record> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let (role, body) = match i % 3 {
                    0 => (Role::Originator, format!("request {i}")),
                    1 => (
                        Role::ToolOutput,
                        format!("File: app/mod{i}.py\n{}", "data row\n".repeat(40)),
                    ),
                    _ => (
                        Role::Responder,
                        format!("analysis {i}: {}", "reasoning text ".repeat(30)),
                    ),
                };
                Record::counted(role, body, &CharCountEstimator::default())
                    .with_id(format!("r{i}"))
                    .with_created_at(base + ChronoDuration::seconds(i as i64))
            })
            .collect()
    }

    fn orchestrator(summarizer: Arc<MockSummarizer>) -> CompactionOrchestrator {
        CompactionOrchestrator::new(summarizer, counter())
    }

    #[tokio::test]
    async fn test_under_budget_passes_through() {
        let records = transcript(6);
        let summarizer = Arc::new(MockSummarizer::new());
        let (out, report) = orchestrator(summarizer.clone())
            .run(&records, Some(1_000_000), Some("gpt-4o"), Some("fix app/mod1.py"))
            .await;
        assert_eq!(out, records);
        assert!(!report.stats.was_compacted);
        assert_eq!(report.stats.original_tokens, report.stats.compacted_tokens);
        assert_eq!(summarizer.calls(), 0);
        let states: Vec<PipelineState> = report.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![
                PipelineState::BudgetChecked,
                PipelineState::PassThrough,
                PipelineState::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_over_budget_compacts_and_keeps_tail() {
        let records = transcript(12);
        let summarizer = Arc::new(MockSummarizer::new());
        let (out, report) = orchestrator(summarizer.clone())
            .run(&records, Some(100), None, None)
            .await;
        assert!(report.stats.was_compacted);
        assert!(report.stats.compacted_tokens < report.stats.original_tokens);
        assert_eq!(report.stats.summarizer_used.as_deref(), Some("mock-summarizer"));
        assert_eq!(&out[9..], &records[9..]);
        assert_eq!(out.len(), records.len());
        assert_eq!(report.transitions.last().map(|t| t.to), Some(PipelineState::Done));
        assert!(!report.had_fallback());
    }

    #[tokio::test]
    async fn test_model_tail_size_honored() {
        let records = transcript(12);
        let policy = BudgetPolicy::empty().with_model(
            "wide-tail",
            ModelBudget {
                threshold: None,
                protected_tail: 6,
            },
        );
        let orch = orchestrator(Arc::new(MockSummarizer::new())).with_policy(policy);
        let (out, stats) = orch.compact(&records, Some(100), Some("wide-tail")).await;
        assert!(stats.was_compacted);
        assert_eq!(&out[6..], &records[6..]);
    }

    #[tokio::test]
    async fn test_invalid_transcript_falls_back() {
        let mut records = transcript(9);
        records[4].id = records[0].id.clone();
        let (out, report) = orchestrator(Arc::new(MockSummarizer::new()))
            .run(&records, Some(100), None, None)
            .await;
        assert_eq!(out, records);
        assert!(report.stats.was_compacted);
        assert_eq!(report.stats.compacted_tokens, report.stats.original_tokens);
        assert!(matches!(
            report.fallbacks.as_slice(),
            [PipelineError::InvalidInput(_)]
        ));
        assert!(report.compaction.is_none());
    }

    #[tokio::test]
    async fn test_panicking_summarizer_is_a_per_record_failure() {
        let records = transcript(9);
        let (out, report) = orchestrator(Arc::new(MockSummarizer::panicking()))
            .run(&records, Some(100), None, Some("fix app/mod1.py"))
            .await;
        assert!(!report.had_fallback());
        assert!(report.compaction_failures > 0);
        assert_eq!(report.compaction.map(|c| c.records_compacted), Some(0));
        assert!(report.records_pruned > 0);
        assert_eq!(out.len(), records.len());
        assert!(report.stats.compacted_tokens <= report.stats.original_tokens);
    }

    #[tokio::test]
    async fn test_one_panicking_call_keeps_other_summaries() {
        let mut records = transcript(9);
        records[2].body = format!("boom {}", records[2].body);
        records[2].token_count = CharCountEstimator::default().count(&records[2].body);
        let (out, report) = orchestrator(Arc::new(MockSummarizer::panicking_on("boom")))
            .run(&records, Some(100), None, None)
            .await;

        assert!(!report.had_fallback());
        assert_eq!(report.compaction_failures, 1);
        assert_eq!(out[2], records[2]);
        assert!(out[1].is_compacted());
        assert!(out[4].is_compacted());
        assert!(report.stats.tokens_saved() > 0);
    }

    /// Counter that panics when asked to size a compacted body.
    struct PanicOnCompressed;

    impl TokenCounter for PanicOnCompressed {
        fn count(&self, text: &str) -> u64 {
            if text.starts_with("[COMPRESSED]") {
                panic!("counter exploded");
            }
            CharCountEstimator::default().count(text)
        }

        fn name(&self) -> &str {
            "panic-on-compressed"
        }
    }

    #[tokio::test]
    async fn test_compactor_stage_panic_falls_back() {
        let records = transcript(9);
        let orch = CompactionOrchestrator::new(
            Arc::new(MockSummarizer::new()),
            Arc::new(PanicOnCompressed),
        );
        let (out, report) = orch.run(&records, Some(100), None, Some("fix app/mod1.py")).await;
        assert!(matches!(
            report.fallbacks.first(),
            Some(PipelineError::StagePanicked { stage, detail })
                if stage == "compactor" && detail == "counter exploded"
        ));
        // Pruning still ran on the original records.
        assert!(report.records_pruned > 0);
        assert_eq!(out.len(), records.len());
        assert!(report.stats.compacted_tokens <= report.stats.original_tokens);
    }

    #[tokio::test]
    async fn test_failing_summarizer_counts_failures() {
        let records = transcript(9);
        let (out, report) = orchestrator(Arc::new(MockSummarizer::failing()))
            .run(&records, Some(100), None, None)
            .await;
        assert_eq!(out, records);
        assert!(report.compaction_failures > 0);
        assert!(!report.had_fallback());
        assert_eq!(report.stats.summarizer_used.as_deref(), Some("mock-summarizer-fail"));
    }

    #[tokio::test]
    async fn test_prune_standalone() {
        let records = transcript(3);
        let orch = orchestrator(Arc::new(MockSummarizer::new()));
        let out = orch.prune(&records, "fix app/other.py");
        assert!(out[1].body.starts_with("[PRUNED: Analyzed app/mod1.py]"));
        assert_eq!(out[0], records[0]);
        assert_eq!(out[2], records[2]);
    }

    #[test]
    fn test_stage_outcome_accessors() {
        let ok: StageOutcome<u32> = StageOutcome::Completed(3);
        assert!(!ok.fell_back());
        assert_eq!(*ok.value(), 3);
        let fb = StageOutcome::FellBack {
            value: 7u32,
            error: PipelineError::InvalidInput("dup".into()),
        };
        assert!(fb.fell_back());
        assert!(fb.error().is_some());
        assert_eq!(fb.into_value(), 7);
    }

    #[test]
    fn test_stats_ratio() {
        let stats = CompactionStats {
            was_compacted: true,
            original_tokens: 200,
            compacted_tokens: 50,
            record_count_before: 4,
            record_count_after: 4,
            summarizer_used: None,
        };
        assert_eq!(stats.tokens_saved(), 150);
        assert!((stats.ratio() - 0.25).abs() < f64::EPSILON);
        assert_eq!(CompactionStats::unchanged(&[]).ratio(), 1.0);
    }
}
