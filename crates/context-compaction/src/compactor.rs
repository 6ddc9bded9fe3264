//! Record compactor: summarizes eligible records outside the protected tail.
//!
//! Each eligible record gets one bounded summarizer call. Calls fan out with
//! a concurrency cap; identical bodies within one pass share a single call.
//! A failed call leaves its record untouched and never aborts the pass.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classifier::{self, Eligibility};
use crate::config::CompactionConfig;
use crate::errors::{panic_detail, PipelineError, SummarizationError};
use crate::record::Record;
use crate::summarizer::{SummaryRequest, SummaryStyle, Summarizer};
use crate::token::TokenCounter;

/// Per-pass counters reported back to the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionPassStats {
    /// Records replaced by a summary.
    pub records_compacted: usize,
    /// Eligible records kept verbatim because their summary failed.
    pub summary_failures: usize,
    /// Head records skipped by role or content.
    pub records_protected: usize,
    /// Head records that already carried a summary.
    pub already_compacted: usize,
    /// Outbound summarizer calls (after dedupe).
    pub summarizer_calls: usize,
}

/// Output of one compaction pass.
#[derive(Debug, Clone)]
pub struct CompactionPass {
    pub records: Vec<Record>,
    pub stats: CompactionPassStats,
}

/// Summarizes eligible head records.
pub struct Compactor {
    summarizer: Arc<dyn Summarizer>,
    counter: Arc<dyn TokenCounter>,
    /// Max tokens for generated summaries.
    max_summary_tokens: u32,
    summary_timeout: Duration,
    max_concurrent: usize,
}

impl Compactor {
    pub fn new(summarizer: Arc<dyn Summarizer>, counter: Arc<dyn TokenCounter>) -> Self {
        Self::with_config(summarizer, counter, &CompactionConfig::default())
    }

    pub fn with_config(
        summarizer: Arc<dyn Summarizer>,
        counter: Arc<dyn TokenCounter>,
        config: &CompactionConfig,
    ) -> Self {
        Self {
            summarizer,
            counter,
            max_summary_tokens: config.max_summary_tokens,
            summary_timeout: config.summary_timeout(),
            max_concurrent: config.max_concurrent_summaries.max(1),
        }
    }

    /// Name of the underlying summarizer.
    pub fn summarizer_name(&self) -> &str {
        self.summarizer.name()
    }

    /// Compact every eligible record except the last `keep_tail` ones.
    ///
    /// Returns records in their original order. Only an invalid transcript
    /// fails the pass; summarizer errors are absorbed per record.
    pub async fn compact_eligible(
        &self,
        records: &[Record],
        keep_tail: usize,
    ) -> Result<CompactionPass, PipelineError> {
        validate_transcript(records)?;

        let split = records.len().saturating_sub(keep_tail);
        let (head, tail) = records.split_at(split);
        let mut stats = CompactionPassStats::default();

        // Plan: one slot per head record, one job per distinct (style, body).
        let mut slots: Vec<Option<blake3::Hash>> = Vec::with_capacity(head.len());
        let mut jobs: Vec<(blake3::Hash, SummaryRequest)> = Vec::new();
        let mut planned: HashSet<blake3::Hash> = HashSet::new();

        for record in head {
            let verdict = classifier::eligibility(record);
            let style = match verdict {
                Eligibility::Narrative => SummaryStyle::Narrative,
                Eligibility::ToolResult => SummaryStyle::ToolResult,
                Eligibility::AlreadyCompacted => {
                    stats.already_compacted += 1;
                    slots.push(None);
                    continue;
                }
                Eligibility::ProtectedOriginator
                | Eligibility::ProtectedCode
                | Eligibility::ProtectedSystem => {
                    debug!(id = %record.id, verdict = %verdict, "record protected from compaction");
                    stats.records_protected += 1;
                    slots.push(None);
                    continue;
                }
            };

            let key = summary_key(style, &record.body);
            if planned.insert(key) {
                jobs.push((
                    key,
                    SummaryRequest::new(record.body.clone(), style, self.max_summary_tokens),
                ));
            }
            slots.push(Some(key));
        }

        stats.summarizer_calls = jobs.len();

        let summaries: HashMap<blake3::Hash, Result<String, SummarizationError>> =
            stream::iter(jobs)
                .map(|(key, request)| async move {
                    let outcome = AssertUnwindSafe(self.summarize_one(&request))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|payload| {
                            Err(SummarizationError::Panicked(panic_detail(payload.as_ref())))
                        });
                    (key, outcome)
                })
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;

        let mut out = Vec::with_capacity(records.len());
        for (record, slot) in head.iter().zip(slots) {
            let Some(key) = slot else {
                out.push(record.clone());
                continue;
            };

            match summaries.get(&key) {
                Some(Ok(summary)) => match self.apply_summary(record, summary) {
                    Ok(compacted) => {
                        debug!(
                            id = %record.id,
                            tokens_before = record.token_count,
                            tokens_after = compacted.token_count,
                            "record compacted"
                        );
                        stats.records_compacted += 1;
                        out.push(compacted);
                    }
                    Err(e) => {
                        warn!(id = %record.id, error = %e, "summary rejected; keeping original");
                        stats.summary_failures += 1;
                        out.push(record.clone());
                    }
                },
                Some(Err(e)) => {
                    warn!(id = %record.id, error = %e, "summarization failed; keeping original");
                    stats.summary_failures += 1;
                    out.push(record.clone());
                }
                None => {
                    stats.summary_failures += 1;
                    out.push(record.clone());
                }
            }
        }
        out.extend_from_slice(tail);

        info!(
            compacted = stats.records_compacted,
            failures = stats.summary_failures,
            calls = stats.summarizer_calls,
            protected_tail = tail.len(),
            "compaction pass complete"
        );

        Ok(CompactionPass {
            records: out,
            stats,
        })
    }

    /// One bounded summarizer call. Single attempt, no retry.
    async fn summarize_one(&self, request: &SummaryRequest) -> Result<String, SummarizationError> {
        let summary = tokio::time::timeout(self.summary_timeout, self.summarizer.summarize(request))
            .await
            .map_err(|_| SummarizationError::Timeout(self.summary_timeout.as_secs()))??;

        let trimmed = summary.trim();
        if trimmed.is_empty() {
            return Err(SummarizationError::EmptySummary);
        }
        let summary_tokens = self.counter.count(trimmed);
        if summary_tokens > u64::from(request.max_output_tokens) {
            return Err(SummarizationError::SummaryTooLarge {
                summary_tokens,
                limit: u64::from(request.max_output_tokens),
            });
        }
        Ok(trimmed.to_string())
    }

    /// Rewrite `record` with `summary`, refusing rewrites that do not shrink it.
    fn apply_summary(&self, record: &Record, summary: &str) -> Result<Record, SummarizationError> {
        let compacted = record.compacted_with(summary, self.counter.as_ref());
        if compacted.token_count >= record.token_count {
            return Err(SummarizationError::SummaryTooLarge {
                summary_tokens: compacted.token_count,
                limit: record.token_count,
            });
        }
        Ok(compacted)
    }
}

fn summary_key(style: SummaryStyle, body: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(style.to_string().as_bytes());
    hasher.update(&[0]);
    hasher.update(body.as_bytes());
    hasher.finalize()
}

/// Reject transcripts with duplicate ids or decreasing `created_at`.
pub fn validate_transcript(records: &[Record]) -> Result<(), PipelineError> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(records.len());
    for record in records {
        if !seen.insert(record.id.as_str()) {
            return Err(PipelineError::InvalidInput(format!(
                "duplicate record id {}",
                record.id
            )));
        }
    }
    for pair in records.windows(2) {
        if pair[1].created_at < pair[0].created_at {
            return Err(PipelineError::InvalidInput(format!(
                "record {} precedes {} but was created later",
                pair[0].id, pair[1].id
            )));
        }
    }
    Ok(())
}
