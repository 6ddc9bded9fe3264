//! Compaction observability: a caller-owned rolling window of run reports
//! with aggregate statistics and a health check.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::orchestrator::CompactionReport;

/// Snapshot of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMetrics {
    /// Monotonic sequence number assigned by the observer.
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub was_compacted: bool,
    pub tokens_before: u64,
    pub tokens_after: u64,
    pub tokens_freed: u64,
    /// tokens_freed / tokens_before.
    pub compression_ratio: f64,
    pub records_compacted: usize,
    pub summarizer_calls: usize,
    pub summary_failures: usize,
    pub records_pruned: usize,
    /// At least one stage fell back to its input.
    pub fell_back: bool,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl TurnMetrics {
    pub fn from_report(seq: u64, model: Option<&str>, report: &CompactionReport) -> Self {
        let stats = &report.stats;
        let tokens_freed = stats.tokens_saved();
        let compression_ratio = if stats.original_tokens > 0 {
            tokens_freed as f64 / stats.original_tokens as f64
        } else {
            0.0
        };
        let pass = report.compaction.as_ref();

        Self {
            seq,
            model: model.map(String::from),
            was_compacted: stats.was_compacted,
            tokens_before: stats.original_tokens,
            tokens_after: stats.compacted_tokens,
            tokens_freed,
            compression_ratio,
            records_compacted: pass.map_or(0, |p| p.records_compacted),
            summarizer_calls: pass.map_or(0, |p| p.summarizer_calls),
            summary_failures: report.compaction_failures,
            records_pruned: report.records_pruned,
            fell_back: report.had_fallback(),
            duration_ms: report.duration_ms,
            recorded_at: Utc::now(),
        }
    }
}

/// Aggregates across every recorded turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObserverStats {
    pub total_turns: u64,
    /// Turns that went over budget and ran the pipeline.
    pub compacted_turns: u64,
    pub total_tokens_saved: u64,
    pub total_records_compacted: usize,
    pub total_records_pruned: usize,
    pub total_summarizer_calls: usize,
    pub total_summary_failures: usize,
    /// Turns where a stage fell back.
    pub fallbacks: u64,
    /// Running mean over compacted turns.
    pub avg_compression_ratio: f64,
    /// Running mean over compacted turns.
    pub avg_duration_ms: f64,
    pub max_duration_ms: u64,
}

/// Rolling window of turn metrics.
pub struct CompactionObserver {
    history: VecDeque<TurnMetrics>,
    max_history: usize,
    stats: ObserverStats,
    next_seq: u64,
}

impl CompactionObserver {
    pub fn new(max_history: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(max_history),
            max_history: max_history.max(1),
            stats: ObserverStats::default(),
            next_seq: 1,
        }
    }

    /// Record a run report and return its metrics snapshot.
    pub fn observe(&mut self, model: Option<&str>, report: &CompactionReport) -> &TurnMetrics {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.record(TurnMetrics::from_report(seq, model, report))
    }

    fn record(&mut self, metrics: TurnMetrics) -> &TurnMetrics {
        self.stats.total_turns += 1;
        if metrics.fell_back {
            self.stats.fallbacks += 1;
        }

        if metrics.was_compacted {
            let s = &mut self.stats;
            s.compacted_turns += 1;
            s.total_tokens_saved += metrics.tokens_freed;
            s.total_records_compacted += metrics.records_compacted;
            s.total_records_pruned += metrics.records_pruned;
            s.total_summarizer_calls += metrics.summarizer_calls;
            s.total_summary_failures += metrics.summary_failures;

            let n = s.compacted_turns as f64;
            s.avg_compression_ratio += (metrics.compression_ratio - s.avg_compression_ratio) / n;
            s.avg_duration_ms += (metrics.duration_ms as f64 - s.avg_duration_ms) / n;
            s.max_duration_ms = s.max_duration_ms.max(metrics.duration_ms);
        }

        if self.history.len() >= self.max_history {
            self.history.pop_front();
        }
        self.history.push_back(metrics);
        // Just pushed.
        &self.history[self.history.len() - 1]
    }

    pub fn stats(&self) -> &ObserverStats {
        &self.stats
    }

    pub fn history(&self) -> &VecDeque<TurnMetrics> {
        &self.history
    }

    pub fn last(&self) -> Option<&TurnMetrics> {
        self.history.back()
    }

    /// Most recent `n` turns, newest first.
    pub fn recent(&self, n: usize) -> Vec<&TurnMetrics> {
        self.history.iter().rev().take(n).collect()
    }

    /// A warning if recent behavior looks degraded.
    pub fn health_check(&self) -> Option<String> {
        let s = &self.stats;
        if s.total_turns < 3 {
            return None;
        }

        let fallback_rate = s.fallbacks as f64 / s.total_turns as f64;
        if fallback_rate > 0.5 {
            return Some(format!(
                "High stage fallback rate: {:.0}% ({}/{})",
                fallback_rate * 100.0,
                s.fallbacks,
                s.total_turns
            ));
        }

        if s.total_summarizer_calls > 0 {
            let failure_rate = s.total_summary_failures as f64 / s.total_summarizer_calls as f64;
            if failure_rate > 0.5 {
                return Some(format!(
                    "High summarizer failure rate: {:.0}% ({}/{})",
                    failure_rate * 100.0,
                    s.total_summary_failures,
                    s.total_summarizer_calls
                ));
            }
        }

        if s.compacted_turns > 2 && s.avg_compression_ratio < 0.1 {
            return Some(format!(
                "Low compression ratio: {:.2}; most records may be protected",
                s.avg_compression_ratio
            ));
        }

        if s.max_duration_ms > 60_000 {
            return Some(format!("Slow compaction detected: max {}ms", s.max_duration_ms));
        }

        None
    }

    pub fn summary_line(&self) -> String {
        let s = &self.stats;
        format!(
            "turns={} compacted={} tokens_saved={} pruned={} summary_failures={}/{} fallbacks={} avg_ratio={:.2} avg_duration={}ms",
            s.total_turns,
            s.compacted_turns,
            s.total_tokens_saved,
            s.total_records_pruned,
            s.total_summary_failures,
            s.total_summarizer_calls,
            s.fallbacks,
            s.avg_compression_ratio,
            s.avg_duration_ms as u64
        )
    }
}

impl Default for CompactionObserver {
    fn default() -> Self {
        Self::new(100)
    }
}
