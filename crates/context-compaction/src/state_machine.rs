//! Pipeline state machine: explicit stages and legal transition guards.
//!
//! Every compaction run starts at `Idle` and ends at `Done`. The
//! orchestrator calls `advance()` between stages; each call validates the
//! edge and appends it to the transition log returned in the run report.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stages of a single compaction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Nothing evaluated yet.
    Idle,
    /// Transcript size compared against the policy threshold.
    BudgetChecked,
    /// Under budget; transcript returned as-is.
    PassThrough,
    /// Summarizing eligible head records.
    Compacting,
    /// Replacing irrelevant tool output with placeholders.
    Pruning,
    /// Terminal state.
    Done,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::BudgetChecked => write!(f, "BudgetChecked"),
            Self::PassThrough => write!(f, "PassThrough"),
            Self::Compacting => write!(f, "Compacting"),
            Self::Pruning => write!(f, "Pruning"),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// Legal edges:
/// ```text
/// Idle → BudgetChecked
/// BudgetChecked → PassThrough | Compacting
/// PassThrough → Done
/// Compacting → Pruning
/// Pruning → Done
/// ```
fn is_legal_transition(from: PipelineState, to: PipelineState) -> bool {
    use PipelineState::*;

    matches!(
        (from, to),
        (Idle, BudgetChecked)
            | (BudgetChecked, PassThrough)
            | (BudgetChecked, Compacting)
            | (PassThrough, Done)
            | (Compacting, Pruning)
            | (Pruning, Done)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: PipelineState,
    pub to: PipelineState,
    /// Milliseconds since the run started.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("illegal pipeline transition: {from} → {to}")]
pub struct IllegalTransition {
    pub from: PipelineState,
    pub to: PipelineState,
}

/// Tracks the current stage of one run and logs every transition.
pub struct StateMachine {
    current: PipelineState,
    started_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: PipelineState::Idle,
            started_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> PipelineState {
        self.current
    }

    /// Move to `to`, or fail if the edge is not in the state graph.
    pub fn advance(
        &mut self,
        to: PipelineState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(from = %self.current, to = %to, reason, "pipeline transition");

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Consume the machine, yielding its transition log.
    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }

    /// `Idle → Done (3ms) [BudgetChecked → PassThrough → Done]`
    pub fn summary(&self) -> String {
        let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        let mut out = format!(
            "{} → {} ({}ms)",
            PipelineState::Idle,
            self.current,
            self.started_at.elapsed().as_millis()
        );
        if !states.is_empty() {
            out.push_str(&format!(" [{}]", states.join(" → ")));
        }
        out
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let sm = StateMachine::new();
        assert_eq!(sm.current(), PipelineState::Idle);
        assert!(!sm.is_terminal());
        assert!(sm.into_transitions().is_empty());
    }

    #[test]
    fn test_pass_through_path() {
        let mut sm = StateMachine::new();
        sm.advance(PipelineState::BudgetChecked, None).unwrap();
        sm.advance(PipelineState::PassThrough, Some("within_budget"))
            .unwrap();
        sm.advance(PipelineState::Done, None).unwrap();
        assert!(sm.is_terminal());
        assert_eq!(sm.into_transitions().len(), 3);
    }

    #[test]
    fn test_compaction_path() {
        let mut sm = StateMachine::new();
        sm.advance(PipelineState::BudgetChecked, None).unwrap();
        sm.advance(PipelineState::Compacting, Some("over_budget"))
            .unwrap();
        sm.advance(PipelineState::Pruning, None).unwrap();
        sm.advance(PipelineState::Done, None).unwrap();
        assert_eq!(sm.current(), PipelineState::Done);
        let log = sm.into_transitions();
        assert_eq!(log[1].reason.as_deref(), Some("over_budget"));
    }

    #[test]
    fn test_illegal_skip() {
        let mut sm = StateMachine::new();
        let err = sm.advance(PipelineState::Compacting, None).unwrap_err();
        assert_eq!(err.from, PipelineState::Idle);
        assert_eq!(err.to, PipelineState::Compacting);
        assert_eq!(
            err.to_string(),
            "illegal pipeline transition: Idle → Compacting"
        );
    }

    #[test]
    fn test_pass_through_cannot_prune() {
        let mut sm = StateMachine::new();
        sm.advance(PipelineState::BudgetChecked, None).unwrap();
        sm.advance(PipelineState::PassThrough, None).unwrap();
        assert!(sm.advance(PipelineState::Pruning, None).is_err());
    }

    #[test]
    fn test_cannot_leave_done() {
        let mut sm = StateMachine::new();
        sm.advance(PipelineState::BudgetChecked, None).unwrap();
        sm.advance(PipelineState::PassThrough, None).unwrap();
        sm.advance(PipelineState::Done, None).unwrap();
        for to in [
            PipelineState::Idle,
            PipelineState::BudgetChecked,
            PipelineState::Compacting,
            PipelineState::Done,
        ] {
            assert!(sm.advance(to, None).is_err());
        }
    }

    #[test]
    fn test_summary() {
        let mut sm = StateMachine::new();
        sm.advance(PipelineState::BudgetChecked, None).unwrap();
        sm.advance(PipelineState::PassThrough, None).unwrap();
        sm.advance(PipelineState::Done, None).unwrap();
        let summary = sm.summary();
        assert!(summary.starts_with("Idle → Done"));
        assert!(summary.contains("[BudgetChecked → PassThrough → Done]"));
    }

    #[test]
    fn test_transition_record_serde_roundtrip() {
        let record = TransitionRecord {
            from: PipelineState::Compacting,
            to: PipelineState::Pruning,
            elapsed_ms: 42,
            reason: Some("compactor fell back".into()),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"compacting\""));
        let restored: TransitionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, record);
    }
}
