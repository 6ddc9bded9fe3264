//! Compaction error taxonomy.
//!
//! Summarization failures are recovered per record; pipeline failures are
//! recovered at the orchestrator boundary. Nothing here is fatal.

use std::any::Any;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// High-level classification of a failure inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionErrorKind {
    /// Summarizer did not answer within the deadline.
    SummarizationTimeout,
    /// Summarizer backend returned an error.
    SummarizationFailed,
    /// Summary was empty after trimming.
    EmptySummary,
    /// Summary exceeded its cap or would not shrink the record.
    SummaryTooLarge,
    /// Transcript violated ordering or id uniqueness.
    InvalidInput,
    /// A stage panicked.
    StagePanicked,
}

impl CompactionErrorKind {
    /// Whether a later turn may reasonably succeed where this one failed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::SummarizationTimeout | Self::SummarizationFailed | Self::EmptySummary
        )
    }

    pub fn suggested_action(self) -> &'static str {
        match self {
            Self::SummarizationTimeout => "raise summary_timeout_secs or check the endpoint",
            Self::SummarizationFailed => "check summarizer health; record kept verbatim",
            Self::EmptySummary => "record kept verbatim; try a different summarizer model",
            Self::SummaryTooLarge => "lower max_summary_tokens or skip short records",
            Self::InvalidInput => "sort the transcript by created_at and dedupe ids",
            Self::StagePanicked => "inspect logs for the panicking collaborator",
        }
    }
}

impl std::fmt::Display for CompactionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SummarizationTimeout => write!(f, "summarization_timeout"),
            Self::SummarizationFailed => write!(f, "summarization_failed"),
            Self::EmptySummary => write!(f, "empty_summary"),
            Self::SummaryTooLarge => write!(f, "summary_too_large"),
            Self::InvalidInput => write!(f, "invalid_input"),
            Self::StagePanicked => write!(f, "stage_panicked"),
        }
    }
}

/// Failure of a single summarizer call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SummarizationError {
    #[error("summarizer timed out after {0}s")]
    Timeout(u64),

    #[error("summarizer backend error [{model}]: {reason}")]
    Backend { model: String, reason: String },

    #[error("summarizer returned an empty summary")]
    EmptySummary,

    #[error("summary of {summary_tokens} tokens exceeds limit of {limit} tokens")]
    SummaryTooLarge { summary_tokens: u64, limit: u64 },

    #[error("summarizer panicked: {0}")]
    Panicked(String),
}

impl SummarizationError {
    pub fn backend(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Backend {
            model: model.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> CompactionErrorKind {
        match self {
            Self::Timeout(_) => CompactionErrorKind::SummarizationTimeout,
            Self::Backend { .. } | Self::Panicked(_) => CompactionErrorKind::SummarizationFailed,
            Self::EmptySummary => CompactionErrorKind::EmptySummary,
            Self::SummaryTooLarge { .. } => CompactionErrorKind::SummaryTooLarge,
        }
    }
}

/// Failure of a whole pipeline stage.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineError {
    #[error("invalid transcript: {0}")]
    InvalidInput(String),

    #[error("{stage} stage panicked: {detail}")]
    StagePanicked { stage: String, detail: String },
}

impl PipelineError {
    pub fn kind(&self) -> CompactionErrorKind {
        match self {
            Self::InvalidInput(_) => CompactionErrorKind::InvalidInput,
            Self::StagePanicked { .. } => CompactionErrorKind::StagePanicked,
        }
    }

    /// Build a `StagePanicked` from a caught panic payload.
    pub fn from_panic(stage: &str, payload: Box<dyn Any + Send>) -> Self {
        Self::StagePanicked {
            stage: stage.to_string(),
            detail: panic_detail(payload.as_ref()),
        }
    }
}

/// Message carried by a caught panic payload.
pub(crate) fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarization_error_display() {
        let err = SummarizationError::backend("qwen3-coder", "connection reset");
        assert_eq!(
            err.to_string(),
            "summarizer backend error [qwen3-coder]: connection reset"
        );
        assert_eq!(err.kind(), CompactionErrorKind::SummarizationFailed);

        let err = SummarizationError::SummaryTooLarge {
            summary_tokens: 900,
            limit: 512,
        };
        assert!(err.to_string().contains("900"));
        assert_eq!(err.kind(), CompactionErrorKind::SummaryTooLarge);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(CompactionErrorKind::SummarizationTimeout.is_retryable());
        assert!(CompactionErrorKind::SummarizationFailed.is_retryable());
        assert!(!CompactionErrorKind::InvalidInput.is_retryable());
        assert!(!CompactionErrorKind::StagePanicked.is_retryable());
        assert!(!CompactionErrorKind::SummaryTooLarge.is_retryable());
    }

    #[test]
    fn test_suggested_actions() {
        assert!(CompactionErrorKind::InvalidInput
            .suggested_action()
            .contains("created_at"));
        assert!(CompactionErrorKind::SummarizationTimeout
            .suggested_action()
            .contains("timeout"));
    }

    #[test]
    fn test_kind_serde() {
        let json = serde_json::to_string(&CompactionErrorKind::StagePanicked).unwrap();
        assert_eq!(json, "\"stage_panicked\"");
        let parsed: CompactionErrorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, CompactionErrorKind::StagePanicked);
        assert_eq!(parsed.to_string(), "stage_panicked");
    }

    #[test]
    fn test_from_panic_payloads() {
        let err = PipelineError::from_panic("compactor", Box::new("boom"));
        assert_eq!(
            err,
            PipelineError::StagePanicked {
                stage: "compactor".into(),
                detail: "boom".into()
            }
        );

        let err = PipelineError::from_panic("pruner", Box::new(String::from("bad regex")));
        assert!(err.to_string().contains("pruner stage panicked: bad regex"));

        let err = PipelineError::from_panic("pruner", Box::new(42u32));
        assert!(err.to_string().contains("non-string"));
        assert_eq!(err.kind(), CompactionErrorKind::StagePanicked);
    }

    #[test]
    fn test_summarizer_panic_is_a_call_failure() {
        let err = SummarizationError::Panicked(panic_detail(&"one bad record"));
        assert_eq!(err.to_string(), "summarizer panicked: one bad record");
        assert_eq!(err.kind(), CompactionErrorKind::SummarizationFailed);
    }
}
