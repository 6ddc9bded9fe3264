//! Bounded summarizer: strict request contract for record compaction.
//!
//! Defines the summarizer interface, the role-specific instruction templates,
//! and a deterministic mock for testing. The production implementation lives
//! in [`crate::rig_summarizer`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::SummarizationError;

/// Temperature used for every compaction call.
pub const SUMMARY_TEMPERATURE: f64 = 0.0;

/// Which instruction template to summarize with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStyle {
    /// Prose written by the model.
    Narrative,
    /// Raw output of a tool call.
    ToolResult,
}

impl SummaryStyle {
    /// System instruction sent alongside the text.
    pub fn instruction(self) -> &'static str {
        match self {
            Self::Narrative => {
                "Condense this assistant message into a few dense sentences. \
                Keep decisions, conclusions, file names, identifiers and open questions. \
                Drop pleasantries, restatements and hedging. Output only the summary."
            }
            Self::ToolResult => {
                "Condense this tool output into a short factual digest. \
                Keep file paths, error messages, counts, exit status and any values a \
                later step may need. Drop repeated lines and boilerplate. \
                Output only the digest."
            }
        }
    }
}

impl std::fmt::Display for SummaryStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Narrative => write!(f, "narrative"),
            Self::ToolResult => write!(f, "tool_result"),
        }
    }
}

/// Contract for summarizer input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRequest {
    /// Text to condense.
    pub text: String,
    pub style: SummaryStyle,
    /// Hard cap on generated tokens.
    pub max_output_tokens: u32,
    pub temperature: f64,
}

impl SummaryRequest {
    pub fn new(text: impl Into<String>, style: SummaryStyle, max_output_tokens: u32) -> Self {
        Self {
            text: text.into(),
            style,
            max_output_tokens,
            temperature: SUMMARY_TEMPERATURE,
        }
    }
}

/// Remote summarization collaborator.
///
/// A single call is a single attempt. Implementations must not retry.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String, SummarizationError>;

    /// Identifier reported in `CompactionStats::summarizer_used`.
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockBehavior {
    Echo,
    Fail,
    Oversize,
    Panic,
    PanicOn(&'static str),
    Stall(Duration),
}

/// Deterministic mock summarizer for testing.
///
/// The default mode returns the first 60 characters of the input, prefixed
/// with the style, and counts every call.
pub struct MockSummarizer {
    /// Simulated model name.
    pub model_name: String,
    behavior: MockBehavior,
    calls: AtomicUsize,
}

impl MockSummarizer {
    /// Create a working mock summarizer.
    pub fn new() -> Self {
        Self::with_behavior("mock-summarizer", MockBehavior::Echo)
    }

    /// Create a mock that always fails.
    pub fn failing() -> Self {
        Self::with_behavior("mock-summarizer-fail", MockBehavior::Fail)
    }

    /// Create a mock whose output is far larger than its input.
    pub fn oversize() -> Self {
        Self::with_behavior("mock-summarizer-oversize", MockBehavior::Oversize)
    }

    /// Create a mock that panics inside `summarize`.
    pub fn panicking() -> Self {
        Self::with_behavior("mock-summarizer-panic", MockBehavior::Panic)
    }

    /// Create a mock that panics on input containing `needle` and echoes
    /// everything else.
    pub fn panicking_on(needle: &'static str) -> Self {
        Self::with_behavior("mock-summarizer-panic-on", MockBehavior::PanicOn(needle))
    }

    /// Create a mock that sleeps for `delay` before answering.
    pub fn stalled(delay: Duration) -> Self {
        Self::with_behavior("mock-summarizer-stall", MockBehavior::Stall(delay))
    }

    fn with_behavior(name: &str, behavior: MockBehavior) -> Self {
        Self {
            model_name: name.to_string(),
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `summarize` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String, SummarizationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            MockBehavior::Fail => Err(SummarizationError::backend(
                &self.model_name,
                "simulated failure",
            )),
            MockBehavior::Panic => panic!("simulated summarizer panic"),
            MockBehavior::PanicOn(needle) if request.text.contains(needle) => {
                panic!("one bad record")
            }
            MockBehavior::Oversize => Ok(request.text.repeat(3)),
            MockBehavior::Stall(delay) => {
                tokio::time::sleep(delay).await;
                Ok(format!("{}: {}", request.style, truncate(&request.text, 60)))
            }
            MockBehavior::Echo | MockBehavior::PanicOn(_) => Ok(format!(
                "{}: {}",
                request.style,
                truncate(&request.text, 60)
            )),
        }
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
