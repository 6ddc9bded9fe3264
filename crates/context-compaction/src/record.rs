//! Transcript records: the unit the compaction engine rewrites.
//!
//! Records are owned by the caller's storage layer. The engine only ever
//! rewrites `body`, `token_count` and `state` on in-memory copies.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::{self, COMPRESSED_MARKER};
use crate::token::TokenCounter;

/// Who produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The human side of the conversation.
    Originator,
    /// Model output.
    Responder,
    /// Output returned by a tool call.
    ToolOutput,
    /// System instructions.
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Originator => write!(f, "originator"),
            Self::Responder => write!(f, "responder"),
            Self::ToolOutput => write!(f, "tool_output"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Processing state of a record body.
///
/// Mirrors the textual body prefixes so internal logic does not have to
/// re-parse the body. Either signal marks a record as processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Body is what the caller supplied.
    #[default]
    Original,
    /// Body was replaced by a `[COMPRESSED] ` summary.
    Compacted,
    /// Body was replaced by a `[PRUNED: ...]` placeholder.
    Pruned,
}

/// A single transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Opaque identifier, unique within a transcript.
    pub id: String,
    pub role: Role,
    pub body: String,
    /// Cost of `body` under the caller's token counter.
    pub token_count: u64,
    /// Caller-owned key/value bag; never interpreted here.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Ordering key. Transcripts are sorted by this field.
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub state: RecordState,
}

impl Record {
    /// Create a record with a fresh id and the current timestamp.
    pub fn new(role: Role, body: impl Into<String>, token_count: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            body: body.into(),
            token_count,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
            state: RecordState::Original,
        }
    }

    /// Create a record and price its body with `counter`.
    pub fn counted(role: Role, body: impl Into<String>, counter: &dyn TokenCounter) -> Self {
        let body = body.into();
        let tokens = counter.count(&body);
        Self::new(role, body, tokens)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether this record was already summarized (flag or wire prefix).
    pub fn is_compacted(&self) -> bool {
        self.state == RecordState::Compacted || classifier::is_already_compacted(&self.body)
    }

    /// Whether this record was already pruned (flag or wire prefix).
    pub fn is_pruned(&self) -> bool {
        self.state == RecordState::Pruned || classifier::is_already_pruned(&self.body)
    }

    /// Copy of this record with the body replaced by a marked summary.
    pub(crate) fn compacted_with(&self, summary: &str, counter: &dyn TokenCounter) -> Self {
        let body = format!("{COMPRESSED_MARKER}{}", summary.trim());
        let mut out = self.clone();
        out.token_count = counter.count(&body);
        out.body = body;
        out.state = RecordState::Compacted;
        out
    }

    /// Copy of this record with the body replaced by a prune placeholder.
    pub(crate) fn pruned_with(&self, placeholder: String, token_count: u64) -> Self {
        let mut out = self.clone();
        out.body = placeholder;
        out.token_count = token_count;
        out.state = RecordState::Pruned;
        out
    }
}

/// Sum of `token_count` across a transcript.
pub fn total_tokens(records: &[Record]) -> u64 {
    records.iter().map(|r| r.token_count).sum()
}
