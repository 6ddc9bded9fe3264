//! Record classification: pure predicates over record bodies.

use serde::{Deserialize, Serialize};

use crate::record::{Record, Role};

/// Body prefix of a summarized record. Part of the downstream wire contract.
pub const COMPRESSED_MARKER: &str = "[COMPRESSED] ";

/// Prefix shared by every prune placeholder.
pub const PRUNED_MARKER: &str = "[PRUNED";

const CODE_FENCE: &str = "```";

/// True iff the body holds an opening and a closing triple-backtick fence.
///
/// Literal substring match only. Prose that quotes a fence twice counts.
pub fn contains_code_block(body: &str) -> bool {
    body.matches(CODE_FENCE).count() >= 2
}

pub fn is_already_compacted(body: &str) -> bool {
    body.starts_with(COMPRESSED_MARKER)
}

pub fn is_already_pruned(body: &str) -> bool {
    body.starts_with(PRUNED_MARKER)
}

/// Compaction verdict for a single head record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    /// Summarize with the narrative template.
    Narrative,
    /// Summarize with the tool-result template.
    ToolResult,
    /// Already carries a summary; pass through unchanged.
    AlreadyCompacted,
    /// User intent must survive verbatim.
    ProtectedOriginator,
    /// Responder output containing code must survive verbatim.
    ProtectedCode,
    /// System instructions are never summarized.
    ProtectedSystem,
}

impl Eligibility {
    /// Whether the compactor should call the summarizer for this record.
    pub fn needs_summary(self) -> bool {
        matches!(self, Self::Narrative | Self::ToolResult)
    }
}

impl std::fmt::Display for Eligibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Narrative => write!(f, "narrative"),
            Self::ToolResult => write!(f, "tool_result"),
            Self::AlreadyCompacted => write!(f, "already_compacted"),
            Self::ProtectedOriginator => write!(f, "protected_originator"),
            Self::ProtectedCode => write!(f, "protected_code"),
            Self::ProtectedSystem => write!(f, "protected_system"),
        }
    }
}

/// Decide what the compactor may do with a record outside the protected tail.
pub fn eligibility(record: &Record) -> Eligibility {
    let verdict = match record.role {
        Role::Originator => return Eligibility::ProtectedOriginator,
        Role::System => return Eligibility::ProtectedSystem,
        Role::Responder if contains_code_block(&record.body) => {
            return Eligibility::ProtectedCode
        }
        Role::Responder => Eligibility::Narrative,
        Role::ToolOutput => Eligibility::ToolResult,
    };

    if record.is_compacted() {
        Eligibility::AlreadyCompacted
    } else {
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordState;

    #[test]
    fn test_code_block_requires_open_and_close() {
        assert!(contains_code_block("see:\n```rust\nfn main() {}\n```\n"));
        assert!(!contains_code_block("a single ``` fence"));
        assert!(!contains_code_block("no code here"));
        assert!(!contains_code_block("``"));
    }

    #[test]
    fn test_code_block_is_literal_match() {
        // Prose mentioning the fence twice is accepted as a code block.
        assert!(contains_code_block("wrap it in ``` and close with ```"));
        // Tildes are not recognized.
        assert!(!contains_code_block("~~~\ncode\n~~~"));
    }

    #[test]
    fn test_markers() {
        assert!(is_already_compacted("[COMPRESSED] summary"));
        assert!(!is_already_compacted("[COMPRESSED]summary"));
        assert!(!is_already_compacted(" [COMPRESSED] summary"));
        assert!(is_already_pruned("[PRUNED: Analyzed app/x.py]"));
        assert!(is_already_pruned("[PRUNED]"));
        assert!(!is_already_pruned("PRUNED"));
    }

    #[test]
    fn test_eligibility_by_role() {
        let user = Record::new(Role::Originator, "please fix it", 3);
        let system = Record::new(Role::System, "you are helpful", 3);
        let prose = Record::new(Role::Responder, "I looked at it", 3);
        let code = Record::new(Role::Responder, "```\nlet x = 1;\n```", 3);
        let tool = Record::new(Role::ToolOutput, "File: src/a.rs", 3);

        assert_eq!(eligibility(&user), Eligibility::ProtectedOriginator);
        assert_eq!(eligibility(&system), Eligibility::ProtectedSystem);
        assert_eq!(eligibility(&prose), Eligibility::Narrative);
        assert_eq!(eligibility(&code), Eligibility::ProtectedCode);
        assert_eq!(eligibility(&tool), Eligibility::ToolResult);
    }

    #[test]
    fn test_eligibility_already_compacted() {
        let by_prefix = Record::new(Role::ToolOutput, "[COMPRESSED] ran tests", 3);
        assert_eq!(eligibility(&by_prefix), Eligibility::AlreadyCompacted);

        let mut by_flag = Record::new(Role::Responder, "summary text", 3);
        by_flag.state = RecordState::Compacted;
        assert_eq!(eligibility(&by_flag), Eligibility::AlreadyCompacted);
        assert!(!eligibility(&by_flag).needs_summary());
    }

    #[test]
    fn test_needs_summary() {
        assert!(Eligibility::Narrative.needs_summary());
        assert!(Eligibility::ToolResult.needs_summary());
        assert!(!Eligibility::ProtectedCode.needs_summary());
        assert!(!Eligibility::ProtectedOriginator.needs_summary());
    }
}
