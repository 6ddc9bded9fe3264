//! Relevance pruner: replaces tool output about files the current request
//! does not mention with a short audit placeholder.
//!
//! File detection is a heuristic: dotted names with a known source or config
//! extension, or paths rooted at a conventional top-level directory. It
//! over-matches inside URLs and misses uncommon extensions.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info};

use crate::record::{Record, Role};
use crate::token::TokenCounter;

/// Placeholder for tool output that names no file.
pub const GENERIC_PLACEHOLDER: &str = "[PRUNED: Tool output analyzed earlier]";

/// Files listed in a placeholder before collapsing to `(+N more)`.
const MAX_LISTED_FILES: usize = 3;

/// Dotted filename with a known extension, optionally under directories.
static FILE_MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|[^\w./-])((?:[\w.-]+/)*[\w-]+(?:\.[\w-]+)*\.(?:rs|py|pyi|js|jsx|ts|tsx|mjs|go|java|kt|rb|php|c|h|cc|cpp|hpp|cs|swift|scala|sh|sql|toml|yaml|yml|json|md|cfg|ini|txt|html|css|lock|proto))\b",
    )
    .expect("FILE_MENTION_RE regex should compile")
});

/// Path rooted at a conventional top-level directory (`src/...`, `app/...`).
static ROOTED_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|[^\w./-])((?:\./)?(?:src|lib|app|apps|tests|test|config|configs|scripts|docs|crates|pkg|cmd|internal|bin)/[\w./-]+)",
    )
    .expect("ROOTED_PATH_RE regex should compile")
});

/// Path following a `File:` / `file_path:` / `filepath:` label.
static LABELED_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:file_path|filepath|file)\s*:\s*[`'"]?([^\s,;'"`]+)"#)
        .expect("LABELED_PATH_RE regex should compile")
});

/// Trailing `:line` or `:line:col` location suffix.
static LINE_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?::\d+)+$").expect("LINE_SUFFIX_RE regex should compile")
});

fn normalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim_end_matches(['.', ',', ':', ';', ')', ']', '}', '/']);
    let trimmed = LINE_SUFFIX_RE
        .replace(trimmed, "")
        .trim_start_matches("./")
        .to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn push_unique(out: &mut Vec<String>, path: Option<String>) {
    if let Some(path) = path {
        if !out.contains(&path) {
            out.push(path);
        }
    }
}

/// File paths mentioned in free text, in order of first appearance.
pub fn extract_mentioned_files(text: &str) -> Vec<String> {
    let mut files = Vec::new();
    for caps in FILE_MENTION_RE.captures_iter(text) {
        push_unique(&mut files, caps.get(1).and_then(|m| normalize(m.as_str())));
    }
    for caps in ROOTED_PATH_RE.captures_iter(text) {
        push_unique(&mut files, caps.get(1).and_then(|m| normalize(m.as_str())));
    }
    files
}

/// Paths a tool output declares through a file label.
pub fn extract_content_files(body: &str) -> Vec<String> {
    let mut files = Vec::new();
    for caps in LABELED_PATH_RE.captures_iter(body) {
        push_unique(&mut files, caps.get(1).and_then(|m| normalize(m.as_str())));
    }
    files
}

/// Equal paths, or one is a directory-aligned suffix of the other
/// (`auth.py` matches `app/auth.py`).
fn paths_overlap(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (long, short) = if a.len() > b.len() { (a, b) } else { (b, a) };
    long.strip_suffix(short)
        .is_some_and(|prefix| prefix.ends_with('/'))
}

fn placeholder_for(files: &[String]) -> String {
    if files.is_empty() {
        return GENERIC_PLACEHOLDER.to_string();
    }
    let listed = files
        .iter()
        .take(MAX_LISTED_FILES)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    match files.len().saturating_sub(MAX_LISTED_FILES) {
        0 => format!("[PRUNED: Analyzed {listed}]"),
        more => format!("[PRUNED: Analyzed {listed} (+{more} more)]"),
    }
}

/// Output of one pruning pass.
#[derive(Debug, Clone)]
pub struct PrunePass {
    pub records: Vec<Record>,
    pub records_pruned: usize,
}

/// Prunes tool output that is irrelevant to the current request.
pub struct RelevancePruner {
    counter: Arc<dyn TokenCounter>,
}

impl RelevancePruner {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self { counter }
    }

    /// Prune against `query`. A query naming no file is a no-op.
    pub fn prune(&self, records: &[Record], query: &str) -> PrunePass {
        let mentioned = extract_mentioned_files(query);
        if mentioned.is_empty() {
            debug!("query names no file; skipping relevance pruning");
            return PrunePass {
                records: records.to_vec(),
                records_pruned: 0,
            };
        }

        let mut pruned = 0usize;
        let out: Vec<Record> = records
            .iter()
            .map(|record| match self.prune_one(record, &mentioned) {
                Some(rewritten) => {
                    pruned += 1;
                    rewritten
                }
                None => record.clone(),
            })
            .collect();

        if pruned > 0 {
            info!(
                records_pruned = pruned,
                mentioned = ?mentioned,
                "relevance pruning complete"
            );
        }
        PrunePass {
            records: out,
            records_pruned: pruned,
        }
    }

    fn prune_one(&self, record: &Record, mentioned: &[String]) -> Option<Record> {
        if record.role != Role::ToolOutput || record.is_pruned() || record.is_compacted() {
            return None;
        }

        let content_files = extract_content_files(&record.body);
        let relevant = content_files
            .iter()
            .any(|f| mentioned.iter().any(|m| paths_overlap(f, m)));
        if relevant {
            return None;
        }

        let placeholder = placeholder_for(&content_files);
        let tokens = self.counter.count(&placeholder);
        if tokens > record.token_count {
            debug!(id = %record.id, "placeholder larger than body; keeping record");
            return None;
        }

        debug!(
            id = %record.id,
            files = ?content_files,
            tokens_before = record.token_count,
            tokens_after = tokens,
            "tool output pruned"
        );
        Some(record.pruned_with(placeholder, tokens))
    }
}
