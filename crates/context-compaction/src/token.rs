//! Token counting: pluggable estimators for pricing record bodies.
//!
//! Callers with a real tokenizer implement [`TokenCounter`] themselves; the
//! estimators here are provider-agnostic approximations.

/// Deterministic, side-effect free token counter.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> u64;

    /// Counter name for logging.
    fn name(&self) -> &str;
}

/// Character-count based estimator (chars / divisor, rounded up).
///
/// Uses the approximation that ~4 characters per token for English text.
#[derive(Debug, Clone)]
pub struct CharCountEstimator {
    /// Characters per token.
    pub chars_per_token: f64,
}

impl Default for CharCountEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: 4.0,
        }
    }
}

impl TokenCounter for CharCountEstimator {
    fn count(&self, text: &str) -> u64 {
        (text.len() as f64 / self.chars_per_token).ceil() as u64
    }

    fn name(&self) -> &str {
        "char_count"
    }
}

/// Simple word-count based estimator (words × factor).
#[derive(Debug, Clone)]
pub struct WordCountEstimator {
    /// Tokens per word multiplier.
    pub factor: f64,
}

impl Default for WordCountEstimator {
    fn default() -> Self {
        Self { factor: 1.3 }
    }
}

impl TokenCounter for WordCountEstimator {
    fn count(&self, text: &str) -> u64 {
        let word_count = text.split_whitespace().count();
        (word_count as f64 * self.factor).ceil() as u64
    }

    fn name(&self) -> &str {
        "word_count"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_count_estimator() {
        let est = CharCountEstimator::default();
        assert_eq!(est.count("hello world"), 3); // 11 / 4 = 2.75 → 3
        assert_eq!(est.count(""), 0);
        assert_eq!(est.name(), "char_count");
    }

    #[test]
    fn test_word_count_estimator() {
        let est = WordCountEstimator::default();
        assert_eq!(est.count("hello world"), 3); // 2 * 1.3 = 2.6 → 3
        assert_eq!(est.count("   "), 0);
        assert_eq!(est.name(), "word_count");
    }

    #[test]
    fn test_custom_factor() {
        let est = WordCountEstimator { factor: 2.0 };
        assert_eq!(est.count("one two three"), 6);

        let est = CharCountEstimator {
            chars_per_token: 1.0,
        };
        assert_eq!(est.count("abc"), 3);
    }
}
