//! Token counting for focus-phase budget decisions.
//!
//! The tokenizer only decides where to truncate; it never has to match a
//! model's exact vocabulary. The built-in heuristic uses a 4 chars/token
//! ratio, which over-counts slightly for English prose and therefore
//! never exceeds the caller's budget.

/// Approximate chars-per-token ratio for the heuristic tokenizer.
const CHARS_PER_TOKEN: usize = 4;

pub trait Tokenizer: Send + Sync {
    /// Stable tokenizer identifier reported back to callers.
    fn name(&self) -> &str;

    /// Token count for the full text.
    fn count(&self, text: &str) -> usize;

    /// Largest prefix of `text` at or under `max_tokens`, with its count.
    /// The boundary may split mid-word but must respect UTF-8 boundaries
    /// and never exceed the budget.
    fn truncate(&self, text: &str, max_tokens: usize) -> (String, usize);
}

pub struct HeuristicTokenizer;

impl Tokenizer for HeuristicTokenizer {
    fn name(&self) -> &str {
        "chars-per-token-4"
    }

    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> (String, usize) {
        let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
        let total_chars = text.chars().count();
        if total_chars <= max_chars {
            return (text.to_string(), self.count(text));
        }
        let prefix: String = text.chars().take(max_chars).collect();
        let tokens = self.count(&prefix);
        (prefix, tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_rounds_up() {
        let t = HeuristicTokenizer;
        assert_eq!(t.count(""), 0);
        assert_eq!(t.count("abc"), 1);
        assert_eq!(t.count("abcd"), 1);
        assert_eq!(t.count("abcde"), 2);
    }

    #[test]
    fn within_budget_returns_full_text() {
        let t = HeuristicTokenizer;
        let text = "hello world, this fits easily";
        let (out, tokens) = t.truncate(text, 100);
        assert_eq!(out, text);
        assert_eq!(tokens, t.count(text));
    }

    #[test]
    fn over_budget_returns_strict_prefix_within_limit() {
        let t = HeuristicTokenizer;
        let text = "a".repeat(1000);
        let (out, tokens) = t.truncate(&text, 10);
        assert_eq!(out.len(), 40);
        assert!(text.starts_with(&out));
        assert!(tokens <= 10);
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        let t = HeuristicTokenizer;
        let text = "日本語のテキストです。".repeat(50);
        let (out, tokens) = t.truncate(&text, 5);
        assert!(tokens <= 5);
        assert!(text.starts_with(&out));
        // Re-parsing proves the cut landed on a char boundary.
        assert_eq!(out.chars().count(), 20);
    }

    #[test]
    fn exact_budget_is_not_truncated() {
        let t = HeuristicTokenizer;
        let text = "a".repeat(40); // exactly 10 tokens
        let (out, tokens) = t.truncate(&text, 10);
        assert_eq!(out, text);
        assert_eq!(tokens, 10);
    }
}
