//! Essence extraction
//!
//! The essence is the short digest that every result carries, even when the
//! full sample is withheld. The default extractor is a word-truncation
//! heuristic; swap in a real summarizer through [`EssenceExtractor`].

use crate::error::FailureKind;
use crate::types::Draft;
use std::fmt::Debug;

/// Default essence length in words
pub const DEFAULT_ESSENCE_WORDS: usize = 24;

/// Produces the essence of a preview
pub trait EssenceExtractor: Send + Sync + Debug {
    /// Digest of a successful sample (which may be empty)
    fn essence(&self, draft: &Draft, sample: &str) -> String;

    /// Digest used when sampling failed
    fn degraded(&self, draft: &Draft, failure: FailureKind) -> String;
}

/// Keep the first N words
#[derive(Debug, Clone, Copy)]
pub struct TruncatingEssence {
    max_words: usize,
}

impl TruncatingEssence {
    /// Create extractor keeping at most `max_words` words
    #[inline]
    #[must_use]
    pub fn new(max_words: usize) -> Self {
        Self {
            max_words: max_words.max(1),
        }
    }
}

impl Default for TruncatingEssence {
    fn default() -> Self {
        Self::new(DEFAULT_ESSENCE_WORDS)
    }
}

impl EssenceExtractor for TruncatingEssence {
    fn essence(&self, draft: &Draft, sample: &str) -> String {
        if sample.trim().is_empty() {
            intent_digest(draft, self.max_words)
        } else {
            truncate_words(sample, self.max_words)
        }
    }

    fn degraded(&self, draft: &Draft, failure: FailureKind) -> String {
        degraded_essence(draft, failure, self.max_words)
    }
}

/// First `max_words` whitespace-separated words, with `...` when cut
#[must_use]
pub fn truncate_words(text: &str, max_words: usize) -> String {
    let mut words = text.split_whitespace();
    let kept: Vec<&str> = words.by_ref().take(max_words).collect();
    let mut out = kept.join(" ");
    if words.next().is_some() {
        out.push_str("...");
    }
    out
}

/// Digest of what the draft asks for
#[must_use]
pub fn intent_digest(draft: &Draft, max_words: usize) -> String {
    let goal = draft.goal.trim();
    if goal.is_empty() {
        truncate_words(&draft.input_text, max_words)
    } else {
        let budget = max_words.saturating_sub(goal.split_whitespace().count()).max(1);
        format!("{goal}: {}", truncate_words(&draft.input_text, budget))
    }
}

/// Essence-only fallback text for a failed preview
#[must_use]
pub fn degraded_essence(draft: &Draft, failure: FailureKind, max_words: usize) -> String {
    format!(
        "[essence-only fallback: {failure}] {}",
        intent_digest(draft, max_words)
    )
}
