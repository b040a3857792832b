//! Query strategy selection
//!
//! Decides from the query text alone which lexical stream, if any, runs next
//! to vector search.

use crate::config::ShortQueryPolicy;

/// Lexical stream to run alongside vector search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexicalMode {
    /// Vector search only; results are returned unfused
    Skip,
    /// Token-ranked full-text search. With `trigram_fallback` set, an empty
    /// token stream is retried through trigram similarity.
    Tokens { trigram_fallback: bool },
    /// Trigram similarity only
    Trigram,
}

/// Length-based query classifier
#[derive(Debug, Clone, Copy)]
pub struct QueryStrategy {
    short_query_min_chars: usize,
    policy: ShortQueryPolicy,
}

impl QueryStrategy {
    pub fn new(short_query_min_chars: usize, policy: ShortQueryPolicy) -> Self {
        Self {
            short_query_min_chars,
            policy,
        }
    }

    /// True when the trimmed query has fewer characters than the threshold
    pub fn is_short(&self, text: &str) -> bool {
        text.trim().chars().count() < self.short_query_min_chars
    }

    pub fn classify(&self, text: &str) -> LexicalMode {
        match (self.is_short(text), self.policy) {
            (true, ShortQueryPolicy::VectorOnly) => LexicalMode::Skip,
            (true, ShortQueryPolicy::TrigramFallback) => LexicalMode::Trigram,
            (false, policy) => LexicalMode::Tokens {
                trigram_fallback: policy == ShortQueryPolicy::TrigramFallback,
            },
        }
    }
}

impl Default for QueryStrategy {
    fn default() -> Self {
        Self::new(4, ShortQueryPolicy::VectorOnly)
    }
}
