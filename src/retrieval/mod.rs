//! Hybrid retrieval and rank fusion
//!
//! Combines vector similarity search with lexical search over the same
//! corpus, fuses the two ranked streams with Reciprocal Rank Fusion, and
//! pushes source and metadata scope into both streams.

mod counts;
mod filter;
mod fusion;
mod hybrid;
mod lexical;
mod strategy;
mod trigram;
mod vector;

pub use counts::{source_counts, SourceCounts};
pub use filter::{metadata_contains, MetadataFilter, ScopeFilter};
pub use fusion::{reciprocal_rank_fusion, Candidate, FusedCandidate, FusionConfig, MatchType};
pub use hybrid::HybridSearcher;
pub use lexical::{analyze_query, match_expression, token_search, trigram_search};
pub use strategy::{LexicalMode, QueryStrategy};
pub use vector::{vector_search, AccessPath, VectorSearchOptions};

use crate::corpus::{Embedding, ItemId};
use crate::error::Result;
use serde::Serialize;
use serde_json::Value;

/// Hybrid search request
#[derive(Debug, Clone)]
pub struct HybridQuery {
    /// Query embedding values
    pub embedding: Vec<f32>,

    /// Declared embedding width
    pub dimension: usize,

    /// Raw query text
    pub text: String,

    /// Maximum number of results; the configured default when unset
    pub match_count: Option<usize>,

    /// Optional source filter
    pub source_id: Option<String>,

    /// Optional metadata containment filter (a JSON object)
    pub metadata_filter: Option<Value>,
}

impl HybridQuery {
    pub fn new(embedding: Vec<f32>, dimension: usize, text: impl Into<String>) -> Self {
        Self {
            embedding,
            dimension,
            text: text.into(),
            match_count: None,
            source_id: None,
            metadata_filter: None,
        }
    }

    pub fn with_match_count(mut self, match_count: usize) -> Self {
        self.match_count = Some(match_count);
        self
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_metadata_filter(mut self, filter: Value) -> Self {
        self.metadata_filter = Some(filter);
        self
    }

    /// Check the request before any search work: the dimension must be
    /// supported, the embedding must have that width, and the metadata
    /// filter must be a JSON object.
    pub(crate) fn validate(&self) -> Result<(Embedding, ScopeFilter)> {
        let embedding = Embedding::from_width(self.dimension, self.embedding.clone())?;
        let metadata = self
            .metadata_filter
            .clone()
            .map(MetadataFilter::from_value)
            .transpose()?;
        Ok((embedding, ScopeFilter::new(self.source_id.clone(), metadata)))
    }
}

/// One ranked result
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit<I> {
    #[serde(flatten)]
    pub item: I,

    /// Fused RRF score, or `1 - distance` when lexical search was skipped
    pub similarity: f64,

    pub match_type: MatchType,

    /// 1-based position in the vector stream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_rank: Option<usize>,

    /// 1-based position in the lexical stream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_rank: Option<usize>,
}

/// Ranked id before hydration
#[derive(Debug, Clone, Copy)]
pub(crate) struct RankedId {
    pub id: ItemId,
    pub similarity: f64,
    pub match_type: MatchType,
    pub vector_rank: Option<usize>,
    pub keyword_rank: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KbError;
    use serde_json::json;

    #[test]
    fn test_validate_rejects_unsupported_dimension() {
        let query = HybridQuery::new(vec![0.0; 512], 512, "hello");
        assert!(matches!(
            query.validate(),
            Err(KbError::UnsupportedDimension { width: 512 })
        ));
    }

    #[test]
    fn test_validate_rejects_length_mismatch() {
        let query = HybridQuery::new(vec![0.0; 10], 384, "hello");
        assert!(matches!(
            query.validate(),
            Err(KbError::EmbeddingLengthMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_non_object_filter() {
        let query =
            HybridQuery::new(vec![0.0; 384], 384, "hello").with_metadata_filter(json!(["a"]));
        assert!(matches!(query.validate(), Err(KbError::MalformedFilter(_))));
    }

    #[test]
    fn test_hit_serializes_flat() {
        #[derive(Debug, Clone, Serialize)]
        struct Item {
            id: i64,
            content: String,
        }

        let hit = SearchHit {
            item: Item {
                id: 3,
                content: "x".into(),
            },
            similarity: 0.5,
            match_type: MatchType::Hybrid,
            vector_rank: Some(1),
            keyword_rank: None,
        };

        let value = serde_json::to_value(&hit).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["match_type"], "hybrid");
        assert!(value.get("keyword_rank").is_none());
    }
}
