//! Hybrid search combining vector and lexical search

use crate::config::RetrievalConfig;
use crate::corpus::{Chunk, CodeExample, CorpusItem, CorpusKind, EmbeddingDimension, ItemId};
use crate::error::Result;
use crate::index::IndexRegistry;
use crate::retrieval::fusion::Candidate;
use crate::retrieval::{
    counts, lexical, reciprocal_rank_fusion, vector, FusionConfig, HybridQuery, LexicalMode,
    MatchType, QueryStrategy, RankedId, ScopeFilter, SearchHit, SourceCounts,
    VectorSearchOptions,
};
use crate::storage::{hydrate, Database};
use rusqlite::Connection;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Hybrid searcher over both corpora
///
/// Stateless between calls apart from the shared index registry, so one
/// searcher can serve any number of concurrent queries.
pub struct HybridSearcher {
    database: Arc<Database>,
    registry: Arc<IndexRegistry>,
    config: RetrievalConfig,
}

impl HybridSearcher {
    /// Create a new hybrid searcher
    pub fn new(
        database: Arc<Database>,
        registry: Arc<IndexRegistry>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            database,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Search document chunks
    pub async fn search_chunks(&self, query: &HybridQuery) -> Result<Vec<SearchHit<Chunk>>> {
        self.search::<Chunk>(query).await
    }

    /// Search code examples (matched on content and summary)
    pub async fn search_code_examples(
        &self,
        query: &HybridQuery,
    ) -> Result<Vec<SearchHit<CodeExample>>> {
        self.search::<CodeExample>(query).await
    }

    /// Chunk search for callers that only produce 1536-wide embeddings
    pub async fn search_chunks_legacy(
        &self,
        embedding: Vec<f32>,
        text: &str,
        match_count: usize,
        metadata_filter: Option<Value>,
        source_id: Option<String>,
    ) -> Result<Vec<SearchHit<Chunk>>> {
        let query = legacy_query(embedding, text, match_count, metadata_filter, source_id);
        self.search_chunks(&query).await
    }

    /// Code example search for callers that only produce 1536-wide embeddings
    pub async fn search_code_examples_legacy(
        &self,
        embedding: Vec<f32>,
        text: &str,
        match_count: usize,
        metadata_filter: Option<Value>,
        source_id: Option<String>,
    ) -> Result<Vec<SearchHit<CodeExample>>> {
        let query = legacy_query(embedding, text, match_count, metadata_filter, source_id);
        self.search_code_examples(&query).await
    }

    /// Chunk and code example counts per source, in one storage round trip
    pub async fn source_counts(&self, source_ids: &[String]) -> Result<Vec<SourceCounts>> {
        if source_ids.is_empty() {
            return Ok(Vec::new());
        }
        let database = Arc::clone(&self.database);
        let source_ids = source_ids.to_vec();
        run_blocking(move || {
            let conn = database.get_conn()?;
            counts::source_counts(&conn, &source_ids)
        })
        .await
    }

    /// Perform hybrid search over one corpus
    async fn search<I: CorpusItem>(&self, query: &HybridQuery) -> Result<Vec<SearchHit<I>>> {
        let (embedding, scope) = query.validate()?;
        let match_count = query.match_count.unwrap_or(self.config.default_match_count);
        if match_count == 0 {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let budget = match_count.saturating_mul(self.config.candidate_multiplier);
        let mode = QueryStrategy::new(
            self.config.short_query_min_chars,
            self.config.short_query_policy,
        )
        .classify(&query.text);

        let vector_job = {
            let database = Arc::clone(&self.database);
            let registry = Arc::clone(&self.registry);
            let scope = scope.clone();
            let options = VectorSearchOptions {
                ef_search: self.config.hnsw_ef_search,
                scan_warn_rows: self.config.scan_warn_rows,
            };
            move || -> Result<Vec<Candidate>> {
                let conn = database.get_conn()?;
                let (found, path) = vector::vector_search(
                    &conn, &registry, I::KIND, &embedding, &scope, budget, &options,
                )?;
                tracing::debug!("Vector stream: {} candidates via {:?}", found.len(), path);
                Ok(found)
            }
        };

        let (vector_hits, lexical_hits) = match mode {
            LexicalMode::Skip => (run_blocking(vector_job).await?, None),
            mode => {
                let lexical_job = {
                    let database = Arc::clone(&self.database);
                    let text = query.text.clone();
                    let threshold = self.config.trigram_threshold;
                    move || -> Result<Vec<Candidate>> {
                        let conn = database.get_conn()?;
                        lexical_stream(&conn, I::KIND, mode, &text, &scope, budget, threshold)
                    }
                };
                let (v, l) = tokio::try_join!(run_blocking(vector_job), run_blocking(lexical_job))?;
                (v, Some(l))
            }
        };

        let ranked = rank(&vector_hits, lexical_hits.as_deref(), self.config.rrf_k, match_count);

        let database = Arc::clone(&self.database);
        let ids: Vec<ItemId> = ranked.iter().map(|r| r.id).collect();
        let items: Vec<I> = run_blocking(move || {
            let conn = database.get_conn()?;
            hydrate::<I>(&conn, &ids)
        })
        .await?;

        let hits = attach(ranked, items);

        tracing::debug!(
            "Hybrid search on {} returned {} hits (vector {}, lexical {}) in {:?}",
            I::KIND,
            hits.len(),
            vector_hits.len(),
            lexical_hits.as_ref().map_or(0, Vec::len),
            started.elapsed()
        );

        Ok(hits)
    }
}

fn legacy_query(
    embedding: Vec<f32>,
    text: &str,
    match_count: usize,
    metadata_filter: Option<Value>,
    source_id: Option<String>,
) -> HybridQuery {
    let mut query = HybridQuery::new(embedding, EmbeddingDimension::LEGACY.width(), text)
        .with_match_count(match_count);
    query.metadata_filter = metadata_filter;
    query.source_id = source_id;
    query
}

/// Run the lexical stream selected by the strategy
fn lexical_stream(
    conn: &Connection,
    kind: CorpusKind,
    mode: LexicalMode,
    text: &str,
    scope: &ScopeFilter,
    budget: usize,
    threshold: f64,
) -> Result<Vec<Candidate>> {
    match mode {
        LexicalMode::Skip => Ok(Vec::new()),
        LexicalMode::Trigram => lexical::trigram_search(conn, kind, text, scope, budget, threshold),
        LexicalMode::Tokens { trigram_fallback } => {
            let found = lexical::token_search(conn, kind, text, scope, budget)?;
            if found.is_empty() && trigram_fallback {
                tracing::debug!("Token stream empty; retrying with trigram similarity");
                return lexical::trigram_search(conn, kind, text, scope, budget, threshold);
            }
            Ok(found)
        }
    }
}

/// Order candidates for hydration.
///
/// Without a lexical stream the vector list is returned as is, scored by
/// similarity. Otherwise the two lists are fused.
fn rank(
    vector_hits: &[Candidate],
    lexical_hits: Option<&[Candidate]>,
    rrf_k: f64,
    match_count: usize,
) -> Vec<RankedId> {
    match lexical_hits {
        None => vector_hits
            .iter()
            .take(match_count)
            .enumerate()
            .map(|(index, c)| RankedId {
                id: c.id,
                similarity: 1.0 - c.score,
                match_type: MatchType::Vector,
                vector_rank: Some(index + 1),
                keyword_rank: None,
            })
            .collect(),
        Some(lexical_hits) => {
            reciprocal_rank_fusion(vector_hits, lexical_hits, &FusionConfig { rrf_k }, match_count)
                .into_iter()
                .map(|f| RankedId {
                    id: f.id,
                    similarity: f.score,
                    match_type: f.match_type(),
                    vector_rank: f.vector_rank,
                    keyword_rank: f.keyword_rank,
                })
                .collect()
        }
    }
}

/// Pair ranked ids with their hydrated rows, dropping rows deleted meanwhile
fn attach<I: CorpusItem>(ranked: Vec<RankedId>, items: Vec<I>) -> Vec<SearchHit<I>> {
    let mut by_id: HashMap<ItemId, I> = items.into_iter().map(|i| (i.id(), i)).collect();
    ranked
        .into_iter()
        .filter_map(|r| {
            by_id.remove(&r.id).map(|item| SearchHit {
                item,
                similarity: r.similarity,
                match_type: r.match_type,
                vector_rank: r.vector_rank,
                keyword_rank: r.keyword_rank,
            })
        })
        .collect()
}

/// Run storage work on the blocking pool
async fn run_blocking<T, F>(job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(job).await?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(ids: &[ItemId]) -> Vec<Candidate> {
        ids.iter()
            .enumerate()
            .map(|(i, &id)| Candidate {
                id,
                score: i as f64 * 0.1,
            })
            .collect()
    }

    #[test]
    fn test_rank_vector_only() {
        let ranked = rank(&list(&[4, 2, 9]), None, 60.0, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, 4);
        assert!((ranked[0].similarity - 1.0).abs() < 1e-12);
        assert!((ranked[1].similarity - 0.9).abs() < 1e-12);
        assert!(ranked.iter().all(|r| r.match_type == MatchType::Vector));
    }

    #[test]
    fn test_rank_fused() {
        let ranked = rank(&list(&[1, 2]), Some(&list(&[3, 1])), 60.0, 10);
        assert_eq!(ranked[0].id, 1);
        assert_eq!(ranked[0].match_type, MatchType::Hybrid);
        assert_eq!(ranked[0].keyword_rank, Some(2));
    }

    #[test]
    fn test_attach_skips_missing_rows() {
        let ranked = rank(&list(&[1, 2, 3]), None, 60.0, 3);
        let items = vec![
            Chunk {
                id: 3,
                url: "u3".into(),
                chunk_number: 0,
                content: "c".into(),
                metadata: serde_json::json!({}),
                source_id: "s".into(),
            },
            Chunk {
                id: 1,
                url: "u1".into(),
                chunk_number: 0,
                content: "a".into(),
                metadata: serde_json::json!({}),
                source_id: "s".into(),
            },
        ];
        let hits = attach(ranked, items);
        let ids: Vec<_> = hits.iter().map(|h| h.item.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }
}
