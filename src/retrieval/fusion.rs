//! Reciprocal Rank Fusion algorithm for combining search results

use crate::corpus::ItemId;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// One entry of a ranked candidate list.
///
/// `score` is whatever the producing stream ranks by: cosine distance for
/// vector search (lower is better), relevance for lexical search (higher is
/// better). Lists are always handed over best first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: ItemId,
    pub score: f64,
}

/// Which streams an item was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Vector,
    Keyword,
    Hybrid,
}

impl MatchType {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchType::Vector => "vector",
            MatchType::Keyword => "keyword",
            MatchType::Hybrid => "hybrid",
        }
    }
}

/// Configuration for fusion algorithm
#[derive(Debug, Clone, Copy)]
pub struct FusionConfig {
    /// RRF K constant (typically 60)
    pub rrf_k: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { rrf_k: 60.0 }
    }
}

/// A fused result with its 1-based position in each input list
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedCandidate {
    pub id: ItemId,
    pub score: f64,
    pub vector_rank: Option<usize>,
    pub keyword_rank: Option<usize>,
}

impl FusedCandidate {
    pub fn match_type(&self) -> MatchType {
        match (self.vector_rank, self.keyword_rank) {
            (Some(_), Some(_)) => MatchType::Hybrid,
            (None, Some(_)) => MatchType::Keyword,
            _ => MatchType::Vector,
        }
    }
}

/// Apply Reciprocal Rank Fusion to combine two ranked lists
///
/// RRF formula: score(id) = sum over the lists containing id of 1 / (k + rank),
/// with 1-based ranks. A list that does not contain the id contributes 0.
///
/// Results are sorted by fused score descending, then id ascending, and
/// truncated to `limit`.
pub fn reciprocal_rank_fusion(
    vector_results: &[Candidate],
    keyword_results: &[Candidate],
    config: &FusionConfig,
    limit: usize,
) -> Vec<FusedCandidate> {
    let mut fused: AHashMap<ItemId, FusedCandidate> =
        AHashMap::with_capacity(vector_results.len() + keyword_results.len());

    for (index, candidate) in vector_results.iter().enumerate() {
        let rank = index + 1;
        let entry = fused.entry(candidate.id).or_insert(FusedCandidate {
            id: candidate.id,
            score: 0.0,
            vector_rank: None,
            keyword_rank: None,
        });
        // first occurrence wins if a stream repeats an id
        if entry.vector_rank.is_none() {
            entry.vector_rank = Some(rank);
            entry.score += 1.0 / (config.rrf_k + rank as f64);
        }
    }

    for (index, candidate) in keyword_results.iter().enumerate() {
        let rank = index + 1;
        let entry = fused.entry(candidate.id).or_insert(FusedCandidate {
            id: candidate.id,
            score: 0.0,
            vector_rank: None,
            keyword_rank: None,
        });
        if entry.keyword_rank.is_none() {
            entry.keyword_rank = Some(rank);
            entry.score += 1.0 / (config.rrf_k + rank as f64);
        }
    }

    let mut results: Vec<FusedCandidate> = fused.into_values().collect();
    results.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
    results.truncate(limit);

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(ids: &[ItemId]) -> Vec<Candidate> {
        ids.iter()
            .map(|&id| Candidate { id, score: 0.0 })
            .collect()
    }

    #[test]
    fn test_rrf_basic() {
        let vector = list(&[1, 2, 3]);
        let keyword = list(&[2, 1, 4]);

        let fused = reciprocal_rank_fusion(&vector, &keyword, &FusionConfig::default(), 10);

        assert_eq!(fused.len(), 4);
        // 1 and 2 tie on score; id breaks the tie
        assert_eq!(fused[0].id, 1);
        assert_eq!(fused[1].id, 2);
        assert_eq!(fused[0].match_type(), MatchType::Hybrid);
        assert!((fused[0].score - fused[1].score).abs() < 1e-15);
    }

    #[test]
    fn test_top_of_both_lists() {
        let fused = reciprocal_rank_fusion(
            &list(&[7, 8]),
            &list(&[7, 9]),
            &FusionConfig::default(),
            10,
        );

        assert_eq!(fused[0].id, 7);
        assert!((fused[0].score - 2.0 / 61.0).abs() < 1e-12);
        assert_eq!(fused[0].vector_rank, Some(1));
        assert_eq!(fused[0].keyword_rank, Some(1));
    }

    #[test]
    fn test_absent_list_contributes_nothing() {
        let fused = reciprocal_rank_fusion(&list(&[1]), &list(&[2]), &FusionConfig::default(), 10);

        assert_eq!(fused.len(), 2);
        assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-12);
        assert_eq!(fused[0].match_type(), MatchType::Vector);
        assert_eq!(fused[1].match_type(), MatchType::Keyword);
    }

    #[test]
    fn test_truncates_and_orders() {
        let vector = list(&[5, 4, 3, 2, 1]);
        let fused = reciprocal_rank_fusion(&vector, &[], &FusionConfig { rrf_k: 10.0 }, 3);

        let ids: Vec<_> = fused.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
        assert!(fused.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
