//! HNSW vector index for approximate nearest-neighbour search
use crate::config::IndexTuning;
use crate::corpus::{EmbeddingDimension, ItemId};
use crate::error::{KbError, Result};
use hnsw_rs::filter::FilterT;
use hnsw_rs::prelude::*;

/// HNSW vector index wrapper
///
/// Holds the embeddings of one vector slot (optionally restricted to one
/// source) under cosine distance. Item ids are used directly as HNSW data ids.
/// The graph only proposes candidates; callers re-score them exactly.
///
/// Zero vectors have no direction and stay out of the graph. Their ids are
/// kept aside so searches can still rank them at distance 1.
pub struct VectorIndex {
    /// Inner HNSW index
    hnsw: Hnsw<'static, f32, DistCosine>,
    /// Vector dimension
    dimension: EmbeddingDimension,
    /// Number of vectors in the graph
    len: usize,
    /// Ids of zero vectors, ascending when inserted in id order
    zero_norm: Vec<ItemId>,
}

impl VectorIndex {
    /// Create an empty index
    ///
    /// # Arguments
    /// * `dimension` - Embedding dimension of every inserted vector
    /// * `capacity` - Expected number of vectors
    /// * `tuning` - HNSW build parameters
    pub fn new(dimension: EmbeddingDimension, capacity: usize, tuning: &IndexTuning) -> Self {
        let hnsw = Hnsw::<f32, DistCosine>::new(
            tuning.hnsw_m,
            capacity.max(1),
            tuning.hnsw_max_layer,
            tuning.hnsw_ef_construction,
            DistCosine {},
        );

        Self {
            hnsw,
            dimension,
            len: 0,
            zero_norm: Vec::new(),
        }
    }

    /// Insert a vector under an item id
    pub fn insert(&mut self, id: ItemId, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension.width() {
            return Err(KbError::EmbeddingLengthMismatch {
                expected: self.dimension.width(),
                actual: vector.len(),
            });
        }
        let data_id = usize::try_from(id)
            .map_err(|_| KbError::Index(format!("Item id {} cannot be indexed", id)))?;

        if vector.iter().all(|v| *v == 0.0) {
            self.zero_norm.push(id);
            return Ok(());
        }

        self.hnsw.insert_slice((vector, data_id));
        self.len += 1;

        Ok(())
    }

    /// Search for up to `k` nearest neighbours
    ///
    /// # Arguments
    /// * `query` - Query vector
    /// * `k` - Number of candidates to return
    /// * `ef_search` - HNSW search parameter (higher = better recall, slower search)
    /// * `allowed` - Sorted ids the walk may return; `None` allows every id
    ///
    /// # Returns
    /// Candidate item ids, nearest first
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
        allowed: Option<&Vec<usize>>,
    ) -> Result<Vec<ItemId>> {
        if query.len() != self.dimension.width() {
            return Err(KbError::EmbeddingLengthMismatch {
                expected: self.dimension.width(),
                actual: query.len(),
            });
        }
        if k == 0 || self.len == 0 {
            return Ok(Vec::new());
        }

        let ef = ef_search.max(k);
        let neighbours = match allowed {
            Some(ids) => self
                .hnsw
                .search_filter(query, k, ef, Some(ids as &dyn FilterT)),
            None => self.hnsw.search(query, k, ef),
        };

        Ok(neighbours
            .into_iter()
            .map(|neighbour| neighbour.d_id as ItemId)
            .collect())
    }

    /// Ids of zero vectors held outside the graph
    pub fn zero_norm_ids(&self) -> &[ItemId] {
        &self.zero_norm
    }

    /// Get the number of vectors in the graph
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dimension(&self) -> EmbeddingDimension {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, hot: &[(usize, f32)]) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        for &(i, x) in hot {
            v[i] = x;
        }
        v
    }

    #[test]
    fn test_index_creation() {
        let index = VectorIndex::new(EmbeddingDimension::D384, 10, &IndexTuning::default());
        assert_eq!(index.dimension(), EmbeddingDimension::D384);
        assert_eq!(index.len(), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_insert_and_search() {
        let mut index = VectorIndex::new(EmbeddingDimension::D384, 3, &IndexTuning::default());

        index.insert(1, &unit(384, &[(0, 1.0)])).unwrap();
        index.insert(2, &unit(384, &[(1, 1.0)])).unwrap();
        index.insert(3, &unit(384, &[(0, 0.9), (1, 0.1)])).unwrap();
        assert_eq!(index.len(), 3);

        let results = index.search(&unit(384, &[(0, 1.0)]), 2, 50, None).unwrap();
        assert_eq!(results, vec![1, 3]);
    }

    #[test]
    fn test_filtered_search() {
        let mut index = VectorIndex::new(EmbeddingDimension::D384, 3, &IndexTuning::default());

        index.insert(1, &unit(384, &[(0, 1.0)])).unwrap();
        index.insert(2, &unit(384, &[(1, 1.0)])).unwrap();
        index.insert(3, &unit(384, &[(0, 0.9), (1, 0.1)])).unwrap();

        let allowed = vec![2usize, 3];
        let results = index
            .search(&unit(384, &[(0, 1.0)]), 1, 50, Some(&allowed))
            .unwrap();
        assert_eq!(results, vec![3]);
    }

    #[test]
    fn test_zero_vectors_kept_outside_graph() {
        let mut index = VectorIndex::new(EmbeddingDimension::D384, 3, &IndexTuning::default());

        index.insert(1, &unit(384, &[(0, 1.0)])).unwrap();
        index.insert(2, &unit(384, &[])).unwrap();
        index.insert(3, &unit(384, &[])).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.zero_norm_ids(), &[2, 3]);

        let results = index.search(&unit(384, &[(0, 1.0)]), 3, 50, None).unwrap();
        assert_eq!(results, vec![1]);
    }

    #[test]
    fn test_dimension_validation() {
        let mut index = VectorIndex::new(EmbeddingDimension::D384, 1, &IndexTuning::default());

        let result = index.insert(1, &[1.0; 128]);
        assert!(matches!(
            result,
            Err(KbError::EmbeddingLengthMismatch {
                expected: 384,
                actual: 128
            })
        ));
    }
}
