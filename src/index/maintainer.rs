//! Out-of-band index builds
//!
//! Builds read a consistent snapshot of one slot's embeddings, construct an
//! HNSW graph with the configured tuning and publish it to the registry.
//! While a build runs, and after a failed one, searches scan.

use crate::config::IndexTuning;
use crate::corpus::{decode_vector, CorpusKind, VectorSlot};
use crate::error::{KbError, Result};
use crate::index::{live_coverage, Coverage, IndexKey, IndexRegistry, IndexScope, VectorIndex};
use crate::storage::Database;
use rusqlite::params;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

const CHUNKS_VECTORS_SQL: &str = "\
SELECT id, embedding
FROM chunks
WHERE embedding_dim = ?1 AND (?2 IS NULL OR source_id = ?2)
ORDER BY id";

const CODE_EXAMPLES_VECTORS_SQL: &str = "\
SELECT id, embedding
FROM code_examples
WHERE embedding_dim = ?1 AND (?2 IS NULL OR source_id = ?2)
ORDER BY id";

const CHUNKS_LARGE_SOURCES_SQL: &str = "\
SELECT source_id
FROM chunks
WHERE embedding_dim = ?1
GROUP BY source_id
HAVING COUNT(*) >= ?2
ORDER BY source_id";

const CODE_EXAMPLES_LARGE_SOURCES_SQL: &str = "\
SELECT source_id
FROM code_examples
WHERE embedding_dim = ?1
GROUP BY source_id
HAVING COUNT(*) >= ?2
ORDER BY source_id";

/// Builds vector indexes and publishes them to a registry
#[derive(Clone)]
pub struct IndexMaintainer {
    database: Arc<Database>,
    registry: Arc<IndexRegistry>,
    tuning: IndexTuning,
}

impl IndexMaintainer {
    pub fn new(database: Arc<Database>, registry: Arc<IndexRegistry>, tuning: IndexTuning) -> Self {
        Self {
            database,
            registry,
            tuning,
        }
    }

    /// Build the index for one slot and scope, blocking the current thread.
    ///
    /// On failure the entry is marked failed and searches keep scanning.
    pub fn build(&self, slot: VectorSlot, scope: IndexScope) -> Result<Coverage> {
        let key = IndexKey::new(slot, scope);
        self.registry.mark_building(&key);

        let started = Instant::now();
        match self.build_index(&key) {
            Ok((index, coverage)) => {
                tracing::info!(
                    "Built vector index {} with {} vectors in {:?}",
                    key,
                    index.len(),
                    started.elapsed()
                );
                self.registry.publish(&key, index, coverage);
                Ok(coverage)
            }
            Err(e) => {
                tracing::warn!("Vector index build failed for {}: {}", key, e);
                self.registry.mark_failed(&key, e.to_string());
                Err(e)
            }
        }
    }

    /// Build on the blocking thread pool
    pub fn spawn_build(&self, slot: VectorSlot, scope: IndexScope) -> JoinHandle<Result<Coverage>> {
        let maintainer = self.clone();
        // visible as Building before the task is scheduled
        self.registry
            .mark_building(&IndexKey::new(slot, scope.clone()));
        tokio::task::spawn_blocking(move || maintainer.build(slot, scope))
    }

    /// Build source-scoped indexes for every source holding at least
    /// `partial_index_min_rows` embedded rows in the slot.
    ///
    /// Returns the source ids that were indexed.
    pub fn build_partial_indexes(&self, slot: VectorSlot) -> Result<Vec<String>> {
        let sources = self.large_sources(slot)?;
        for source_id in &sources {
            self.build(slot, IndexScope::Source(source_id.clone()))?;
        }
        Ok(sources)
    }

    fn large_sources(&self, slot: VectorSlot) -> Result<Vec<String>> {
        let sql = match slot.kind {
            CorpusKind::Chunks => CHUNKS_LARGE_SOURCES_SQL,
            CorpusKind::CodeExamples => CODE_EXAMPLES_LARGE_SOURCES_SQL,
        };

        let conn = self.database.get_conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(
            params![
                slot.dimension.width() as i64,
                self.tuning.partial_index_min_rows as i64
            ],
            |row| row.get::<_, String>(0),
        )?;
        let sources = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sources)
    }

    fn build_index(&self, key: &IndexKey) -> Result<(VectorIndex, Coverage)> {
        let slot = key.slot;
        let source_id = key.scope.source_id();
        let sql = match slot.kind {
            CorpusKind::Chunks => CHUNKS_VECTORS_SQL,
            CorpusKind::CodeExamples => CODE_EXAMPLES_VECTORS_SQL,
        };

        let mut conn = self.database.get_conn()?;
        // one read transaction so coverage and vectors come from the same snapshot
        let tx = conn.transaction()?;

        let coverage = live_coverage(&tx, slot, source_id)?;
        let mut index = VectorIndex::new(slot.dimension, coverage.rows as usize, &self.tuning);

        {
            let mut stmt = tx.prepare(sql)?;
            let mut rows = stmt.query(params![slot.dimension.width() as i64, source_id])?;
            while let Some(row) = rows.next()? {
                let id: i64 = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                if blob.len() != slot.dimension.byte_len() {
                    return Err(KbError::Index(format!(
                        "Row {} has a {} byte embedding, expected {}",
                        id,
                        blob.len(),
                        slot.dimension.byte_len()
                    )));
                }
                index.insert(id, &decode_vector(&blob))?;
            }
        }

        tx.commit()?;

        if !index.zero_norm_ids().is_empty() {
            tracing::debug!(
                "Kept {} zero-norm vectors outside the graph of {}",
                index.zero_norm_ids().len(),
                key
            );
        }

        Ok((index, coverage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{Embedding, EmbeddingDimension, NewChunk, NewSource};
    use crate::index::IndexStatus;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<Database>) {
        let temp = TempDir::new().unwrap();
        let db = Database::new(&temp.path().join("corpus.db")).unwrap();
        db.upsert_source(&NewSource::new("big")).unwrap();
        db.upsert_source(&NewSource::new("small")).unwrap();
        for i in 0..6 {
            let source = if i < 4 { "big" } else { "small" };
            let mut values = vec![0.0; 384];
            values[i] = 1.0;
            db.insert_chunk(
                &NewChunk::new(source, format!("https://x/{}", i), 0, format!("chunk {}", i))
                    .with_embedding(Embedding::new(EmbeddingDimension::D384, values).unwrap()),
            )
            .unwrap();
        }
        (temp, Arc::new(db))
    }

    #[test]
    fn test_build_publishes_ready_index() {
        let (_temp, db) = setup();
        let registry = Arc::new(IndexRegistry::new());
        let maintainer = IndexMaintainer::new(db, registry.clone(), IndexTuning::default());
        let slot = EmbeddingDimension::D384.slot(CorpusKind::Chunks);

        let coverage = maintainer.build(slot, IndexScope::Corpus).unwrap();
        assert_eq!(coverage.rows, 6);

        let key = IndexKey::new(slot, IndexScope::Corpus);
        assert_eq!(registry.status(&key), Some(IndexStatus::Ready));
        assert_eq!(registry.ready(&key).unwrap().index.len(), 6);
    }

    #[test]
    fn test_partial_indexes_for_large_sources() {
        let (_temp, db) = setup();
        let registry = Arc::new(IndexRegistry::new());
        let tuning = IndexTuning {
            partial_index_min_rows: 3,
            ..IndexTuning::default()
        };
        let maintainer = IndexMaintainer::new(db, registry.clone(), tuning);
        let slot = EmbeddingDimension::D384.slot(CorpusKind::Chunks);

        let built = maintainer.build_partial_indexes(slot).unwrap();
        assert_eq!(built, vec!["big".to_string()]);

        let ready = registry
            .ready(&IndexKey::new(slot, IndexScope::Source("big".into())))
            .unwrap();
        assert_eq!(ready.coverage.rows, 4);
    }

    #[tokio::test]
    async fn test_spawn_build() {
        let (_temp, db) = setup();
        let registry = Arc::new(IndexRegistry::new());
        let maintainer = IndexMaintainer::new(db, registry.clone(), IndexTuning::default());
        let slot = EmbeddingDimension::D384.slot(CorpusKind::Chunks);

        let coverage = maintainer
            .spawn_build(slot, IndexScope::Corpus)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(coverage.rows, 6);
        assert!(registry
            .ready(&IndexKey::new(slot, IndexScope::Corpus))
            .is_some());
    }
}
