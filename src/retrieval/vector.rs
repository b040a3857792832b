//! Vector similarity search
//!
//! Access paths, tried in order:
//! 1. a ready source-scoped index when the scope names a source
//! 2. a ready corpus-wide index, walked with the in-scope ids as a filter
//! 3. an exhaustive scan in storage
//!
//! Index candidates are re-scored with exact distances and ordered by
//! (distance, id), so every path orders the rows it returns identically.

use crate::corpus::{CorpusKind, Embedding, ItemId, VectorSlot};
use crate::error::Result;
use crate::index::{live_coverage, IndexKey, IndexRegistry, IndexScope, ReadyIndex};
use crate::retrieval::fusion::Candidate;
use crate::retrieval::ScopeFilter;
use crate::storage::corpus::id_list_param;
use rusqlite::{params, Connection};

const CHUNKS_SCAN_SQL: &str = "\
SELECT id, vec_cosine_distance(embedding, ?1) AS distance
FROM chunks
WHERE embedding_dim = ?2
  AND (?3 IS NULL OR source_id = ?3)
  AND json_contains(metadata, ?4)
ORDER BY distance ASC, id ASC
LIMIT ?5";

const CODE_EXAMPLES_SCAN_SQL: &str = "\
SELECT id, vec_cosine_distance(embedding, ?1) AS distance
FROM code_examples
WHERE embedding_dim = ?2
  AND (?3 IS NULL OR source_id = ?3)
  AND json_contains(metadata, ?4)
ORDER BY distance ASC, id ASC
LIMIT ?5";

const CHUNKS_SCOPE_IDS_SQL: &str = "\
SELECT id
FROM chunks
WHERE embedding_dim = ?1
  AND (?2 IS NULL OR source_id = ?2)
  AND json_contains(metadata, ?3)
ORDER BY id";

const CODE_EXAMPLES_SCOPE_IDS_SQL: &str = "\
SELECT id
FROM code_examples
WHERE embedding_dim = ?1
  AND (?2 IS NULL OR source_id = ?2)
  AND json_contains(metadata, ?3)
ORDER BY id";

const CHUNKS_RESCORE_SQL: &str = "\
SELECT id, vec_cosine_distance(embedding, ?1)
FROM chunks
WHERE id IN (SELECT value FROM json_each(?2)) AND embedding_dim = ?3";

const CODE_EXAMPLES_RESCORE_SQL: &str = "\
SELECT id, vec_cosine_distance(embedding, ?1)
FROM code_examples
WHERE id IN (SELECT value FROM json_each(?2)) AND embedding_dim = ?3";

/// Which access path answered a vector search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPath {
    PartialIndex,
    CorpusIndex,
    Scan,
}

/// Knobs read at query time
#[derive(Debug, Clone, Copy)]
pub struct VectorSearchOptions {
    pub ef_search: usize,
    pub scan_warn_rows: usize,
}

impl Default for VectorSearchOptions {
    fn default() -> Self {
        Self {
            ef_search: 64,
            scan_warn_rows: 100_000,
        }
    }
}

/// Nearest neighbours of `query` in the slot, nearest first, at most `budget`.
///
/// `score` on each candidate is the cosine distance.
pub fn vector_search(
    conn: &Connection,
    registry: &IndexRegistry,
    kind: CorpusKind,
    query: &Embedding,
    scope: &ScopeFilter,
    budget: usize,
    options: &VectorSearchOptions,
) -> Result<(Vec<Candidate>, AccessPath)> {
    if budget == 0 {
        return Ok((Vec::new(), AccessPath::Scan));
    }
    let slot = query.dimension().slot(kind);

    if let Some(source_id) = scope.source_param() {
        let key = IndexKey::new(slot, IndexScope::Source(source_id.to_string()));
        if let Some(ready) = fresh_index(conn, registry, &key)? {
            // the source predicate is implied by the index scope
            let metadata_only = ScopeFilter::new(None, scope.metadata.clone());
            if let Some(found) =
                index_search(conn, slot, &ready, query, &metadata_only, Some(source_id), budget, options)?
            {
                tracing::debug!("Vector search on {} via partial index: {} rows", key, found.len());
                return Ok((found, AccessPath::PartialIndex));
            }
        }
    }

    let key = IndexKey::new(slot, IndexScope::Corpus);
    if let Some(ready) = fresh_index(conn, registry, &key)? {
        if let Some(found) = index_search(
            conn,
            slot,
            &ready,
            query,
            scope,
            scope.source_param(),
            budget,
            options,
        )? {
            tracing::debug!("Vector search on {} via corpus index: {} rows", key, found.len());
            return Ok((found, AccessPath::CorpusIndex));
        }
    }

    let found = scan(conn, slot, query, scope, budget, options)?;
    Ok((found, AccessPath::Scan))
}

/// A ready index whose coverage still matches the live rows
fn fresh_index(
    conn: &Connection,
    registry: &IndexRegistry,
    key: &IndexKey,
) -> Result<Option<ReadyIndex>> {
    let Some(ready) = registry.ready(key) else {
        return Ok(None);
    };

    let live = live_coverage(conn, key.slot, key.scope.source_id())?;
    if live != ready.coverage {
        tracing::warn!(
            "Vector index {} is stale (built over {} rows up to id {}, now {} rows up to id {}); scanning",
            key,
            ready.coverage.rows,
            ready.coverage.max_id,
            live.rows,
            live.max_id
        );
        return Ok(None);
    }

    Ok(Some(ready))
}

/// Index-backed search. `None` means the index could not produce a full
/// answer and the caller should scan.
#[allow(clippy::too_many_arguments)]
fn index_search(
    conn: &Connection,
    slot: VectorSlot,
    ready: &ReadyIndex,
    query: &Embedding,
    filter: &ScopeFilter,
    coverage_source: Option<&str>,
    budget: usize,
    options: &VectorSearchOptions,
) -> Result<Option<Vec<Candidate>>> {
    let allowed = if filter.is_unconstrained() {
        None
    } else {
        Some(scope_ids(conn, slot, filter)?)
    };

    let in_scope = match &allowed {
        Some(ids) => ids.len(),
        None => live_coverage(conn, slot, coverage_source)?.rows as usize,
    };
    if in_scope == 0 {
        return Ok(Some(Vec::new()));
    }

    // one past the budget so a tie across the cut-off is visible
    let mut ids = ready.index.search(
        query.values(),
        budget.saturating_add(1),
        options.ef_search,
        allowed.as_ref(),
    )?;

    // zero vectors are not in the graph; the scan ranks them at distance 1
    ids.extend(ready.index.zero_norm_ids().iter().copied().filter(|id| {
        allowed
            .as_ref()
            .map_or(true, |a| a.binary_search(&(*id as usize)).is_ok())
    }));

    let mut rescored = rescore(conn, slot, query, &ids)?;

    let expected = budget.min(in_scope);
    if rescored.len() < expected {
        tracing::debug!(
            "Index returned {} of {} expected candidates; falling back to scan",
            rescored.len(),
            expected
        );
        return Ok(None);
    }

    // The graph picks an arbitrary subset of equidistant rows, so the
    // id tie-break at the cut-off needs every tied row.
    if rescored.len() > budget && rescored[budget].score == rescored[budget - 1].score {
        tracing::debug!(
            "Tie at distance {} across the cut-off; falling back to scan",
            rescored[budget].score
        );
        return Ok(None);
    }

    rescored.truncate(budget);
    Ok(Some(rescored))
}

/// Ids of every embedded row in scope, ascending
fn scope_ids(conn: &Connection, slot: VectorSlot, scope: &ScopeFilter) -> Result<Vec<usize>> {
    let sql = match slot.kind {
        CorpusKind::Chunks => CHUNKS_SCOPE_IDS_SQL,
        CorpusKind::CodeExamples => CODE_EXAMPLES_SCOPE_IDS_SQL,
    };

    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(
        params![
            slot.dimension.width() as i64,
            scope.source_param(),
            scope.metadata_param()
        ],
        |row| row.get::<_, i64>(0),
    )?;

    let mut ids = Vec::new();
    for id in rows {
        ids.push(id? as usize);
    }
    Ok(ids)
}

/// Exact distances for `ids`, ordered by (distance, id). Ids whose rows are
/// gone are dropped.
fn rescore(
    conn: &Connection,
    slot: VectorSlot,
    query: &Embedding,
    ids: &[ItemId],
) -> Result<Vec<Candidate>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = match slot.kind {
        CorpusKind::Chunks => CHUNKS_RESCORE_SQL,
        CorpusKind::CodeExamples => CODE_EXAMPLES_RESCORE_SQL,
    };

    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(
        params![
            query.to_blob(),
            id_list_param(ids),
            slot.dimension.width() as i64
        ],
        |row| {
            Ok(Candidate {
                id: row.get(0)?,
                score: row.get(1)?,
            })
        },
    )?;

    let mut candidates = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    candidates.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.id.cmp(&b.id)));
    Ok(candidates)
}

fn scan(
    conn: &Connection,
    slot: VectorSlot,
    query: &Embedding,
    scope: &ScopeFilter,
    budget: usize,
    options: &VectorSearchOptions,
) -> Result<Vec<Candidate>> {
    let live = live_coverage(conn, slot, scope.source_param())?;
    if live.rows as usize > options.scan_warn_rows {
        tracing::warn!(
            "Exhaustive vector scan over {} rows in {} (no ready index)",
            live.rows,
            slot
        );
    } else {
        tracing::debug!("Exhaustive vector scan over {} rows in {}", live.rows, slot);
    }

    let sql = match slot.kind {
        CorpusKind::Chunks => CHUNKS_SCAN_SQL,
        CorpusKind::CodeExamples => CODE_EXAMPLES_SCAN_SQL,
    };

    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(
        params![
            query.to_blob(),
            slot.dimension.width() as i64,
            scope.source_param(),
            scope.metadata_param(),
            budget as i64
        ],
        |row| {
            Ok(Candidate {
                id: row.get(0)?,
                score: row.get(1)?,
            })
        },
    )?;

    let candidates = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexTuning;
    use crate::corpus::{EmbeddingDimension, NewChunk, NewSource};
    use crate::index::IndexMaintainer;
    use crate::retrieval::MetadataFilter;
    use crate::storage::Database;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn embedding(hot: &[(usize, f32)]) -> Embedding {
        let mut v = vec![0.0; 384];
        for &(i, x) in hot {
            v[i] = x;
        }
        Embedding::new(EmbeddingDimension::D384, v).unwrap()
    }

    fn setup() -> (TempDir, Arc<Database>) {
        let temp = TempDir::new().unwrap();
        let db = Database::new(&temp.path().join("corpus.db")).unwrap();
        db.upsert_source(&NewSource::new("a")).unwrap();
        db.upsert_source(&NewSource::new("b")).unwrap();
        for i in 0..10usize {
            let source = if i % 2 == 0 { "a" } else { "b" };
            db.insert_chunk(
                &NewChunk::new(source, format!("https://x/{}", i), 0, format!("chunk {}", i))
                    .with_metadata(json!({"parity": if i % 2 == 0 { "even" } else { "odd" }}))
                    .with_embedding(embedding(&[(0, 1.0), (1, i as f32 * 0.1)])),
            )
            .unwrap();
        }
        (temp, Arc::new(db))
    }

    #[test]
    fn test_scan_orders_by_distance() {
        let (_temp, db) = setup();
        let conn = db.get_conn().unwrap();
        let registry = IndexRegistry::new();

        let (found, path) = vector_search(
            &conn,
            &registry,
            CorpusKind::Chunks,
            &embedding(&[(0, 1.0)]),
            &ScopeFilter::default(),
            3,
            &VectorSearchOptions::default(),
        )
        .unwrap();

        assert_eq!(path, AccessPath::Scan);
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].id, 1);
        assert!(found.windows(2).all(|w| w[0].score <= w[1].score));
    }

    #[test]
    fn test_scan_respects_scope() {
        let (_temp, db) = setup();
        let conn = db.get_conn().unwrap();
        let registry = IndexRegistry::new();
        let scope = ScopeFilter::new(
            Some("b".to_string()),
            Some(MetadataFilter::from_value(json!({"parity": "odd"})).unwrap()),
        );

        let (found, _) = vector_search(
            &conn,
            &registry,
            CorpusKind::Chunks,
            &embedding(&[(0, 1.0)]),
            &scope,
            10,
            &VectorSearchOptions::default(),
        )
        .unwrap();

        let ids: Vec<_> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 4, 6, 8, 10]);
    }

    #[test]
    fn test_other_dimensions_are_invisible() {
        let (_temp, db) = setup();
        let conn = db.get_conn().unwrap();
        let registry = IndexRegistry::new();
        let query = Embedding::new(EmbeddingDimension::D768, vec![1.0; 768]).unwrap();

        let (found, _) = vector_search(
            &conn,
            &registry,
            CorpusKind::Chunks,
            &query,
            &ScopeFilter::default(),
            5,
            &VectorSearchOptions::default(),
        )
        .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_index_paths_match_scan() {
        let (_temp, db) = setup();
        let registry = Arc::new(IndexRegistry::new());
        let query = embedding(&[(0, 1.0), (1, 0.33)]);
        let scope = ScopeFilter::new(Some("a".to_string()), None);

        let conn = db.get_conn().unwrap();
        let (scanned, _) = vector_search(
            &conn,
            &registry,
            CorpusKind::Chunks,
            &query,
            &scope,
            4,
            &VectorSearchOptions::default(),
        )
        .unwrap();

        let maintainer = IndexMaintainer::new(db.clone(), registry.clone(), IndexTuning::default());
        let slot = EmbeddingDimension::D384.slot(CorpusKind::Chunks);
        maintainer.build(slot, IndexScope::Corpus).unwrap();

        let (via_corpus, path) = vector_search(
            &conn,
            &registry,
            CorpusKind::Chunks,
            &query,
            &scope,
            4,
            &VectorSearchOptions::default(),
        )
        .unwrap();
        assert_eq!(path, AccessPath::CorpusIndex);
        assert_eq!(via_corpus, scanned);

        maintainer
            .build(slot, IndexScope::Source("a".to_string()))
            .unwrap();
        let (via_partial, path) = vector_search(
            &conn,
            &registry,
            CorpusKind::Chunks,
            &query,
            &scope,
            4,
            &VectorSearchOptions::default(),
        )
        .unwrap();
        assert_eq!(path, AccessPath::PartialIndex);
        assert_eq!(via_partial, scanned);
    }

    #[test]
    fn test_tie_at_cut_off_uses_scan() {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&temp.path().join("corpus.db")).unwrap());
        db.upsert_source(&NewSource::new("dup")).unwrap();
        for i in 0..20 {
            db.insert_chunk(
                &NewChunk::new("dup", format!("https://dup/{}", i), 0, "same")
                    .with_embedding(embedding(&[(0, 1.0), (1, 1.0)])),
            )
            .unwrap();
        }

        let registry = Arc::new(IndexRegistry::new());
        let maintainer = IndexMaintainer::new(db.clone(), registry.clone(), IndexTuning::default());
        maintainer
            .build(EmbeddingDimension::D384.slot(CorpusKind::Chunks), IndexScope::Corpus)
            .unwrap();

        let conn = db.get_conn().unwrap();
        let (found, path) = vector_search(
            &conn,
            &registry,
            CorpusKind::Chunks,
            &embedding(&[(0, 1.0)]),
            &ScopeFilter::default(),
            4,
            &VectorSearchOptions::default(),
        )
        .unwrap();

        assert_eq!(path, AccessPath::Scan);
        let ids: Vec<_> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_zero_vectors_ranked_by_index_path() {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&temp.path().join("corpus.db")).unwrap());
        db.upsert_source(&NewSource::new("s")).unwrap();
        for (i, y) in [0.01f32, 0.02, 0.03].iter().enumerate() {
            db.insert_chunk(
                &NewChunk::new("s", format!("https://s/{}", i), 0, "opposite")
                    .with_embedding(embedding(&[(0, -1.0), (1, *y)])),
            )
            .unwrap();
        }
        let zero_id = db
            .insert_chunk(
                &NewChunk::new("s", "https://s/zero", 0, "blank").with_embedding(embedding(&[])),
            )
            .unwrap();

        let registry = Arc::new(IndexRegistry::new());
        let maintainer = IndexMaintainer::new(db.clone(), registry.clone(), IndexTuning::default());
        maintainer
            .build(EmbeddingDimension::D384.slot(CorpusKind::Chunks), IndexScope::Corpus)
            .unwrap();

        let conn = db.get_conn().unwrap();
        let (found, path) = vector_search(
            &conn,
            &registry,
            CorpusKind::Chunks,
            &embedding(&[(0, 1.0)]),
            &ScopeFilter::default(),
            2,
            &VectorSearchOptions::default(),
        )
        .unwrap();

        assert_eq!(path, AccessPath::CorpusIndex);
        assert_eq!(found[0].id, zero_id);
        assert_eq!(found[0].score, 1.0);
        assert_eq!(found.len(), 2);
    }
}
