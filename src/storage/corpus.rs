//! Corpus row access
//!
//! Read paths used by retrieval (hydration, source lookups) and the narrow
//! write seam through which ingestion hands rows over. Retrieval itself never
//! writes.

use crate::corpus::{
    CorpusItem, CorpusKind, ItemId, NewChunk, NewCodeExample, NewSource, Source,
};
use crate::error::{KbError, Result};
use crate::storage::Database;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

const HYDRATE_CHUNKS_SQL: &str = "\
SELECT id, url, chunk_number, content, metadata, source_id
FROM chunks
WHERE id IN (SELECT value FROM json_each(?1))";

const HYDRATE_CODE_EXAMPLES_SQL: &str = "\
SELECT id, url, chunk_number, content, metadata, source_id, summary
FROM code_examples
WHERE id IN (SELECT value FROM json_each(?1))";

fn hydrate_sql(kind: CorpusKind) -> &'static str {
    match kind {
        CorpusKind::Chunks => HYDRATE_CHUNKS_SQL,
        CorpusKind::CodeExamples => HYDRATE_CODE_EXAMPLES_SQL,
    }
}

/// Encode ids as a JSON array for `json_each` binding
pub(crate) fn id_list_param(ids: &[ItemId]) -> String {
    let mut out = String::with_capacity(ids.len() * 8 + 2);
    out.push('[');
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&id.to_string());
    }
    out.push(']');
    out
}

/// Load full records for `ids`, returned in the order of `ids`.
///
/// Ids whose rows no longer exist (deleted since they were ranked) are
/// skipped.
pub fn hydrate<I: CorpusItem>(conn: &Connection, ids: &[ItemId]) -> Result<Vec<I>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare_cached(hydrate_sql(I::KIND))?;
    let rows = stmt.query_map(params![id_list_param(ids)], |row| I::from_row(row))?;

    let mut by_id: HashMap<ItemId, I> = HashMap::with_capacity(ids.len());
    for row in rows {
        let item = row?;
        by_id.insert(item.id(), item);
    }

    Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

impl Database {
    /// Register or update a source
    pub fn upsert_source(&self, source: &NewSource) -> Result<()> {
        let conn = self.get_conn()?;
        let metadata = to_json(&source.metadata, "source metadata")?;

        conn.execute(
            "INSERT INTO sources (source_id, title, summary, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(source_id) DO UPDATE SET
                title = excluded.title,
                summary = excluded.summary,
                metadata = excluded.metadata",
            params![
                source.source_id,
                source.title,
                source.summary,
                metadata,
                Utc::now().timestamp()
            ],
        )?;

        Ok(())
    }

    /// Remove a source and, by cascade, all of its items
    pub fn delete_source(&self, source_id: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let removed = conn.execute("DELETE FROM sources WHERE source_id = ?1", params![source_id])?;
        Ok(removed > 0)
    }

    /// Look up a source by id
    pub fn get_source(&self, source_id: &str) -> Result<Option<Source>> {
        let conn = self.get_conn()?;

        let row = conn
            .query_row(
                "SELECT source_id, title, summary, metadata, created_at
                 FROM sources WHERE source_id = ?1",
                params![source_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((source_id, title, summary, metadata, created_at)) = row else {
            return Ok(None);
        };

        Ok(Some(Source {
            source_id,
            title,
            summary,
            metadata: serde_json::from_str(&metadata).map_err(|e| KbError::Json {
                source: e,
                context: "Failed to parse source metadata".to_string(),
            })?,
            created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_else(Utc::now),
        }))
    }

    /// Insert a document chunk; returns its id
    pub fn insert_chunk(&self, chunk: &NewChunk) -> Result<ItemId> {
        let conn = self.get_conn()?;
        let metadata = to_json(&chunk.metadata, "chunk metadata")?;
        let (dim, blob) = embedding_columns(chunk);

        conn.execute(
            "INSERT INTO chunks
                (url, chunk_number, content, metadata, source_id, embedding_dim, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                chunk.url,
                chunk.chunk_number,
                chunk.content,
                metadata,
                chunk.source_id,
                dim,
                blob
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Insert a code example; returns its id
    pub fn insert_code_example(&self, example: &NewCodeExample) -> Result<ItemId> {
        let conn = self.get_conn()?;
        let chunk = &example.chunk;
        let metadata = to_json(&chunk.metadata, "code example metadata")?;
        let (dim, blob) = embedding_columns(chunk);

        conn.execute(
            "INSERT INTO code_examples
                (url, chunk_number, content, summary, metadata, source_id, embedding_dim, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                chunk.url,
                chunk.chunk_number,
                chunk.content,
                example.summary,
                metadata,
                chunk.source_id,
                dim,
                blob
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }
}

fn embedding_columns(chunk: &NewChunk) -> (Option<i64>, Option<Vec<u8>>) {
    match &chunk.embedding {
        Some(e) => (Some(e.dimension().width() as i64), Some(e.to_blob())),
        None => (None, None),
    }
}

fn to_json(value: &serde_json::Value, what: &str) -> Result<String> {
    serde_json::to_string(value).map_err(|e| KbError::Json {
        source: e,
        context: format!("Failed to serialize {}", what),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{Chunk, CodeExample, Embedding, EmbeddingDimension};
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Database) {
        let temp = TempDir::new().unwrap();
        let db = Database::new(&temp.path().join("corpus.db")).unwrap();
        db.upsert_source(&NewSource::new("docs").with_title("Docs"))
            .unwrap();
        (temp, db)
    }

    #[test]
    fn test_hydrate_preserves_requested_order() {
        let (_temp, db) = setup();
        let a = db
            .insert_chunk(&NewChunk::new("docs", "https://a", 0, "alpha"))
            .unwrap();
        let b = db
            .insert_chunk(&NewChunk::new("docs", "https://b", 0, "beta"))
            .unwrap();

        let conn = db.get_conn().unwrap();
        let items: Vec<Chunk> = hydrate(&conn, &[b, 999, a]).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, b);
        assert_eq!(items[1].id, a);
        assert_eq!(items[1].content, "alpha");
    }

    #[test]
    fn test_code_example_round_trip() {
        let (_temp, db) = setup();
        let emb = Embedding::new(EmbeddingDimension::D384, vec![0.5; 384]).unwrap();
        let id = db
            .insert_code_example(&NewCodeExample::new(
                NewChunk::new("docs", "https://c", 3, "fn main() {}")
                    .with_metadata(json!({"language": "rust"}))
                    .with_embedding(emb),
                "Entry point",
            ))
            .unwrap();

        let conn = db.get_conn().unwrap();
        let items: Vec<CodeExample> = hydrate(&conn, &[id]).unwrap();
        assert_eq!(items[0].summary, "Entry point");
        assert_eq!(items[0].chunk_number, 3);
        assert_eq!(items[0].metadata["language"], "rust");
    }

    #[test]
    fn test_delete_source_cascades() {
        let (_temp, db) = setup();
        let id = db
            .insert_chunk(&NewChunk::new("docs", "https://a", 0, "alpha"))
            .unwrap();

        assert!(db.delete_source("docs").unwrap());
        assert!(!db.delete_source("docs").unwrap());

        let conn = db.get_conn().unwrap();
        let items: Vec<Chunk> = hydrate(&conn, &[id]).unwrap();
        assert!(items.is_empty());
        assert!(db.get_source("docs").unwrap().is_none());
    }

    #[test]
    fn test_chunk_requires_known_source() {
        let (_temp, db) = setup();
        let result = db.insert_chunk(&NewChunk::new("missing", "https://a", 0, "alpha"));
        assert!(result.is_err());
    }

    #[test]
    fn test_id_list_param() {
        assert_eq!(id_list_param(&[]), "[]");
        assert_eq!(id_list_param(&[3, 1, 2]), "[3,1,2]");
    }
}
