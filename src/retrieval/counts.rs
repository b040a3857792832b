//! Bulk per-source item counts

use crate::error::{KbError, Result};
use rusqlite::{params, Connection};
use serde::Serialize;

/// Chunk and code example counts for one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceCounts {
    pub source_id: String,
    pub documents_count: i64,
    pub code_examples_count: i64,
}

const SOURCE_COUNTS_SQL: &str = "\
WITH requested(ord, source_id) AS (
    SELECT key, value FROM json_each(?1)
),
chunk_counts AS (
    SELECT source_id, COUNT(*) AS n
    FROM chunks
    WHERE source_id IN (SELECT source_id FROM requested)
    GROUP BY source_id
),
code_example_counts AS (
    SELECT source_id, COUNT(*) AS n
    FROM code_examples
    WHERE source_id IN (SELECT source_id FROM requested)
    GROUP BY source_id
)
SELECT r.source_id, COALESCE(c.n, 0), COALESCE(e.n, 0)
FROM requested r
LEFT JOIN chunk_counts c ON c.source_id = r.source_id
LEFT JOIN code_example_counts e ON e.source_id = r.source_id
ORDER BY r.ord";

/// Count chunks and code examples for every requested source in one query.
///
/// Each distinct id appears exactly once, in first-occurrence order. Unknown
/// or empty sources get zero counts.
pub fn source_counts(conn: &Connection, source_ids: &[String]) -> Result<Vec<SourceCounts>> {
    let mut requested: Vec<&str> = Vec::with_capacity(source_ids.len());
    for id in source_ids {
        if !requested.contains(&id.as_str()) {
            requested.push(id);
        }
    }
    if requested.is_empty() {
        return Ok(Vec::new());
    }

    let list = serde_json::to_string(&requested).map_err(|e| KbError::Json {
        source: e,
        context: "Failed to encode source id list".to_string(),
    })?;

    let mut stmt = conn.prepare_cached(SOURCE_COUNTS_SQL)?;
    let rows = stmt.query_map(params![list], |row| {
        Ok(SourceCounts {
            source_id: row.get(0)?,
            documents_count: row.get(1)?,
            code_examples_count: row.get(2)?,
        })
    })?;

    let counts = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(counts)
}
