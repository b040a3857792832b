//! In-memory registry of approximate vector indexes
//!
//! Entries are keyed by vector slot and scope. An index is served only while
//! its build-time coverage still matches the live rows it was built from.

use crate::corpus::{CorpusKind, VectorSlot};
use crate::error::Result;
use crate::index::VectorIndex;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Rows covered by an index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexScope {
    /// Every embedded row of the slot
    Corpus,
    /// Only the rows of one source (partial index)
    Source(String),
}

impl IndexScope {
    pub fn source_id(&self) -> Option<&str> {
        match self {
            IndexScope::Corpus => None,
            IndexScope::Source(id) => Some(id),
        }
    }
}

impl fmt::Display for IndexScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexScope::Corpus => f.write_str("*"),
            IndexScope::Source(id) => write!(f, "source={}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexKey {
    pub slot: VectorSlot,
    pub scope: IndexScope,
}

impl IndexKey {
    pub fn new(slot: VectorSlot, scope: IndexScope) -> Self {
        Self { slot, scope }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.slot, self.scope)
    }
}

/// Row count and highest id of the rows an index was built from.
///
/// Any insert or delete in scope changes at least one of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Coverage {
    pub rows: i64,
    pub max_id: i64,
}

const CHUNKS_COVERAGE_SQL: &str = "\
SELECT COUNT(*), COALESCE(MAX(id), 0)
FROM chunks
WHERE embedding_dim = ?1 AND (?2 IS NULL OR source_id = ?2)";

const CODE_EXAMPLES_COVERAGE_SQL: &str = "\
SELECT COUNT(*), COALESCE(MAX(id), 0)
FROM code_examples
WHERE embedding_dim = ?1 AND (?2 IS NULL OR source_id = ?2)";

/// Current coverage of embedded rows in a slot, optionally for one source
pub fn live_coverage(conn: &Connection, slot: VectorSlot, source_id: Option<&str>) -> Result<Coverage> {
    let sql = match slot.kind {
        CorpusKind::Chunks => CHUNKS_COVERAGE_SQL,
        CorpusKind::CodeExamples => CODE_EXAMPLES_COVERAGE_SQL,
    };

    let mut stmt = conn.prepare_cached(sql)?;
    let coverage = stmt.query_row(
        params![slot.dimension.width() as i64, source_id],
        |row| {
            Ok(Coverage {
                rows: row.get(0)?,
                max_id: row.get(1)?,
            })
        },
    )?;
    Ok(coverage)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum IndexStatus {
    Building,
    Ready,
    Failed(String),
}

struct IndexEntry {
    status: IndexStatus,
    index: Option<Arc<VectorIndex>>,
    coverage: Coverage,
    updated_at: DateTime<Utc>,
}

/// Snapshot of one registry entry
#[derive(Debug, Clone, Serialize)]
pub struct IndexInfo {
    pub key: String,
    pub status: IndexStatus,
    pub coverage: Coverage,
    pub updated_at: DateTime<Utc>,
}

/// A ready index together with the coverage it was built at
pub struct ReadyIndex {
    pub index: Arc<VectorIndex>,
    pub coverage: Coverage,
}

#[derive(Default)]
pub struct IndexRegistry {
    entries: RwLock<HashMap<IndexKey, IndexEntry>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a key as being rebuilt. Any previous index stops being served.
    pub fn mark_building(&self, key: &IndexKey) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key.clone(),
            IndexEntry {
                status: IndexStatus::Building,
                index: None,
                coverage: Coverage::default(),
                updated_at: Utc::now(),
            },
        );
    }

    pub fn publish(&self, key: &IndexKey, index: VectorIndex, coverage: Coverage) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key.clone(),
            IndexEntry {
                status: IndexStatus::Ready,
                index: Some(Arc::new(index)),
                coverage,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn mark_failed(&self, key: &IndexKey, reason: impl Into<String>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key.clone(),
            IndexEntry {
                status: IndexStatus::Failed(reason.into()),
                index: None,
                coverage: Coverage::default(),
                updated_at: Utc::now(),
            },
        );
    }

    /// The index for `key` if its build completed; staleness is the
    /// caller's check against [`live_coverage`].
    pub fn ready(&self, key: &IndexKey) -> Option<ReadyIndex> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(key)?;
        match (&entry.status, &entry.index) {
            (IndexStatus::Ready, Some(index)) => Some(ReadyIndex {
                index: Arc::clone(index),
                coverage: entry.coverage,
            }),
            _ => None,
        }
    }

    pub fn status(&self, key: &IndexKey) -> Option<IndexStatus> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).map(|e| e.status.clone())
    }

    /// All entries, sorted by key for stable output
    pub fn list(&self) -> Vec<IndexInfo> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<IndexInfo> = entries
            .iter()
            .map(|(key, entry)| IndexInfo {
                key: key.to_string(),
                status: entry.status.clone(),
                coverage: entry.coverage,
                updated_at: entry.updated_at,
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }
}
