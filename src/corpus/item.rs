//! Corpus item and source records

use crate::corpus::{CorpusKind, Embedding, ItemId};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A generic document chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ItemId,
    pub url: String,
    pub chunk_number: i64,
    pub content: String,
    pub metadata: Value,
    pub source_id: String,
}

/// A code example chunk with its natural-language summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeExample {
    pub id: ItemId,
    pub url: String,
    pub chunk_number: i64,
    pub content: String,
    pub summary: String,
    pub metadata: Value,
    pub source_id: String,
}

/// A named origin owning corpus items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub source_id: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Record types that can be hydrated from a search row.
///
/// `from_row` reads the columns selected by the storage layer's hydrate
/// statement for `KIND`, in order.
pub trait CorpusItem: Clone + Send + Sync + Serialize + 'static {
    const KIND: CorpusKind;

    fn id(&self) -> ItemId;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

impl CorpusItem for Chunk {
    const KIND: CorpusKind = CorpusKind::Chunks;

    fn id(&self) -> ItemId {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            chunk_number: row.get(2)?,
            content: row.get(3)?,
            metadata: metadata_column(row, 4)?,
            source_id: row.get(5)?,
        })
    }
}

impl CorpusItem for CodeExample {
    const KIND: CorpusKind = CorpusKind::CodeExamples;

    fn id(&self) -> ItemId {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            chunk_number: row.get(2)?,
            content: row.get(3)?,
            metadata: metadata_column(row, 4)?,
            source_id: row.get(5)?,
            summary: row.get(6)?,
        })
    }
}

fn metadata_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Source registration as handed over by ingestion
#[derive(Debug, Clone)]
pub struct NewSource {
    pub source_id: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub metadata: Value,
}

impl NewSource {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            title: None,
            summary: None,
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Chunk row as handed over by ingestion
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub url: String,
    pub chunk_number: i64,
    pub content: String,
    pub metadata: Value,
    pub source_id: String,
    pub embedding: Option<Embedding>,
}

impl NewChunk {
    pub fn new(
        source_id: impl Into<String>,
        url: impl Into<String>,
        chunk_number: i64,
        content: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            chunk_number,
            content: content.into(),
            metadata: Value::Object(Default::default()),
            source_id: source_id.into(),
            embedding: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Code example row as handed over by ingestion
#[derive(Debug, Clone)]
pub struct NewCodeExample {
    pub chunk: NewChunk,
    pub summary: String,
}

impl NewCodeExample {
    pub fn new(chunk: NewChunk, summary: impl Into<String>) -> Self {
        Self {
            chunk,
            summary: summary.into(),
        }
    }
}
