//! Corpus data model
//!
//! Two parallel corpora are searchable: generic document chunks and code
//! examples. Both belong to a source and carry at most one embedding.

mod dimension;
mod item;

pub use dimension::{
    decode_vector, encode_vector, resolve_dimension, Embedding, EmbeddingDimension, VectorSlot,
};
pub use item::{Chunk, CodeExample, CorpusItem, NewChunk, NewCodeExample, NewSource, Source};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric item identifier, stable for the lifetime of the row
pub type ItemId = i64;

/// Which of the two corpora an item belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorpusKind {
    Chunks,
    CodeExamples,
}

impl CorpusKind {
    pub const ALL: [CorpusKind; 2] = [CorpusKind::Chunks, CorpusKind::CodeExamples];

    pub fn as_str(self) -> &'static str {
        match self {
            CorpusKind::Chunks => "chunks",
            CorpusKind::CodeExamples => "code_examples",
        }
    }
}

impl fmt::Display for CorpusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
