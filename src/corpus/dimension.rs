//! Embedding dimensions and the dimension resolver
//!
//! Every corpus item carries at most one embedding, produced by one of a fixed
//! set of models. The width of that embedding selects which vectors a query
//! can be compared against.

use crate::corpus::CorpusKind;
use crate::error::{KbError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported embedding widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum EmbeddingDimension {
    D384,
    D768,
    D1024,
    D1536,
    D3072,
    D3584,
}

impl EmbeddingDimension {
    /// All supported dimensions, narrowest first
    pub const ALL: [EmbeddingDimension; 6] = [
        EmbeddingDimension::D384,
        EmbeddingDimension::D768,
        EmbeddingDimension::D1024,
        EmbeddingDimension::D1536,
        EmbeddingDimension::D3072,
        EmbeddingDimension::D3584,
    ];

    /// Width used by the legacy single-dimension entry points
    pub const LEGACY: EmbeddingDimension = EmbeddingDimension::D1536;

    /// Number of `f32` values in an embedding of this dimension
    pub const fn width(self) -> usize {
        match self {
            EmbeddingDimension::D384 => 384,
            EmbeddingDimension::D768 => 768,
            EmbeddingDimension::D1024 => 1024,
            EmbeddingDimension::D1536 => 1536,
            EmbeddingDimension::D3072 => 3072,
            EmbeddingDimension::D3584 => 3584,
        }
    }

    /// Size of the stored little-endian blob in bytes
    pub const fn byte_len(self) -> usize {
        self.width() * std::mem::size_of::<f32>()
    }

    /// Bind this dimension to a corpus variant
    pub fn slot(self, kind: CorpusKind) -> VectorSlot {
        VectorSlot {
            kind,
            dimension: self,
        }
    }
}

impl TryFrom<usize> for EmbeddingDimension {
    type Error = KbError;

    fn try_from(width: usize) -> Result<Self> {
        match width {
            384 => Ok(EmbeddingDimension::D384),
            768 => Ok(EmbeddingDimension::D768),
            1024 => Ok(EmbeddingDimension::D1024),
            1536 => Ok(EmbeddingDimension::D1536),
            3072 => Ok(EmbeddingDimension::D3072),
            3584 => Ok(EmbeddingDimension::D3584),
            _ => Err(KbError::UnsupportedDimension { width }),
        }
    }
}

impl From<EmbeddingDimension> for usize {
    fn from(dim: EmbeddingDimension) -> Self {
        dim.width()
    }
}

impl fmt::Display for EmbeddingDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.width())
    }
}

/// Resolve a requested width to a supported dimension.
///
/// Unknown widths fail with [`KbError::UnsupportedDimension`]; there is no
/// nearest-width fallback.
pub fn resolve_dimension(width: usize) -> Result<EmbeddingDimension> {
    EmbeddingDimension::try_from(width)
}

/// Handle to one vector slot: a corpus variant paired with a dimension.
///
/// This is the key used both for the `embedding_dim = ?` storage predicate
/// and for looking up approximate indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VectorSlot {
    pub kind: CorpusKind,
    pub dimension: EmbeddingDimension,
}

impl fmt::Display for VectorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind, self.dimension)
    }
}

/// An embedding tagged with its dimension.
///
/// The length of `values` always equals `dimension.width()`; the constructor
/// is the only way to build one.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    dimension: EmbeddingDimension,
    values: Vec<f32>,
}

impl Embedding {
    /// Build an embedding, checking its length against the declared dimension.
    ///
    /// NaN and infinite values are rejected; they have no cosine distance.
    pub fn new(dimension: EmbeddingDimension, values: Vec<f32>) -> Result<Self> {
        if values.len() != dimension.width() {
            return Err(KbError::EmbeddingLengthMismatch {
                expected: dimension.width(),
                actual: values.len(),
            });
        }
        if let Some(position) = values.iter().position(|v| !v.is_finite()) {
            return Err(KbError::NonFiniteEmbedding { position });
        }
        Ok(Self { dimension, values })
    }

    /// Build an embedding from a raw width as supplied by a caller
    pub fn from_width(width: usize, values: Vec<f32>) -> Result<Self> {
        Self::new(resolve_dimension(width)?, values)
    }

    pub fn dimension(&self) -> EmbeddingDimension {
        self.dimension
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Encode as the little-endian blob stored in the database
    pub fn to_blob(&self) -> Vec<u8> {
        encode_vector(&self.values)
    }

}

/// Encode `f32` values as a little-endian byte blob
pub fn encode_vector(values: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(values.len() * 4);
    for v in values {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

/// Decode a little-endian byte blob into `f32` values; trailing bytes are ignored
pub fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_widths_resolve() {
        for dim in EmbeddingDimension::ALL {
            assert_eq!(resolve_dimension(dim.width()).unwrap(), dim);
        }
    }

    #[test]
    fn test_unsupported_widths_fail() {
        for width in [0, 1, 383, 385, 512, 1535, 1537, 2048, 4096] {
            match resolve_dimension(width) {
                Err(KbError::UnsupportedDimension { width: w }) => assert_eq!(w, width),
                other => panic!("expected UnsupportedDimension for {}, got {:?}", width, other),
            }
        }
    }

    #[test]
    fn test_embedding_length_checked() {
        let err = Embedding::new(EmbeddingDimension::D384, vec![0.0; 383]).unwrap_err();
        assert!(matches!(
            err,
            KbError::EmbeddingLengthMismatch {
                expected: 384,
                actual: 383
            }
        ));
    }

    #[test]
    fn test_non_finite_values_rejected() {
        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let mut values = vec![0.5; 384];
            values[17] = bad;
            let err = Embedding::new(EmbeddingDimension::D384, values).unwrap_err();
            assert!(matches!(err, KbError::NonFiniteEmbedding { position: 17 }));
            assert!(err.is_caller_error());
        }
    }

    #[test]
    fn test_blob_encoding() {
        let mut values = vec![0.0f32; 384];
        values[0] = 1.5;
        values[383] = -0.25;
        let emb = Embedding::new(EmbeddingDimension::D384, values.clone()).unwrap();

        let blob = emb.to_blob();
        assert_eq!(blob.len(), EmbeddingDimension::D384.byte_len());

        assert_eq!(decode_vector(&blob), values);
        assert_eq!(decode_vector(&blob[..blob.len() - 2]).len(), 383);
    }

    #[test]
    fn test_serde_as_integer() {
        let json = serde_json::to_string(&EmbeddingDimension::D1536).unwrap();
        assert_eq!(json, "1536");

        let parsed: EmbeddingDimension = serde_json::from_str("3584").unwrap();
        assert_eq!(parsed, EmbeddingDimension::D3584);

        assert!(serde_json::from_str::<EmbeddingDimension>("100").is_err());
    }
}
