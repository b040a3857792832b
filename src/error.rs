use std::path::PathBuf;
use thiserror::Error;

/// Main error type for kbsearch
#[derive(Error, Debug)]
pub enum KbError {
    /// Requested embedding width is not one of the supported set
    #[error("Unsupported embedding dimension: {width} (supported: 384, 768, 1024, 1536, 3072, 3584)")]
    UnsupportedDimension { width: usize },

    /// Query embedding length disagrees with the declared dimension
    #[error("Embedding length mismatch: declared {expected}, got {actual} values")]
    EmbeddingLengthMismatch { expected: usize, actual: usize },

    /// Embedding holds a NaN or infinite value
    #[error("Embedding value at position {position} is not finite")]
    NonFiniteEmbedding { position: usize },

    /// Metadata filter is not a well-formed containment predicate
    #[error("Malformed metadata filter: {0}")]
    MalformedFilter(String),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Vector index build errors
    #[error("Vector index error: {0}")]
    Index(String),

    /// A blocking storage task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KbError {
    /// True for errors caused by the request itself rather than by the
    /// storage or runtime underneath it.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            KbError::UnsupportedDimension { .. }
                | KbError::EmbeddingLengthMismatch { .. }
                | KbError::NonFiniteEmbedding { .. }
                | KbError::MalformedFilter(_)
        )
    }
}

impl From<r2d2::Error> for KbError {
    fn from(e: r2d2::Error) -> Self {
        KbError::Pool(e.to_string())
    }
}

impl From<tokio::task::JoinError> for KbError {
    fn from(e: tokio::task::JoinError) -> Self {
        KbError::Task(e.to_string())
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for kbsearch operations
pub type Result<T> = std::result::Result<T, KbError>;
