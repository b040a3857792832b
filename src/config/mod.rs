//! Configuration management for kbsearch
//!
//! Handles loading, validation, environment overrides and deployment-tier
//! profiles. Retrieval constants (RRF damping, over-fetch, short-query
//! threshold) and index tuning knobs all live here rather than in query code.

use crate::error::{KbError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Current configuration schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub indexing: IndexTuning,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub database_file: PathBuf,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
}

/// How queries below the short-query threshold are served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortQueryPolicy {
    /// Skip lexical search; rely on vector search alone
    VectorOnly,
    /// Run trigram similarity as the lexical stream. Also used when the
    /// token-ranked stream of a normal query comes back empty.
    TrigramFallback,
}

impl ShortQueryPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ShortQueryPolicy::VectorOnly => "vector_only",
            ShortQueryPolicy::TrigramFallback => "trigram_fallback",
        }
    }
}

/// Retrieval and fusion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Result budget used when a query does not set one
    pub default_match_count: usize,

    /// RRF damping constant
    pub rrf_k: f64,

    /// Each stream fetches `candidate_multiplier * match_count` candidates
    pub candidate_multiplier: usize,

    /// Trimmed queries with fewer characters than this are "short"
    pub short_query_min_chars: usize,

    pub short_query_policy: ShortQueryPolicy,

    /// Minimum trigram word similarity for the fallback path
    pub trigram_threshold: f64,

    /// HNSW candidate list size at query time
    pub hnsw_ef_search: usize,

    /// Degraded scans over more rows than this are logged at warn
    pub scan_warn_rows: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_match_count: 10,
            rrf_k: 60.0,
            candidate_multiplier: 2,
            short_query_min_chars: 4,
            short_query_policy: ShortQueryPolicy::VectorOnly,
            trigram_threshold: 0.6,
            hnsw_ef_search: 64,
            scan_warn_rows: 100_000,
        }
    }
}

/// Approximate index build parameters.
///
/// Consumed only by index maintenance; query code never reads these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexTuning {
    /// HNSW M parameter (number of connections per layer)
    pub hnsw_m: usize,
    /// HNSW construction parameter (higher = better recall, slower build)
    pub hnsw_ef_construction: usize,
    /// Maximum number of HNSW layers
    pub hnsw_max_layer: usize,
    /// Sources with at least this many embedded rows get their own partial index
    pub partial_index_min_rows: usize,
}

impl Default for IndexTuning {
    fn default() -> Self {
        Self {
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_max_layer: 16,
            partial_index_min_rows: 50_000,
        }
    }
}

/// Deployment-tier overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hnsw_m: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hnsw_ef_construction: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hnsw_ef_search: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_index_min_rows: Option<usize>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KbError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| KbError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| KbError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| KbError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(m) = overrides.hnsw_m {
            self.indexing.hnsw_m = m;
        }
        if let Some(ef) = overrides.hnsw_ef_construction {
            self.indexing.hnsw_ef_construction = ef;
        }
        if let Some(ef) = overrides.hnsw_ef_search {
            self.retrieval.hnsw_ef_search = ef;
        }
        if let Some(rows) = overrides.partial_index_min_rows {
            self.indexing.partial_index_min_rows = rows;
        }

        tracing::debug!("Applied profile {}", profile);
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: KBSEARCH_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("KBSEARCH_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "STORAGE__POOL_SIZE" => {
                self.storage.pool_size = parse_value(path, value)?;
            }
            "RETRIEVAL__DEFAULT_MATCH_COUNT" => {
                self.retrieval.default_match_count = parse_value(path, value)?;
            }
            "RETRIEVAL__RRF_K" => {
                self.retrieval.rrf_k = parse_value(path, value)?;
            }
            "RETRIEVAL__CANDIDATE_MULTIPLIER" => {
                self.retrieval.candidate_multiplier = parse_value(path, value)?;
            }
            "RETRIEVAL__SHORT_QUERY_MIN_CHARS" => {
                self.retrieval.short_query_min_chars = parse_value(path, value)?;
            }
            "RETRIEVAL__SHORT_QUERY_POLICY" => {
                self.retrieval.short_query_policy = match value {
                    "vector_only" => ShortQueryPolicy::VectorOnly,
                    "trigram_fallback" => ShortQueryPolicy::TrigramFallback,
                    _ => {
                        return Err(KbError::InvalidConfigValue {
                            path: path.to_string(),
                            message: format!(
                                "Expected 'vector_only' or 'trigram_fallback', got '{}'",
                                value
                            ),
                        })
                    }
                };
            }
            "RETRIEVAL__HNSW_EF_SEARCH" => {
                self.retrieval.hnsw_ef_search = parse_value(path, value)?;
            }
            "INDEXING__HNSW_M" => {
                self.indexing.hnsw_m = parse_value(path, value)?;
            }
            "INDEXING__HNSW_EF_CONSTRUCTION" => {
                self.indexing.hnsw_ef_construction = parse_value(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| KbError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("kbsearch").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| KbError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".kbsearch"))
    }
}

fn parse_value<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| KbError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

impl Default for Config {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            "small".to_string(),
            ProfileOverrides {
                hnsw_m: Some(8),
                hnsw_ef_construction: Some(64),
                hnsw_ef_search: Some(32),
                partial_index_min_rows: None,
            },
        );
        profiles.insert(
            "large".to_string(),
            ProfileOverrides {
                hnsw_m: Some(24),
                hnsw_ef_construction: Some(400),
                hnsw_ef_search: Some(128),
                partial_index_min_rows: Some(20_000),
            },
        );

        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.kbsearch"),
                database_file: PathBuf::from("corpus.sqlite"),
                pool_size: 16,
                busy_timeout_ms: 5000,
            },
            retrieval: RetrievalConfig::default(),
            indexing: IndexTuning::default(),
            profiles,
        }
    }
}
