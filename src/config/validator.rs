use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{KbError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem found
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_profiles(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(KbError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        if config.storage.database_file.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.database_file",
                "Database file name cannot be empty",
            ));
        }

        if config.storage.pool_size == 0 {
            errors.push(ValidationError::new(
                "storage.pool_size",
                "Pool size must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.default_match_count == 0 {
            errors.push(ValidationError::new(
                "retrieval.default_match_count",
                "Default match count must be greater than 0",
            ));
        }

        if !(retrieval.rrf_k.is_finite() && retrieval.rrf_k > 0.0) {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                format!("RRF k must be a positive number, got {}", retrieval.rrf_k),
            ));
        }

        if retrieval.candidate_multiplier == 0 {
            errors.push(ValidationError::new(
                "retrieval.candidate_multiplier",
                "Candidate multiplier must be at least 1",
            ));
        }

        if !(0.0..=1.0).contains(&retrieval.trigram_threshold) {
            errors.push(ValidationError::new(
                "retrieval.trigram_threshold",
                format!(
                    "Trigram threshold must be between 0.0 and 1.0, got {}",
                    retrieval.trigram_threshold
                ),
            ));
        }

        if retrieval.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "retrieval.hnsw_ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.indexing.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if config.indexing.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }

        if config.indexing.hnsw_max_layer == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_max_layer",
                "HNSW max_layer must be greater than 0",
            ));
        }
    }

    fn validate_profiles(config: &Config, errors: &mut Vec<ValidationError>) {
        for (name, profile) in &config.profiles {
            let zero = [
                ("hnsw_m", profile.hnsw_m),
                ("hnsw_ef_construction", profile.hnsw_ef_construction),
                ("hnsw_ef_search", profile.hnsw_ef_search),
            ];
            for (key, value) in zero {
                if value == Some(0) {
                    errors.push(ValidationError::new(
                        format!("profiles.{}.{}", name, key),
                        "Value must be greater than 0",
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = Config::default();
        config.storage.database_file = PathBuf::new();
        config.retrieval.rrf_k = 0.0;
        config.retrieval.candidate_multiplier = 0;

        match ConfigValidator::validate(&config) {
            Err(KbError::ConfigValidation { errors }) => {
                let paths: Vec<_> = errors.iter().map(|e| e.path.as_str()).collect();
                assert_eq!(
                    paths,
                    vec![
                        "storage.database_file",
                        "retrieval.rrf_k",
                        "retrieval.candidate_multiplier"
                    ]
                );
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_trigram_threshold_range() {
        let mut config = Config::default();
        config.retrieval.trigram_threshold = 1.5;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_zero_profile_value() {
        let mut config = Config::default();
        if let Some(p) = config.profiles.get_mut("small") {
            p.hnsw_m = Some(0);
        }
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
