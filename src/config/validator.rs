use crate::config::{Config, SCHEMA_VERSION};
use crate::embedding::IndexBackend;
use crate::error::{MapperError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem found
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_catalog(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_batch(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MapperError::ConfigValidation { errors })
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

    fn validate_catalog(config: &Config, errors: &mut Vec<ValidationError>) {
        // Existence is checked when the engine loads the source
        if config.catalog.source.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "catalog.source",
                "Catalog source path cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.model.trim().is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.index.backend != IndexBackend::Hnsw {
            return;
        }

        if config.index.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }

        if config.index.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if config.index.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_ef_search",
                "HNSW ef_search must be greater than 0",
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
    }

    fn validate_batch(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.batch.max_batch_size == 0 {
            errors.push(ValidationError::new(
                "batch.max_batch_size",
                "Maximum batch size must be greater than 0",
            ));
        }

        if config.batch.max_concurrent == 0 {
            errors.push(ValidationError::new(
                "batch.max_concurrent",
                "Maximum concurrency must be greater than 0",
            ));
        }
    }
}
