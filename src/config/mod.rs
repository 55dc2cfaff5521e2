//! Configuration management for icd-mapper
//!
//! Loads the TOML configuration, applies `ICDMAP_SECTION__KEY` environment
//! overrides and validates the result.

use crate::catalog::SourceFormat;
use crate::embedding::{HnswParams, IndexBackend};
use crate::error::{MapperError, Result};
use crate::lexical::MatchField;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";
const ENV_PREFIX: &str = "ICDMAP_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub catalog: CatalogConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub batch: BatchConfig,
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

/// Catalog source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub source: PathBuf,
    #[serde(default)]
    pub format: SourceFormat,
    /// Skip non-billable header rows
    #[serde(default)]
    pub billable_only: bool,
    /// Text the keyword stage compares against
    #[serde(default)]
    pub match_field: MatchField,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
    /// Model download directory (fastembed default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        let params = HnswParams::default();
        Self {
            backend: IndexBackend::Flat,
            hnsw_m: params.m,
            hnsw_ef_construction: params.ef_construction,
            hnsw_ef_search: params.ef_search,
        }
    }
}

impl IndexConfig {
    pub fn hnsw_params(&self) -> HnswParams {
        HnswParams {
            m: self.hnsw_m,
            ef_construction: self.hnsw_ef_construction,
            ef_search: self.hnsw_ef_search,
        }
    }
}

/// Knowledge-base location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Batch limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub max_concurrent: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_concurrent: 4,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MapperError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| MapperError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MapperError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| MapperError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: ICDMAP_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    fn apply_overrides(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "CATALOG__SOURCE" => self.catalog.source = PathBuf::from(value),
            "CATALOG__FORMAT" => {
                self.catalog.format =
                    value
                        .parse()
                        .map_err(|message| MapperError::InvalidConfigValue {
                            path: path.to_string(),
                            message,
                        })?;
            }
            "CATALOG__BILLABLE_ONLY" => self.catalog.billable_only = parse_value(path, value)?,
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__BATCH_SIZE" => self.embedding.batch_size = parse_value(path, value)?,
            "EMBEDDING__CACHE_DIR" => self.embedding.cache_dir = Some(PathBuf::from(value)),
            "INDEX__BACKEND" => {
                self.index.backend = match value.to_lowercase().as_str() {
                    "flat" => IndexBackend::Flat,
                    "hnsw" => IndexBackend::Hnsw,
                    other => {
                        return Err(MapperError::InvalidConfigValue {
                            path: path.to_string(),
                            message: format!("Unknown index backend '{}'", other),
                        })
                    }
                };
            }
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "BATCH__MAX_BATCH_SIZE" => self.batch.max_batch_size = parse_value(path, value)?,
            "BATCH__MAX_CONCURRENT" => self.batch.max_concurrent = parse_value(path, value)?,
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Catalog source path with `~` expanded
    pub fn catalog_source(&self) -> PathBuf {
        expand_path(&self.catalog.source)
    }

    /// Knowledge-base directory with `~` expanded
    pub fn data_dir(&self) -> PathBuf {
        expand_path(&self.storage.data_dir)
    }

    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.embedding.cache_dir.as_deref().map(expand_path)
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| MapperError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("icd-mapper").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| MapperError::Config("Cannot determine data directory".to_string()))?;

        Ok(data_dir.join("icd-mapper"))
    }
}

fn parse_value<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| MapperError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Expand a leading `~` to the home directory
pub fn expand_path(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.local/share/icd-mapper");

        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            catalog: CatalogConfig {
                source: data_dir.join("icd10cm_order_2025.txt"),
                format: SourceFormat::Order,
                billable_only: false,
                match_field: MatchField::Description,
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                batch_size: 64,
                cache_dir: None,
            },
            index: IndexConfig::default(),
            storage: StorageConfig {
                data_dir: data_dir.join("knowledge_base"),
            },
            batch: BatchConfig::default(),
        }
    }
}
