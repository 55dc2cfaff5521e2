use crate::catalog::CatalogError;
use crate::embedding::{EmbeddingError, VectorIndexError};
use crate::resolver::ResolveError;
use crate::storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the mapper
#[derive(Error, Debug)]
pub enum MapperError {
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

    /// Catalog load or lookup errors
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Embedding backend errors during the build phase
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Vector index construction or search errors
    #[error(transparent)]
    VectorIndex(#[from] VectorIndexError),

    /// Query resolution errors
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Knowledge-base snapshot errors
    #[error(transparent)]
    Storage(#[from] StorageError),

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

    /// Build lifecycle errors
    #[error("Build error: {0}")]
    Build(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
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

/// Result type for mapper operations
pub type Result<T> = std::result::Result<T, MapperError>;
