//! Knowledge-base snapshot
//!
//! Persists the index-aligned catalog arrays and their vectors so the
//! embedding pass only runs when the catalog or the model changes.
//!
//! Layout of a knowledge-base directory:
//! - `manifest.json`     model, dimension, entry count, catalog hash
//! - `codes.json`        codes in catalog order
//! - `descriptions.json` descriptions in catalog order
//! - `chunks.json`       embedding texts in catalog order
//! - `vectors.bin.zst`   row-major vector matrix (bincode + zstd)

use crate::catalog::Catalog;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";
const CODES_FILE: &str = "codes.json";
const DESCRIPTIONS_FILE: &str = "descriptions.json";
const CHUNKS_FILE: &str = "chunks.json";
const VECTORS_FILE: &str = "vectors.bin.zst";
const ZSTD_LEVEL: i32 = 3;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    #[error("Vector encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Snapshot is corrupt: {0}")]
    Corrupt(String),
}

/// Snapshot header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub model: String,
    pub dimension: usize,
    pub entries: usize,
    /// BLAKE3 over codes and embedding texts in catalog order
    pub catalog_hash: String,
    pub created_at: String,
}

#[derive(Serialize, Deserialize)]
struct VectorMatrix {
    dimension: usize,
    data: Vec<f32>,
}

/// Index-aligned catalog arrays plus vectors
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeBase {
    pub manifest: Manifest,
    pub codes: Vec<String>,
    pub descriptions: Vec<String>,
    pub chunks: Vec<String>,
    pub vectors: Vec<Vec<f32>>,
}

/// Content hash identifying a catalog's codes and embedded texts
pub fn catalog_hash(catalog: &Catalog) -> String {
    let mut hasher = blake3::Hasher::new();
    for entry in catalog.entries() {
        hasher.update(entry.code.as_bytes());
        hasher.update(&[0]);
        hasher.update(entry.embedding_text.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

impl KnowledgeBase {
    /// Snapshot a catalog with its vectors (one per entry, catalog order)
    pub fn from_catalog(
        catalog: &Catalog,
        model: &str,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, StorageError> {
        if vectors.len() != catalog.size() {
            return Err(StorageError::Corrupt(format!(
                "{} vectors for {} catalog entries",
                vectors.len(),
                catalog.size()
            )));
        }
        let dimension = vectors.first().map_or(0, Vec::len);

        Ok(Self {
            manifest: Manifest {
                schema_version: SNAPSHOT_SCHEMA_VERSION,
                model: model.to_string(),
                dimension,
                entries: catalog.size(),
                catalog_hash: catalog_hash(catalog),
                created_at: chrono::Utc::now().to_rfc3339(),
            },
            codes: catalog.codes().into_iter().map(str::to_string).collect(),
            descriptions: catalog
                .descriptions()
                .into_iter()
                .map(str::to_string)
                .collect(),
            chunks: catalog
                .embedding_texts()
                .into_iter()
                .map(str::to_string)
                .collect(),
            vectors,
        })
    }

    /// Whether this snapshot was built from `catalog` with the given model
    pub fn is_compatible(&self, catalog: &Catalog, model: &str, dimension: usize) -> bool {
        self.manifest.schema_version == SNAPSHOT_SCHEMA_VERSION
            && self.manifest.model == model
            && (self.manifest.dimension == dimension || self.manifest.entries == 0)
            && self.manifest.entries == catalog.size()
            && self.manifest.catalog_hash == catalog_hash(catalog)
    }

    pub fn exists(dir: &Path) -> bool {
        dir.join(MANIFEST_FILE).exists() && dir.join(VECTORS_FILE).exists()
    }

    /// Write all files; each file is written to a temp path and renamed
    pub fn save(&self, dir: &Path) -> Result<(), StorageError> {
        fs::create_dir_all(dir).map_err(|e| StorageError::Io {
            source: e,
            context: format!("Failed to create knowledge-base directory: {}", dir.display()),
        })?;

        write_json(&dir.join(CODES_FILE), &self.codes)?;
        write_json(&dir.join(DESCRIPTIONS_FILE), &self.descriptions)?;
        write_json(&dir.join(CHUNKS_FILE), &self.chunks)?;

        let matrix = VectorMatrix {
            dimension: self.manifest.dimension,
            data: self.vectors.iter().flatten().copied().collect(),
        };
        let encoded = bincode::serialize(&matrix)?;
        let compressed = zstd::encode_all(encoded.as_slice(), ZSTD_LEVEL).map_err(|e| {
            StorageError::Io {
                source: e,
                context: "Failed to compress vectors".to_string(),
            }
        })?;
        write_atomic(&dir.join(VECTORS_FILE), &compressed)?;

        // Manifest last: a snapshot without one is never loaded
        write_json(&dir.join(MANIFEST_FILE), &self.manifest)?;

        tracing::info!(
            "Knowledge base saved to {} ({} entries, {}D)",
            dir.display(),
            self.manifest.entries,
            self.manifest.dimension
        );
        Ok(())
    }

    /// Load and verify a snapshot
    pub fn load(dir: &Path) -> Result<Self, StorageError> {
        let manifest: Manifest = read_json(&dir.join(MANIFEST_FILE))?;
        let codes: Vec<String> = read_json(&dir.join(CODES_FILE))?;
        let descriptions: Vec<String> = read_json(&dir.join(DESCRIPTIONS_FILE))?;
        let chunks: Vec<String> = read_json(&dir.join(CHUNKS_FILE))?;

        let vectors_path = dir.join(VECTORS_FILE);
        let compressed = fs::read(&vectors_path).map_err(|e| StorageError::Io {
            source: e,
            context: format!("Failed to read {}", vectors_path.display()),
        })?;
        let encoded = zstd::decode_all(compressed.as_slice()).map_err(|e| StorageError::Io {
            source: e,
            context: format!("Failed to decompress {}", vectors_path.display()),
        })?;
        let matrix: VectorMatrix = bincode::deserialize(&encoded)?;

        let vectors = split_rows(matrix, manifest.entries)?;

        for (name, len) in [
            ("codes", codes.len()),
            ("descriptions", descriptions.len()),
            ("chunks", chunks.len()),
            ("vectors", vectors.len()),
        ] {
            if len != manifest.entries {
                return Err(StorageError::Corrupt(format!(
                    "{} has {} rows, manifest declares {}",
                    name, len, manifest.entries
                )));
            }
        }

        tracing::info!(
            "Knowledge base loaded from {} ({} entries, model {})",
            dir.display(),
            manifest.entries,
            manifest.model
        );

        Ok(Self {
            manifest,
            codes,
            descriptions,
            chunks,
            vectors,
        })
    }
}

fn split_rows(matrix: VectorMatrix, entries: usize) -> Result<Vec<Vec<f32>>, StorageError> {
    if entries == 0 {
        return Ok(Vec::new());
    }
    if matrix.dimension == 0 || matrix.data.len() != matrix.dimension * entries {
        return Err(StorageError::Corrupt(format!(
            "vector matrix of {} values does not hold {} rows of {} dimensions",
            matrix.data.len(),
            entries,
            matrix.dimension
        )));
    }
    Ok(matrix
        .data
        .chunks_exact(matrix.dimension)
        .map(<[f32]>::to_vec)
        .collect())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec(value).map_err(|e| StorageError::Json {
        source: e,
        context: format!("Failed to serialize {}", path.display()),
    })?;
    write_atomic(path, &bytes)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let bytes = fs::read(path).map_err(|e| StorageError::Io {
        source: e,
        context: format!("Failed to read {}", path.display()),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| StorageError::Json {
        source: e,
        context: format!("Failed to parse {}", path.display()),
    })
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let temp_path = temp_path(path);
    let mut file = fs::File::create(&temp_path).map_err(|e| StorageError::Io {
        source: e,
        context: format!("Failed to create {}", temp_path.display()),
    })?;
    file.write_all(data).map_err(|e| StorageError::Io {
        source: e,
        context: format!("Failed to write {}", temp_path.display()),
    })?;
    file.sync_all().map_err(|e| StorageError::Io {
        source: e,
        context: format!("Failed to sync {}", temp_path.display()),
    })?;
    fs::rename(&temp_path, path).map_err(|e| StorageError::Io {
        source: e,
        context: format!("Failed to move {} into place", path.display()),
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
