//! Catalog store
//!
//! Holds the fixed set of ICD-10 entries. Entry order is stable: index `i`
//! addresses the same entry in `codes()`, `descriptions()`,
//! `embedding_texts()` and row `i` of any vector index built over the catalog.

mod parser;

pub use parser::{parse_source, read_source, RawRecord, SourceFormat};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Malformed catalog record at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Duplicate code {code} at line {line} (first seen at line {first_line})")]
    DuplicateCode {
        code: String,
        line: usize,
        first_line: usize,
    },

    #[error("Index {index} out of range for catalog of size {size}")]
    IndexOutOfRange { index: i64, size: usize },

    #[error("Failed to read catalog source {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse catalog source: {0}")]
    Parse(String),
}

/// A single catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub code: String,
    pub short_description: String,
    /// Falls back to `short_description` when the source has none
    pub long_description: String,
    /// Text chunk that is embedded for semantic search
    pub embedding_text: String,
}

impl CatalogEntry {
    fn new(code: String, short_description: String, long_description: Option<String>) -> Self {
        let long_description = long_description.unwrap_or_else(|| short_description.clone());
        let embedding_text = build_embedding_text(&code, &short_description, &long_description);
        Self {
            code,
            short_description,
            long_description,
            embedding_text,
        }
    }

    /// Preferred human-readable description
    pub fn description(&self) -> &str {
        &self.long_description
    }
}

fn build_embedding_text(code: &str, short: &str, long: &str) -> String {
    let mut text = format!("ICD Code: {}. Description: {}", code, short);
    if !long.eq_ignore_ascii_case(short) {
        text.push_str(". ");
        text.push_str(long);
    }
    collapse_whitespace(&text)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Immutable, index-aligned catalog
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    by_code: AHashMap<String, usize>,
}

impl Catalog {
    /// Validate raw records and build the catalog
    ///
    /// Every record needs a code and at least one description. Codes must be
    /// unique. Record order is preserved.
    pub fn load(records: Vec<RawRecord>) -> Result<Self, CatalogError> {
        let mut entries = Vec::with_capacity(records.len());
        let mut by_code: AHashMap<String, usize> = AHashMap::with_capacity(records.len());
        let mut first_lines: AHashMap<String, usize> = AHashMap::new();

        for record in records {
            let line = record.line;
            let code = record.code.trim().to_string();
            if code.is_empty() {
                return Err(CatalogError::Malformed {
                    line,
                    reason: "missing code".to_string(),
                });
            }
            if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
                return Err(CatalogError::Malformed {
                    line,
                    reason: format!("code '{}' is not alphanumeric", code),
                });
            }

            let short = non_empty(record.short_description);
            let long = non_empty(record.long_description);
            let (short, long) = match (short, long) {
                (Some(s), l) => (s, l),
                (None, Some(l)) => (l.clone(), Some(l)),
                (None, None) => {
                    return Err(CatalogError::Malformed {
                        line,
                        reason: format!("code '{}' has no description", code),
                    });
                }
            };

            if let Some(&first_line) = first_lines.get(&code) {
                return Err(CatalogError::DuplicateCode {
                    code,
                    line,
                    first_line,
                });
            }
            first_lines.insert(code.clone(), line);
            by_code.insert(code.clone(), entries.len());
            entries.push(CatalogEntry::new(code, short, long));
        }

        tracing::info!("Catalog loaded: {} entries", entries.len());

        Ok(Self { entries, by_code })
    }

    pub fn get(&self, index: usize) -> Result<&CatalogEntry, CatalogError> {
        self.entries
            .get(index)
            .ok_or(CatalogError::IndexOutOfRange {
                index: index as i64,
                size: self.entries.len(),
            })
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn find_by_code(&self, code: &str) -> Option<&CatalogEntry> {
        self.by_code.get(code).map(|&i| &self.entries[i])
    }

    pub fn codes(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.code.as_str()).collect()
    }

    pub fn descriptions(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.description()).collect()
    }

    pub fn embedding_texts(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.embedding_text.as_str()).collect()
    }

    /// Plain pagination over the catalog
    ///
    /// A negative offset is an error; an offset past the end yields an
    /// empty page.
    pub fn page(&self, offset: i64, limit: usize) -> Result<&[CatalogEntry], CatalogError> {
        if offset < 0 {
            return Err(CatalogError::IndexOutOfRange {
                index: offset,
                size: self.entries.len(),
            });
        }
        let start = (offset as usize).min(self.entries.len());
        let end = start.saturating_add(limit).min(self.entries.len());
        Ok(&self.entries[start..end])
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| collapse_whitespace(&v))
        .filter(|v| !v.is_empty())
}
