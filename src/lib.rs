//! icd-mapper - Hybrid ICD-10 diagnosis coding
//!
//! Maps free-text clinical diagnoses to ICD-10 codes. A token-sort keyword
//! stage answers near-verbatim phrases; the rest fall back to nearest-neighbor
//! search over sentence embeddings of the catalog, with confidence levels,
//! justifications and alternative codes for review.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod lexical;
pub mod resolver;
pub mod storage;

pub use catalog::{Catalog, CatalogEntry};
pub use engine::{MappingEngine, SearchHit};
pub use error::{MapperError, Result};
pub use resolver::{BatchReport, Confidence, MappingResult};
