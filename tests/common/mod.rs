//! Shared fixtures for integration tests
#![allow(dead_code)]

use icd_mapper::catalog::SourceFormat;
use icd_mapper::config::Config;
use icd_mapper::embedding::{EmbeddingError, EmbeddingProvider};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Keyword groups; a text's vector marks which groups it mentions
const CONCEPTS: &[&[&str]] = &[
    &["diabetes"],
    &["myocardial", "heart", "cardiac"],
    &["hypertension", "blood pressure"],
    &["pneumonia", "lung"],
    &["acute", "attack"],
];

pub const DIMENSION: usize = CONCEPTS.len() + 1;

/// Deterministic provider over keyword concepts
///
/// The last dimension is never set by concepts, so table entries can place a
/// query at an exact distance from a catalog vector.
pub struct ConceptProvider {
    pub table: HashMap<String, Vec<f32>>,
    pub failing: Vec<String>,
    pub calls: AtomicUsize,
}

impl ConceptProvider {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
            failing: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn concept_vector(text: &str) -> Vec<f32> {
        let text = text.to_lowercase();
        let mut vector: Vec<f32> = CONCEPTS
            .iter()
            .map(|words| {
                if words.iter().any(|w| text.contains(w)) {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();
        vector.push(0.0);

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for ConceptProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.iter().any(|f| f == text) {
            return Err(EmbeddingError::GenerationError(
                "embedding service unavailable".to_string(),
            ));
        }
        Ok(self
            .table
            .get(text)
            .cloned()
            .unwrap_or_else(|| Self::concept_vector(text)))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "concept-test"
    }
}

/// One line of a CMS order file
pub fn order_line(order: u32, code: &str, billable: bool, short: &str, long: &str) -> String {
    let flag = if billable { '1' } else { '0' };
    format!("{:05} {:<7} {} {:<60} {}", order, code, flag, short, long)
}

pub fn sample_order_file() -> String {
    [
        order_line(1, "E11", false, "Type 2 diabetes mellitus", "Type 2 diabetes mellitus"),
        order_line(
            2,
            "E119",
            true,
            "Type 2 diabetes mellitus without complications",
            "Type 2 diabetes mellitus without complications",
        ),
        order_line(
            3,
            "I10",
            true,
            "Essential (primary) hypertension",
            "Essential (primary) hypertension",
        ),
        order_line(
            4,
            "I21",
            false,
            "STEMI and NSTEMI myocardial infarction",
            "ST elevation (STEMI) and non-ST elevation (NSTEMI) myocardial infarction",
        ),
        order_line(
            5,
            "I219",
            true,
            "Acute myocardial infarction, unspecified",
            "Acute myocardial infarction, unspecified",
        ),
        order_line(
            6,
            "J189",
            true,
            "Pneumonia, unspecified organism",
            "Pneumonia, unspecified organism",
        ),
    ]
    .join("\n")
}

/// Config pointing at a freshly written order file under `dir`
pub fn config_in(dir: &Path) -> Config {
    let source = dir.join("icd10cm_order.txt");
    std::fs::write(&source, sample_order_file()).unwrap();

    let mut config = Config::default();
    config.catalog.source = source;
    config.catalog.format = SourceFormat::Order;
    config.storage.data_dir = dir.join("knowledge_base");
    config.embedding.batch_size = 4;
    config
}
