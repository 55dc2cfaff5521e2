//! Hybrid resolver
//!
//! Keyword match first; when no catalog description clears the lexical
//! cutoff, the query is embedded and the nearest catalog vectors decide.
//!
//! | stage    | condition              | confidence |
//! |----------|------------------------|------------|
//! | lexical  | score >= 95            | High       |
//! | lexical  | 85 <= score < 95       | Medium     |
//! | semantic | distance < 0.8         | Medium     |
//! | semantic | distance >= 0.8        | Low        |
//! | semantic | empty index            | No Match   |

mod batch;

pub use batch::{BatchReport, BatchRunner};

use crate::catalog::{Catalog, CatalogError};
use crate::embedding::{EmbeddingError, EmbeddingProvider, VectorIndex, VectorIndexError};
use crate::lexical::{LexicalMatch, LexicalMatcher, LEXICAL_CUTOFF};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Lexical score at or above which a keyword match is trusted as High
pub const LEXICAL_HIGH: f64 = 95.0;
/// Semantic distance below which the nearest neighbor is Medium
pub const SEMANTIC_MEDIUM_DISTANCE: f32 = 0.8;
/// Neighbors fetched in the semantic stage (primary + alternatives)
pub const SEMANTIC_NEIGHBORS: usize = 3;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Diagnosis text is empty")]
    EmptyQuery,

    #[error("Embedding unavailable for '{query}': {source}")]
    EmbeddingUnavailable {
        query: String,
        source: EmbeddingError,
    },

    #[error("Vector search failed: {0}")]
    VectorSearch(#[from] VectorIndexError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Batch of {size} diagnoses exceeds the maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Index has {vectors} vectors but the catalog has {entries} entries")]
    Misaligned { entries: usize, vectors: usize },

    #[error("Index dimension {index} does not match embedding dimension {provider}")]
    DimensionMismatch { index: usize, provider: usize },
}

/// Human-facing trust label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
    #[serde(rename = "No Match")]
    NoMatch,
    Error,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Confidence::High => "High",
            Confidence::Medium => "Medium",
            Confidence::Low => "Low",
            Confidence::NoMatch => "No Match",
            Confidence::Error => "Error",
        };
        f.write_str(label)
    }
}

/// Stage that produced the match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Keyword,
    Semantic,
    None,
}

/// Raw score of a candidate: lexical similarity (0-100) or L2 distance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Score {
    Lexical(f64),
    Semantic(f32),
}

/// A catalog entry proposed for a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub index: usize,
    pub code: String,
    pub description: String,
    pub score: Score,
}

/// Secondary semantic candidate offered for review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub code: String,
    pub description: String,
    pub distance: f32,
}

/// Outcome for one diagnosis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingResult {
    pub original_diagnosis: String,
    #[serde(rename = "matched_icd_code")]
    pub matched_code: Option<String>,
    pub matched_description: Option<String>,
    pub confidence_level: Confidence,
    pub method: MatchMethod,
    pub score: Option<Score>,
    pub justification: String,
    #[serde(rename = "alternative_codes")]
    pub alternatives: Vec<Alternative>,
}

impl MappingResult {
    fn matched(
        diagnosis: &str,
        candidate: MatchCandidate,
        confidence: Confidence,
        method: MatchMethod,
        justification: String,
        alternatives: Vec<Alternative>,
    ) -> Self {
        Self {
            original_diagnosis: diagnosis.to_string(),
            matched_code: Some(candidate.code),
            matched_description: Some(candidate.description),
            confidence_level: confidence,
            method,
            score: Some(candidate.score),
            justification,
            alternatives,
        }
    }

    fn unmatched(diagnosis: &str, confidence: Confidence, justification: String) -> Self {
        Self {
            original_diagnosis: diagnosis.to_string(),
            matched_code: None,
            matched_description: None,
            confidence_level: confidence,
            method: MatchMethod::None,
            score: None,
            justification,
            alternatives: Vec::new(),
        }
    }

    /// Degraded result for a diagnosis that failed to resolve
    pub fn error(diagnosis: &str, error: &ResolveError) -> Self {
        Self::unmatched(
            diagnosis,
            Confidence::Error,
            format!("Error processing diagnosis: {}", error),
        )
    }
}

/// Confidence for a lexical score, `None` when it falls through to semantic search
pub fn classify_lexical(score: f64) -> Option<Confidence> {
    if score >= LEXICAL_HIGH {
        Some(Confidence::High)
    } else if score >= LEXICAL_CUTOFF {
        Some(Confidence::Medium)
    } else {
        None
    }
}

/// Confidence for the nearest semantic distance
pub fn classify_semantic(distance: f32) -> Confidence {
    if distance < SEMANTIC_MEDIUM_DISTANCE {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

pub struct HybridResolver {
    catalog: Arc<Catalog>,
    matcher: LexicalMatcher,
    index: Arc<dyn VectorIndex>,
    provider: Arc<dyn EmbeddingProvider>,
}

impl HybridResolver {
    /// Assemble a resolver over an index built from `catalog` in catalog order
    pub fn new(
        catalog: Arc<Catalog>,
        matcher: LexicalMatcher,
        index: Arc<dyn VectorIndex>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, ResolveError> {
        if index.len() != catalog.size() || matcher.len() != catalog.size() {
            return Err(ResolveError::Misaligned {
                entries: catalog.size(),
                vectors: index.len(),
            });
        }
        if !index.is_empty() && index.dimension() != provider.dimension() {
            return Err(ResolveError::DimensionMismatch {
                index: index.dimension(),
                provider: provider.dimension(),
            });
        }

        Ok(Self {
            catalog,
            matcher,
            index,
            provider,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Map one diagnosis to a catalog code
    pub fn resolve(&self, diagnosis: &str) -> Result<MappingResult, ResolveError> {
        let query = diagnosis.trim();
        if query.is_empty() {
            return Err(ResolveError::EmptyQuery);
        }

        if let Some(hit) = self.matcher.best_match(query) {
            if let Some(confidence) = classify_lexical(hit.score) {
                return self.keyword_result(diagnosis, hit, confidence);
            }
        }

        self.semantic_result(diagnosis, query)
    }

    fn keyword_result(
        &self,
        diagnosis: &str,
        hit: LexicalMatch,
        confidence: Confidence,
    ) -> Result<MappingResult, ResolveError> {
        let candidate = self.candidate(hit.index, Score::Lexical(hit.score))?;
        tracing::debug!(
            "Keyword match for '{}': {} (score {:.1}, {})",
            diagnosis,
            candidate.code,
            hit.score,
            confidence
        );

        let justification = format!(
            "Keyword match with score {:.1}/100. Confidence: {}. Found similar phrase in ICD description.",
            hit.score, confidence
        );
        Ok(MappingResult::matched(
            diagnosis,
            candidate,
            confidence,
            MatchMethod::Keyword,
            justification,
            Vec::new(),
        ))
    }

    fn semantic_result(&self, diagnosis: &str, query: &str) -> Result<MappingResult, ResolveError> {
        let embedding =
            self.provider
                .embed(query)
                .map_err(|source| ResolveError::EmbeddingUnavailable {
                    query: query.to_string(),
                    source,
                })?;

        let neighbors = self.index.search(&embedding, SEMANTIC_NEIGHBORS)?;
        let Some((primary, rest)) = neighbors.split_first() else {
            tracing::debug!("No semantic candidates for '{}'", diagnosis);
            return Ok(MappingResult::unmatched(
                diagnosis,
                Confidence::NoMatch,
                "No catalog entries available for semantic search. \
                 No direct keyword match found above threshold."
                    .to_string(),
            ));
        };

        let confidence = classify_semantic(primary.distance);
        let candidate = self.candidate(primary.index, Score::Semantic(primary.distance))?;
        let alternatives = rest
            .iter()
            .map(|n| {
                let entry = self.catalog.get(n.index)?;
                Ok(Alternative {
                    code: entry.code.clone(),
                    description: entry.description().to_string(),
                    distance: n.distance,
                })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;

        tracing::debug!(
            "Semantic match for '{}': {} (distance {:.3}, {})",
            diagnosis,
            candidate.code,
            primary.distance,
            confidence
        );

        let justification = format!(
            "Semantic match using {}. Distance: {:.3}. Confidence: {}. \
             No direct keyword match found above threshold.",
            self.provider.model_name(),
            primary.distance,
            confidence
        );
        Ok(MappingResult::matched(
            diagnosis,
            candidate,
            confidence,
            MatchMethod::Semantic,
            justification,
            alternatives,
        ))
    }

    fn candidate(&self, index: usize, score: Score) -> Result<MatchCandidate, ResolveError> {
        let entry = self.catalog.get(index)?;
        Ok(MatchCandidate {
            index,
            code: entry.code.clone(),
            description: entry.description().to_string(),
            score,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::RawRecord;
    use crate::embedding::FlatIndex;
    use crate::lexical::MatchField;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Table-driven provider: known texts map to fixed vectors, anything else
    /// to `fallback`; texts in `failing` error out.
    pub(crate) struct StubProvider {
        pub table: HashMap<String, Vec<f32>>,
        pub fallback: Vec<f32>,
        pub failing: Vec<String>,
        pub calls: AtomicUsize,
    }

    impl StubProvider {
        pub fn new(dim: usize) -> Self {
            Self {
                table: HashMap::new(),
                fallback: vec![0.0; dim],
                failing: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl EmbeddingProvider for StubProvider {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.iter().any(|f| f == text) {
                return Err(EmbeddingError::GenerationError("model offline".to_string()));
            }
            Ok(self
                .table
                .get(text)
                .cloned()
                .unwrap_or_else(|| self.fallback.clone()))
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimension(&self) -> usize {
            self.fallback.len()
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    pub(crate) fn sample_catalog() -> Catalog {
        let rows = [
            ("E119", "Type 2 diabetes mellitus without complications"),
            ("I219", "Acute myocardial infarction, unspecified"),
            ("I10", "Essential (primary) hypertension"),
            ("J189", "Pneumonia, unspecified organism"),
        ];
        let records = rows
            .iter()
            .enumerate()
            .map(|(i, (code, desc))| RawRecord {
                line: i + 1,
                code: code.to_string(),
                short_description: Some(desc.to_string()),
                long_description: None,
            })
            .collect();
        Catalog::load(records).unwrap()
    }

    pub(crate) fn sample_vectors() -> Vec<Vec<f32>> {
        vec![
            vec![0.0, 1.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0, 0.0],
            vec![0.0, 0.0, 0.0, 1.0],
        ]
    }

    fn resolver_with(provider: StubProvider) -> (HybridResolver, Arc<StubProvider>) {
        let catalog = Arc::new(sample_catalog());
        let matcher = LexicalMatcher::new(&catalog, MatchField::Description);
        let index = Arc::new(FlatIndex::build(&sample_vectors()).unwrap());
        let provider = Arc::new(provider);
        let resolver =
            HybridResolver::new(catalog, matcher, index, provider.clone()).unwrap();
        (resolver, provider)
    }

    #[test]
    fn test_lexical_thresholds() {
        assert_eq!(classify_lexical(100.0), Some(Confidence::High));
        assert_eq!(classify_lexical(95.0), Some(Confidence::High));
        assert_eq!(classify_lexical(94.0), Some(Confidence::Medium));
        assert_eq!(classify_lexical(85.0), Some(Confidence::Medium));
        assert_eq!(classify_lexical(84.0), None);
    }

    #[test]
    fn test_semantic_threshold_is_exclusive() {
        assert_eq!(classify_semantic(0.79999), Confidence::Medium);
        assert_eq!(classify_semantic(0.8), Confidence::Low);
        assert_eq!(classify_semantic(1.3), Confidence::Low);
        assert_eq!(classify_semantic(f32::NAN), Confidence::Low);
    }

    #[test]
    fn test_reordered_description_is_high_keyword_match() {
        let (resolver, provider) = resolver_with(StubProvider::new(4));
        let result = resolver
            .resolve("diabetes mellitus type 2 without complications")
            .unwrap();

        assert_eq!(result.confidence_level, Confidence::High);
        assert_eq!(result.matched_code.as_deref(), Some("E119"));
        assert_eq!(result.method, MatchMethod::Keyword);
        assert!(result.alternatives.is_empty());
        assert!(result.justification.contains("100.0/100"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_near_keyword_match_is_medium() {
        let (resolver, provider) = resolver_with(StubProvider::new(4));
        // "organism pneumonia, unspec" against "organism pneumonia, unspecified": 200 * 26 / 57
        let result = resolver.resolve("pneumonia, unspec organism").unwrap();
        match result.score {
            Some(Score::Lexical(score)) => assert!((85.0..95.0).contains(&score)),
            other => panic!("expected lexical score, got {:?}", other),
        }
        assert_eq!(result.confidence_level, Confidence::Medium);
        assert_eq!(result.matched_code.as_deref(), Some("J189"));
        assert!(result.alternatives.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_semantic_fallback_medium() {
        let mut provider = StubProvider::new(4);
        provider
            .table
            .insert("heart attack".to_string(), vec![1.0, 0.234, 0.0, 0.0]);
        let (resolver, _) = resolver_with(provider);

        let result = resolver.resolve("heart attack").unwrap();
        assert_eq!(result.confidence_level, Confidence::Medium);
        assert_eq!(result.matched_code.as_deref(), Some("I219"));
        assert_eq!(result.method, MatchMethod::Semantic);
        match result.score {
            Some(Score::Semantic(d)) => assert!((d - 0.234).abs() < 1e-6),
            other => panic!("expected semantic score, got {:?}", other),
        }
        assert_eq!(result.alternatives.len(), 2);
        assert!(result.alternatives[0].distance <= result.alternatives[1].distance);
        assert!(result
            .justification
            .contains("No direct keyword match found above threshold."));
        assert!(result.justification.contains("Distance: 0.234"));
    }

    #[test]
    fn test_semantic_distance_at_boundary_is_low() {
        let mut provider = StubProvider::new(4);
        provider
            .table
            .insert("chest pain".to_string(), vec![1.0, 0.0, 0.0, 0.8]);
        let (resolver, _) = resolver_with(provider);

        let result = resolver.resolve("chest pain").unwrap();
        assert_eq!(result.matched_code.as_deref(), Some("I219"));
        assert_eq!(result.confidence_level, Confidence::Low);
    }

    #[test]
    fn test_alternatives_exclude_primary() {
        let mut provider = StubProvider::new(4);
        provider
            .table
            .insert("fever".to_string(), vec![0.5, 0.0, 0.0, 0.6]);
        let (resolver, _) = resolver_with(provider);

        let result = resolver.resolve("fever").unwrap();
        let primary = result.matched_code.clone().unwrap();
        assert!(result.alternatives.iter().all(|a| a.code != primary));
    }

    #[test]
    fn test_empty_query_short_circuits() {
        let (resolver, provider) = resolver_with(StubProvider::new(4));
        assert!(matches!(resolver.resolve(""), Err(ResolveError::EmptyQuery)));
        assert!(matches!(resolver.resolve("   "), Err(ResolveError::EmptyQuery)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_embedding_failure_surfaces() {
        let mut provider = StubProvider::new(4);
        provider.failing.push("abdominal pain".to_string());
        let (resolver, _) = resolver_with(provider);

        let err = resolver.resolve("abdominal pain").unwrap_err();
        assert!(matches!(err, ResolveError::EmbeddingUnavailable { .. }));
        let result = MappingResult::error("abdominal pain", &err);
        assert_eq!(result.confidence_level, Confidence::Error);
        assert!(result.matched_code.is_none());
        assert!(result.justification.starts_with("Error processing diagnosis:"));
    }

    #[test]
    fn test_original_diagnosis_kept_verbatim() {
        let (resolver, _) = resolver_with(StubProvider::new(4));
        let result = resolver.resolve("  Pneumonia, unspecified organism ").unwrap();
        assert_eq!(result.original_diagnosis, "  Pneumonia, unspecified organism ");
        assert_eq!(result.matched_code.as_deref(), Some("J189"));
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut provider = StubProvider::new(4);
        provider
            .table
            .insert("heart attack".to_string(), vec![1.0, 0.234, 0.0, 0.0]);
        let (resolver, _) = resolver_with(provider);

        let first = resolver.resolve("heart attack").unwrap();
        let second = resolver.resolve("heart attack").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_catalog_is_no_match() {
        let catalog = Arc::new(Catalog::default());
        let matcher = LexicalMatcher::new(&catalog, MatchField::Description);
        let index = Arc::new(FlatIndex::build(&[]).unwrap());
        let resolver =
            HybridResolver::new(catalog, matcher, index, Arc::new(StubProvider::new(4))).unwrap();

        let result = resolver.resolve("anything").unwrap();
        assert_eq!(result.confidence_level, Confidence::NoMatch);
        assert!(result.matched_code.is_none());
    }

    #[test]
    fn test_misaligned_index_rejected() {
        let catalog = Arc::new(sample_catalog());
        let matcher = LexicalMatcher::new(&catalog, MatchField::Description);
        let index = Arc::new(FlatIndex::build(&sample_vectors()[..2]).unwrap());
        let result = HybridResolver::new(catalog, matcher, index, Arc::new(StubProvider::new(4)));
        assert!(matches!(result, Err(ResolveError::Misaligned { .. })));
    }

    #[test]
    fn test_confidence_serializes_with_labels() {
        assert_eq!(serde_json::to_string(&Confidence::NoMatch).unwrap(), "\"No Match\"");
        assert_eq!(Confidence::NoMatch.to_string(), "No Match");
    }
}
