//! Lexical matcher
//!
//! Linear token-sort scan over the catalog. Catalog texts are normalized once
//! at construction; a length bound skips entries that cannot beat the current
//! best, which leaves the result identical to a full scan.

mod token_sort;

pub use token_sort::{ratio_upper_bound, sorted_tokens, token_sort_ratio, TokenSortScorer};

use crate::catalog::Catalog;
use serde::{Deserialize, Serialize};

/// Minimum score for a lexical candidate
pub const LEXICAL_CUTOFF: f64 = 85.0;

/// Which catalog text is compared against the query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    /// Long description, falling back to the short one
    #[default]
    Description,
    /// The embedding text chunk (code label + descriptions)
    EmbeddingText,
}

/// Best lexical hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LexicalMatch {
    pub index: usize,
    pub score: f64,
}

pub struct LexicalMatcher {
    texts: Vec<Vec<char>>,
    cutoff: f64,
}

impl LexicalMatcher {
    pub fn new(catalog: &Catalog, field: MatchField) -> Self {
        Self::with_cutoff(catalog, field, LEXICAL_CUTOFF)
    }

    pub fn with_cutoff(catalog: &Catalog, field: MatchField, cutoff: f64) -> Self {
        let texts = catalog
            .entries()
            .iter()
            .map(|entry| match field {
                MatchField::Description => sorted_tokens(entry.description()),
                MatchField::EmbeddingText => sorted_tokens(&entry.embedding_text),
            })
            .collect();
        Self { texts, cutoff }
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Highest-scoring entry, or `None` when the best score is below the cutoff
    ///
    /// Ties go to the lowest catalog index.
    pub fn best_match(&self, query: &str) -> Option<LexicalMatch> {
        let scorer = TokenSortScorer::new(query);
        let mut best: Option<LexicalMatch> = None;

        for (index, text) in self.texts.iter().enumerate() {
            let bound = ratio_upper_bound(scorer.len(), text.len());
            if bound < self.cutoff {
                continue;
            }
            if let Some(current) = best {
                if bound <= current.score {
                    continue;
                }
            }

            let score = scorer.score(text);
            if score < self.cutoff {
                continue;
            }
            if best.map_or(true, |current| score > current.score) {
                best = Some(LexicalMatch { index, score });
                if score >= 100.0 {
                    break;
                }
            }
        }

        best
    }
}
