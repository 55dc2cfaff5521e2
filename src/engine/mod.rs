//! Mapping engine
//!
//! Owns the built catalog, vector index and resolver. `initialize` is the
//! blocking build phase; everything after it is read-only and shareable.

pub mod lifecycle;

pub use lifecycle::{BuildLifecycle, BuildState, BuildStatus, ProgressReporter};

use crate::catalog::{read_source, Catalog, CatalogEntry};
use crate::config::Config;
use crate::embedding::{build_index, EmbeddingProvider, HnswParams, IndexBackend};
use crate::error::Result;
use crate::lexical::{LexicalMatcher, MatchField};
use crate::resolver::{BatchReport, BatchRunner, HybridResolver, MappingResult};
use crate::storage::KnowledgeBase;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Assembly options independent of where vectors come from
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub backend: IndexBackend,
    pub hnsw: HnswParams,
    pub match_field: MatchField,
    pub max_concurrent: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Flat,
            hnsw: HnswParams::default(),
            match_field: MatchField::Description,
            max_concurrent: 4,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            backend: config.index.backend,
            hnsw: config.index.hnsw_params(),
            match_field: config.catalog.match_field,
            max_concurrent: config.batch.max_concurrent,
        }
    }
}

/// One ranked candidate returned by text search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub rank: usize,
    pub code: String,
    pub short_description: String,
    pub long_description: String,
    pub justification: String,
}

pub struct MappingEngine {
    resolver: Arc<HybridResolver>,
    runner: BatchRunner,
}

impl MappingEngine {
    /// Build the engine from configuration
    ///
    /// Loads the catalog source, then reuses the knowledge base under
    /// `storage.data_dir` when it matches the catalog and model. Otherwise
    /// (or with `rebuild`) every entry is embedded and a fresh snapshot is
    /// written. `progress` receives `(embedded, total)` after each batch.
    pub fn initialize(
        config: &Config,
        provider: Arc<dyn EmbeddingProvider>,
        rebuild: bool,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<Self> {
        let source = config.catalog_source();
        info!("Loading catalog from {}", source.display());
        let records = read_source(&source, config.catalog.format, config.catalog.billable_only)?;
        let catalog = Catalog::load(records)?;
        info!("Catalog loaded: {} entries", catalog.size());

        let data_dir = config.data_dir();
        let vectors = match reusable_vectors(&data_dir, &catalog, provider.as_ref(), rebuild) {
            Some(vectors) => {
                progress(catalog.size(), catalog.size());
                vectors
            }
            None => {
                let vectors = embed_catalog(
                    &catalog,
                    provider.as_ref(),
                    config.embedding.batch_size,
                    &mut progress,
                )?;
                let kb = KnowledgeBase::from_catalog(&catalog, provider.model_name(), vectors)?;
                kb.save(&data_dir)?;
                kb.vectors
            }
        };

        Self::from_parts(
            catalog,
            provider,
            &vectors,
            EngineOptions::from_config(config),
        )
    }

    /// Assemble an engine from a loaded catalog and its vectors (catalog order)
    pub fn from_parts(
        catalog: Catalog,
        provider: Arc<dyn EmbeddingProvider>,
        vectors: &[Vec<f32>],
        options: EngineOptions,
    ) -> Result<Self> {
        let index = build_index(options.backend, options.hnsw, vectors)?;
        let matcher = LexicalMatcher::new(&catalog, options.match_field);
        let resolver = Arc::new(HybridResolver::new(
            Arc::new(catalog),
            matcher,
            index,
            provider,
        )?);
        let runner = BatchRunner::new(Arc::clone(&resolver), options.max_concurrent);

        Ok(Self { resolver, runner })
    }

    pub fn catalog(&self) -> &Catalog {
        self.resolver.catalog()
    }

    pub fn resolver(&self) -> Arc<HybridResolver> {
        Arc::clone(&self.resolver)
    }

    pub fn resolve(&self, diagnosis: &str) -> Result<MappingResult> {
        Ok(self.resolver.resolve(diagnosis)?)
    }

    pub fn resolve_batch(&self, diagnoses: &[String], max_batch_size: usize) -> Result<BatchReport> {
        Ok(self.runner.run(diagnoses, max_batch_size)?)
    }

    pub async fn resolve_batch_concurrent(
        &self,
        diagnoses: Vec<String>,
        max_batch_size: usize,
    ) -> Result<BatchReport> {
        Ok(self.runner.run_concurrent(diagnoses, max_batch_size).await?)
    }

    /// Page through the catalog in load order
    pub fn lookup_codes(&self, offset: i64, limit: usize) -> Result<Vec<CatalogEntry>> {
        Ok(self.catalog().page(offset, limit)?.to_vec())
    }

    /// Ranked candidates for free text: the match first, then alternatives
    pub fn search_by_text(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let result = self.resolve(query)?;
        let Some(code) = result.matched_code.as_deref() else {
            return Ok(Vec::new());
        };

        let mut hits = Vec::with_capacity(1 + result.alternatives.len());
        if let Some(entry) = self.catalog().find_by_code(code) {
            hits.push(self.hit(entry, 1, result.justification.clone()));
        }
        for alternative in &result.alternatives {
            if let Some(entry) = self.catalog().find_by_code(&alternative.code) {
                let justification = format!(
                    "Alternative semantic candidate. Distance: {:.3}.",
                    alternative.distance
                );
                hits.push(self.hit(entry, hits.len() + 1, justification));
            }
        }
        hits.truncate(limit);

        debug!(
            "Search '{}' ({:?}): {} hits",
            query,
            result.method,
            hits.len()
        );
        Ok(hits)
    }

    fn hit(&self, entry: &CatalogEntry, rank: usize, justification: String) -> SearchHit {
        SearchHit {
            rank,
            code: entry.code.clone(),
            short_description: entry.short_description.clone(),
            long_description: entry.long_description.clone(),
            justification,
        }
    }
}

fn reusable_vectors(
    data_dir: &Path,
    catalog: &Catalog,
    provider: &dyn EmbeddingProvider,
    rebuild: bool,
) -> Option<Vec<Vec<f32>>> {
    if rebuild {
        info!("Rebuild requested, ignoring existing knowledge base");
        return None;
    }
    if !KnowledgeBase::exists(data_dir) {
        return None;
    }

    match KnowledgeBase::load(data_dir) {
        Ok(kb) if kb.is_compatible(catalog, provider.model_name(), provider.dimension()) => {
            info!("Reusing knowledge base at {}", data_dir.display());
            Some(kb.vectors)
        }
        Ok(kb) => {
            info!(
                "Knowledge base at {} is stale (model {}, {} entries), rebuilding",
                data_dir.display(),
                kb.manifest.model,
                kb.manifest.entries
            );
            None
        }
        Err(e) => {
            warn!("Failed to load knowledge base, rebuilding: {}", e);
            None
        }
    }
}

/// Embed every catalog entry's embedding text in catalog order
pub fn embed_catalog(
    catalog: &Catalog,
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
    mut progress: impl FnMut(usize, usize),
) -> Result<Vec<Vec<f32>>> {
    let total = catalog.size();
    let start = std::time::Instant::now();
    info!(
        "Embedding {} catalog entries with {} (batch size {})",
        total,
        provider.model_name(),
        batch_size
    );

    let texts: Vec<String> = catalog
        .embedding_texts()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut vectors = Vec::with_capacity(total);
    for chunk in texts.chunks(batch_size.max(1)) {
        vectors.extend(provider.embed_batch(chunk)?);
        progress(vectors.len(), total);
        debug!("Embedded {}/{} entries", vectors.len(), total);
    }

    info!(
        "Embedding complete: {} vectors in {}ms",
        vectors.len(),
        start.elapsed().as_millis()
    );
    Ok(vectors)
}
