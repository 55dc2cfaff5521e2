/// Embedding & vector indexing
///
/// - EmbeddingProvider trait for abstraction over embedding backends
/// - FastEmbedProvider for local embedding (all-MiniLM-L6-v2, 384-dim)
/// - FlatIndex for exact L2 search, HnswIndex as an approximate alternative
mod provider;
mod vector_index;

pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use vector_index::{
    check_dimensions, FlatIndex, HnswIndex, HnswParams, Neighbor, VectorIndex, VectorIndexError,
};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Vector index implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// Exact brute-force search
    #[default]
    Flat,
    /// Approximate HNSW graph
    Hnsw,
}

/// Build the configured index over catalog-ordered vectors
pub fn build_index(
    backend: IndexBackend,
    params: HnswParams,
    vectors: &[Vec<f32>],
) -> Result<Arc<dyn VectorIndex>, VectorIndexError> {
    let index: Arc<dyn VectorIndex> = match backend {
        IndexBackend::Flat => Arc::new(FlatIndex::build(vectors)?),
        IndexBackend::Hnsw => Arc::new(HnswIndex::build(vectors, params)?),
    };
    tracing::info!(
        "Vector index ready: {:?}, {} vectors, {}D",
        backend,
        index.len(),
        index.dimension()
    );
    Ok(index)
}
