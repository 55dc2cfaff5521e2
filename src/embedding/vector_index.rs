/// Nearest-neighbor indexes over catalog vectors (Euclidean distance)
use hnsw_rs::prelude::*;
use ndarray::Array2;
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Dimension mismatch at row {row}: expected {expected}, got {actual}")]
    DimensionMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid query dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Index build failed: {0}")]
    BuildError(String),

    #[error("Search failed: {0}")]
    SearchError(String),
}

/// One search hit: catalog row and its L2 distance to the query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f32,
}

/// k-nearest-neighbor search over an immutable set of vectors
///
/// Results are ordered by ascending true L2 distance, ties by lower row, and
/// hold `min(k, len)` entries.
pub trait VectorIndex: Send + Sync {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, VectorIndexError>;

    /// Number of indexed vectors
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector dimension (0 for an empty index)
    fn dimension(&self) -> usize;
}

/// Check that all vectors share one non-zero dimension and return it
pub fn check_dimensions(vectors: &[Vec<f32>]) -> Result<usize, VectorIndexError> {
    let Some(first) = vectors.first() else {
        return Ok(0);
    };
    let expected = first.len();
    if expected == 0 {
        return Err(VectorIndexError::DimensionMismatch {
            row: 0,
            expected: 1,
            actual: 0,
        });
    }
    for (row, vector) in vectors.iter().enumerate() {
        if vector.len() != expected {
            return Err(VectorIndexError::DimensionMismatch {
                row,
                expected,
                actual: vector.len(),
            });
        }
    }
    Ok(expected)
}

fn by_distance(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then(a.index.cmp(&b.index))
}

/// Exact brute-force index
pub struct FlatIndex {
    vectors: Array2<f32>,
}

impl FlatIndex {
    pub fn build(vectors: &[Vec<f32>]) -> Result<Self, VectorIndexError> {
        let dimension = check_dimensions(vectors)?;
        let data: Vec<f32> = vectors.iter().flatten().copied().collect();
        let vectors = Array2::from_shape_vec((vectors.len(), dimension), data)
            .map_err(|e| VectorIndexError::BuildError(e.to_string()))?;
        Ok(Self { vectors })
    }
}

impl VectorIndex for FlatIndex {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, VectorIndexError> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension() {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension(),
                actual: query.len(),
            });
        }

        let mut neighbors: Vec<Neighbor> = self
            .vectors
            .outer_iter()
            .enumerate()
            .map(|(index, row)| Neighbor {
                index,
                distance: row
                    .iter()
                    .zip(query)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>()
                    .sqrt(),
            })
            .collect();

        if k < neighbors.len() {
            neighbors.select_nth_unstable_by(k - 1, by_distance);
            neighbors.truncate(k);
        }
        neighbors.sort_by(by_distance);
        Ok(neighbors)
    }

    fn len(&self) -> usize {
        self.vectors.nrows()
    }

    fn dimension(&self) -> usize {
        self.vectors.ncols()
    }
}

/// HNSW parameters
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Connections per layer
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

const HNSW_MAX_LAYER: usize = 16;

/// Approximate index backed by hnsw_rs
pub struct HnswIndex {
    index: Hnsw<'static, f32, DistL2>,
    dimension: usize,
    count: usize,
    ef_search: usize,
}

impl HnswIndex {
    pub fn build(vectors: &[Vec<f32>], params: HnswParams) -> Result<Self, VectorIndexError> {
        let dimension = check_dimensions(vectors)?;
        if params.m == 0 || params.ef_construction == 0 {
            return Err(VectorIndexError::BuildError(
                "HNSW m and ef_construction must be greater than 0".to_string(),
            ));
        }

        let index = Hnsw::<f32, DistL2>::new(
            params.m,
            vectors.len().max(1),
            HNSW_MAX_LAYER,
            params.ef_construction,
            DistL2 {},
        );
        for (row, vector) in vectors.iter().enumerate() {
            index.insert((vector, row));
        }

        tracing::debug!("HNSW index built: {} vectors, {}D", vectors.len(), dimension);

        Ok(Self {
            index,
            dimension,
            count: vectors.len(),
            ef_search: params.ef_search,
        })
    }
}

impl VectorIndex for HnswIndex {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, VectorIndexError> {
        if self.count == 0 || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let k = k.min(self.count);
        let mut neighbors: Vec<Neighbor> = self
            .index
            .search(query, k, self.ef_search.max(k))
            .into_iter()
            .map(|n| Neighbor {
                index: n.d_id,
                distance: n.distance,
            })
            .collect();
        neighbors.sort_by(by_distance);
        neighbors.truncate(k);
        Ok(neighbors)
    }

    fn len(&self) -> usize {
        self.count
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
