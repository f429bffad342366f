//! Exact (brute-force) index
//!
//! [`VectorIndex`] keeps every vector in a contiguous [`RowMatrix`] and a
//! parallel list of metadata records. Rows are only ever appended, so the row
//! offset is a stable identity for the lifetime of the index:
//!
//! - `append` validates the whole batch before touching any state
//! - `nearest` scans all rows, O(N·D)
//!
//! Suitable for the exact retrieval path and as ground truth when measuring
//! recall of the quantized backend.

use crate::vector::{l2_distance_squared_simd, RowMatrix};
use crate::{MetadataRecord, Neighbor, Result, RetrievalError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Inclusive row interval `[start, end]` occupied by one appended batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedRange {
    pub start: usize,
    pub end: usize,
}

impl LoadedRange {
    /// Number of rows covered
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// Ranges are never empty; kept for clippy's `len_without_is_empty`
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, row: usize) -> bool {
        row >= self.start && row <= self.end
    }

    pub fn overlaps(&self, other: &LoadedRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Append-only exact index over fixed-dimension vectors
///
/// # Examples
/// ```
/// use framesift_core::index::VectorIndex;
/// use framesift_core::MetadataRecord;
///
/// let mut index = VectorIndex::new(2);
/// let range = index
///     .append(&[vec![0.0, 0.0], vec![1.0, 1.0]], vec![MetadataRecord::new(); 2])
///     .unwrap();
/// assert_eq!((range.start, range.end), (0, 1));
///
/// let results = index.nearest(&[0.9, 0.9], 1).unwrap();
/// assert_eq!(results[0].row, 1);
/// assert_eq!(results[0].rank, 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    /// Fixed dimension of every stored vector
    dim: usize,
    /// Stored vectors, one per row
    rows: RowMatrix,
    /// Metadata for each row, same length as `rows`
    metadata: Vec<MetadataRecord>,
}

impl VectorIndex {
    /// Create an empty index for vectors of dimension `dim`
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            rows: RowMatrix::new(dim),
            metadata: Vec::new(),
        }
    }

    /// Vector dimension
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Next free row offset; equal to the number of stored rows
    pub fn findex(&self) -> usize {
        self.metadata.len()
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// Append a batch of vectors with their metadata
    ///
    /// # Errors
    /// * `EmptyBatch` - if the batch has no vectors and no metadata
    /// * `ShapeMismatch` - if vector and metadata counts differ
    /// * `DimensionMismatch` - if any vector has the wrong dimension
    /// * `InvalidConfig` - if the index was created with dimension 0
    ///
    /// The index is left untouched on any error.
    pub fn append<V: AsRef<[f32]>>(
        &mut self,
        vectors: &[V],
        metadata: Vec<MetadataRecord>,
    ) -> Result<LoadedRange> {
        if self.dim == 0 {
            return Err(RetrievalError::InvalidConfig(
                "index dimension must be non-zero".to_string(),
            ));
        }
        if vectors.len() != metadata.len() {
            return Err(RetrievalError::ShapeMismatch {
                vectors: vectors.len(),
                metadata: metadata.len(),
            });
        }
        if vectors.is_empty() {
            return Err(RetrievalError::EmptyBatch);
        }
        if let Some(bad) = vectors.iter().find(|v| v.as_ref().len() != self.dim) {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dim,
                actual: bad.as_ref().len(),
            });
        }

        let start = self.findex();
        self.rows.extend_rows(vectors);
        self.metadata.extend(metadata);
        debug_assert_eq!(self.rows.rows(), self.metadata.len());

        Ok(LoadedRange {
            start,
            end: self.findex() - 1,
        })
    }

    /// Find the `k` rows closest to `query` by Euclidean distance
    ///
    /// Results are ascending by distance, ties broken by the lower row offset,
    /// and ranked from 1. `k` larger than the index is clamped.
    ///
    /// # Errors
    /// * `EmptyIndex` - if nothing has been appended yet
    /// * `DimensionMismatch` - if the query has the wrong dimension
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if self.is_empty() {
            return Err(RetrievalError::EmptyIndex);
        }
        if query.len() != self.dim {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }

        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, usize)> = self
            .rows
            .iter_rows()
            .enumerate()
            .map(|(row, vector)| (l2_distance_squared_simd(query, vector), row))
            .collect();

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, compare_scored);
            scored.truncate(k);
        }
        scored.sort_by(compare_scored);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(i, (dist_sq, row))| Neighbor {
                row,
                distance: dist_sq.sqrt(),
                rank: i + 1,
            })
            .collect())
    }

    /// Metadata attached to `row`
    pub fn metadata(&self, row: usize) -> Option<&MetadataRecord> {
        self.metadata.get(row)
    }

    /// Stored vector at `row`
    pub fn vector(&self, row: usize) -> Option<&[f32]> {
        (row < self.len()).then(|| self.rows.row(row))
    }

    /// All stored rows
    pub fn rows(&self) -> &RowMatrix {
        &self.rows
    }
}

fn compare_scored(a: &(f32, usize), b: &(f32, usize)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(frame: u64) -> MetadataRecord {
        let mut m = MetadataRecord::new();
        m.insert("frame_primary_key".to_string(), json!(frame));
        m.insert("video_primary_key".to_string(), json!(1));
        m
    }

    fn records(n: usize) -> Vec<MetadataRecord> {
        (0..n as u64).map(record).collect()
    }

    #[test]
    fn test_new_index() {
        let index = VectorIndex::new(128);
        assert_eq!(index.dim(), 128);
        assert_eq!(index.findex(), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_append_advances_findex() {
        let mut index = VectorIndex::new(4);
        let batch = vec![vec![0.0; 4], vec![1.0; 4], vec![2.0; 4]];

        let range = index.append(&batch, records(3)).unwrap();
        assert_eq!(range, LoadedRange { start: 0, end: 2 });
        assert_eq!(index.findex(), 3);

        let range = index.append(&batch[..2], records(2)).unwrap();
        assert_eq!(range, LoadedRange { start: 3, end: 4 });
        assert_eq!(range.len(), 2);
        assert_eq!(index.findex(), 5);
    }

    #[test]
    fn test_zero_dimension_index_rejects_appends() {
        let mut index = VectorIndex::new(0);
        let empty: Vec<Vec<f32>> = vec![Vec::new(); 2];
        assert!(matches!(
            index.append(&empty, records(2)),
            Err(RetrievalError::InvalidConfig(_))
        ));
        assert_eq!(index.findex(), 0);
    }

    #[test]
    fn test_append_shape_mismatch_leaves_index_unchanged() {
        let mut index = VectorIndex::new(4);
        index.append(&[vec![0.0; 4]], records(1)).unwrap();

        let batch = vec![vec![1.0; 4], vec![2.0; 4], vec![3.0; 4]];
        let result = index.append(&batch, records(2));

        assert!(matches!(
            result,
            Err(RetrievalError::ShapeMismatch { vectors: 3, metadata: 2 })
        ));
        assert_eq!(index.findex(), 1);
        assert_eq!(index.rows().rows(), 1);
    }

    #[test]
    fn test_append_dimension_mismatch_is_atomic() {
        let mut index = VectorIndex::new(3);
        let batch = vec![vec![1.0, 0.0, 0.0], vec![1.0, 0.0]];

        let result = index.append(&batch, records(2));
        assert!(matches!(
            result,
            Err(RetrievalError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        // First vector must not have been added
        assert!(index.is_empty());
    }

    #[test]
    fn test_append_empty_batch() {
        let mut index = VectorIndex::new(3);
        let empty: Vec<Vec<f32>> = Vec::new();
        assert!(matches!(
            index.append(&empty, Vec::new()),
            Err(RetrievalError::EmptyBatch)
        ));
    }

    #[test]
    fn test_nearest_empty_index() {
        let index = VectorIndex::new(3);
        assert!(matches!(
            index.nearest(&[1.0, 0.0, 0.0], 5),
            Err(RetrievalError::EmptyIndex)
        ));
    }

    #[test]
    fn test_nearest_sorted_by_distance() {
        let mut index = VectorIndex::new(3);
        index
            .append(
                &[vec![0.0, 1.0, 0.0], vec![1.0, 0.0, 0.0], vec![0.9, 0.1, 0.0]],
                records(3),
            )
            .unwrap();

        let results = index.nearest(&[1.0, 0.0, 0.0], 10).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().map(|r| r.row).collect::<Vec<_>>(), vec![1, 2, 0]);
        assert_eq!(results.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(results[0].distance.abs() < 1e-6);
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_nearest_ties_prefer_earlier_rows() {
        let mut index = VectorIndex::new(2);
        index
            .append(
                &[vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0], vec![0.0, -1.0]],
                records(4),
            )
            .unwrap();

        // All four are equidistant from the origin
        let results = index.nearest(&[0.0, 0.0], 2).unwrap();
        assert_eq!(results[0].row, 0);
        assert_eq!(results[1].row, 1);
    }

    #[test]
    fn test_nearest_limit_k() {
        let mut index = VectorIndex::new(3);
        let batch: Vec<Vec<f32>> = (0..5).map(|i| vec![i as f32, 0.0, 0.0]).collect();
        index.append(&batch, records(5)).unwrap();

        let results = index.nearest(&[10.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].row, 4);
        assert!((results[0].distance - 6.0).abs() < 1e-5);
    }

    #[test]
    fn test_nearest_dimension_mismatch() {
        let mut index = VectorIndex::new(3);
        index.append(&[vec![1.0, 0.0, 0.0]], records(1)).unwrap();
        assert!(index.nearest(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn test_metadata_lookup() {
        let mut index = VectorIndex::new(2);
        index.append(&[vec![0.0, 0.0], vec![5.0, 5.0]], records(2)).unwrap();

        let hit = index.nearest(&[5.0, 5.0], 1).unwrap()[0];
        let meta = index.metadata(hit.row).unwrap();
        assert_eq!(meta["frame_primary_key"], json!(1));
        assert!(index.metadata(2).is_none());
        assert_eq!(index.vector(1), Some(&[5.0, 5.0][..]));
    }

    #[test]
    fn test_loaded_range_overlap() {
        let a = LoadedRange { start: 0, end: 4 };
        let b = LoadedRange { start: 5, end: 9 };
        let c = LoadedRange { start: 4, end: 6 };
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
        assert!(a.contains(4));
        assert!(!a.contains(5));
    }

    #[test]
    fn test_large_batch() {
        let mut index = VectorIndex::new(128);
        let batch: Vec<Vec<f32>> = (0..1000)
            .map(|i| {
                let mut v = vec![0.0; 128];
                v[0] = i as f32;
                v
            })
            .collect();

        index.append(&batch, records(1000)).unwrap();
        assert_eq!(index.len(), 1000);

        let mut query = vec![0.0; 128];
        query[0] = 500.2;
        let results = index.nearest(&query, 10).unwrap();
        assert_eq!(results.len(), 10);
        assert_eq!(results[0].row, 500);
        assert_eq!(results[1].row, 501);
    }
}
