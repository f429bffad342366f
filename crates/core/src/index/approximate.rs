//! Approximate index over LOPQ codes
//!
//! Appended vectors are reduced and encoded with a trained
//! [`QuantizationModel`]; only the codes are kept. Search visits the inverted
//! multi-index cells closest to the query and ranks candidates by quantizer
//! score. Those scores order results but are not Euclidean distances.

use crate::index::flat::LoadedRange;
use crate::quantize::{LopqCode, LopqSearcher, QuantizationModel};
use crate::{MetadataRecord, Neighbor, Result, RetrievalError};
use std::sync::Arc;

/// Append-only approximate index sharing a read-only model
#[derive(Debug, Clone)]
pub struct ApproximateIndex {
    model: Arc<QuantizationModel>,
    searcher: LopqSearcher,
    metadata: Vec<MetadataRecord>,
}

impl ApproximateIndex {
    pub fn new(model: Arc<QuantizationModel>) -> Self {
        Self {
            model,
            searcher: LopqSearcher::new(),
            metadata: Vec::new(),
        }
    }

    pub fn model(&self) -> &QuantizationModel {
        &self.model
    }

    /// Dimension of raw input vectors
    pub fn dim(&self) -> usize {
        self.model.input_dim()
    }

    pub fn findex(&self) -> usize {
        self.metadata.len()
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// Encode and append a batch
    ///
    /// Every vector is encoded before anything is stored, so on error the
    /// index is unchanged.
    pub fn append<V: AsRef<[f32]>>(
        &mut self,
        vectors: &[V],
        metadata: Vec<MetadataRecord>,
    ) -> Result<LoadedRange> {
        let codes = self.encode_batch(vectors, metadata.len())?;
        self.append_encoded(codes, metadata)
    }

    /// Validate and encode a batch without touching the index
    ///
    /// Takes `&self` so callers can encode under a shared lock and only take
    /// exclusive access for [`append_encoded`](Self::append_encoded).
    pub fn encode_batch<V: AsRef<[f32]>>(&self, vectors: &[V], metadata_len: usize) -> Result<Vec<LopqCode>> {
        if vectors.len() != metadata_len {
            return Err(RetrievalError::ShapeMismatch {
                vectors: vectors.len(),
                metadata: metadata_len,
            });
        }
        if vectors.is_empty() {
            return Err(RetrievalError::EmptyBatch);
        }
        vectors.iter().map(|v| self.model.encode(v.as_ref())).collect()
    }

    /// Store codes produced by [`encode_batch`](Self::encode_batch)
    pub fn append_encoded(&mut self, codes: Vec<LopqCode>, metadata: Vec<MetadataRecord>) -> Result<LoadedRange> {
        if codes.len() != metadata.len() {
            return Err(RetrievalError::ShapeMismatch {
                vectors: codes.len(),
                metadata: metadata.len(),
            });
        }
        if codes.is_empty() {
            return Err(RetrievalError::EmptyBatch);
        }

        let start = self.findex();
        for (offset, code) in codes.into_iter().enumerate() {
            self.searcher.add(start + offset, code);
        }
        self.metadata.extend(metadata);

        Ok(LoadedRange {
            start,
            end: self.findex() - 1,
        })
    }

    /// Up to `k` rows ranked by quantizer score
    ///
    /// # Errors
    /// * `EmptyIndex` - if nothing has been appended yet
    /// * `DimensionMismatch` - if the query has the wrong dimension
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if self.is_empty() {
            return Err(RetrievalError::EmptyIndex);
        }
        let applied = self.model.apply_with(&self.searcher, query, Some(k.min(self.len())))?;
        Ok(applied.candidates.unwrap_or_default())
    }

    pub fn metadata(&self, row: usize) -> Option<&MetadataRecord> {
        self.metadata.get(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainerConfig;
    use crate::quantize::ModelTrainer;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn vectors(n: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                let center = if i % 2 == 0 { -2.0 } else { 2.0 };
                (0..8).map(|_| center + rng.gen_range(-1.0..1.0)).collect()
            })
            .collect()
    }

    fn model() -> Arc<QuantizationModel> {
        let config = TrainerConfig::default()
            .with_components(4)
            .with_coarse_clusters(2)
            .with_subquantizers(2)
            .with_sub_clusters(16)
            .without_recall();
        Arc::new(ModelTrainer::new(config).fit(&vectors(80, 1)).unwrap())
    }

    fn meta(n: usize) -> Vec<MetadataRecord> {
        (0..n)
            .map(|i| {
                let mut m = MetadataRecord::new();
                m.insert("frame_index".to_string(), serde_json::json!(i));
                m
            })
            .collect()
    }

    #[test]
    fn test_empty_index() {
        let index = ApproximateIndex::new(model());
        assert!(matches!(
            index.nearest(&[0.0; 8], 3),
            Err(RetrievalError::EmptyIndex)
        ));
    }

    #[test]
    fn test_append_ranges_are_contiguous() {
        let mut index = ApproximateIndex::new(model());
        let a = index.append(&vectors(10, 2), meta(10)).unwrap();
        let b = index.append(&vectors(5, 3), meta(5)).unwrap();
        assert_eq!((a.start, a.end), (0, 9));
        assert_eq!((b.start, b.end), (10, 14));
        assert_eq!(index.findex(), 15);
    }

    #[test]
    fn test_append_rejects_bad_batch_without_mutation() {
        let mut index = ApproximateIndex::new(model());
        index.append(&vectors(4, 2), meta(4)).unwrap();

        assert!(matches!(
            index.append(&vectors(3, 4), meta(2)),
            Err(RetrievalError::ShapeMismatch { vectors: 3, metadata: 2 })
        ));
        let ragged = vec![vec![0.0f32; 8], vec![0.0f32; 5]];
        assert!(matches!(
            index.append(&ragged, meta(2)),
            Err(RetrievalError::DimensionMismatch { expected: 8, actual: 5 })
        ));
        assert_eq!(index.findex(), 4);
    }

    #[test]
    fn test_encode_then_publish() {
        let mut index = ApproximateIndex::new(model());
        let data = vectors(6, 6);

        let codes = index.encode_batch(&data, 6).unwrap();
        assert_eq!(codes.len(), 6);
        assert!(index.is_empty());
        assert!(matches!(
            index.encode_batch(&data, 5),
            Err(RetrievalError::ShapeMismatch { vectors: 6, metadata: 5 })
        ));

        let range = index.append_encoded(codes.clone(), meta(6)).unwrap();
        assert_eq!((range.start, range.end), (0, 5));
        assert!(index.append_encoded(codes, meta(4)).is_err());
        assert_eq!(index.findex(), 6);

        let mut direct = ApproximateIndex::new(index.model.clone());
        direct.append(&data, meta(6)).unwrap();
        assert_eq!(direct.nearest(&data[1], 3).unwrap(), index.nearest(&data[1], 3).unwrap());
    }

    #[test]
    fn test_nearest_clamps_and_ranks() {
        let mut index = ApproximateIndex::new(model());
        let data = vectors(6, 5);
        index.append(&data, meta(6)).unwrap();

        let results = index.nearest(&data[0], 50).unwrap();
        assert_eq!(results.len(), 6);
        assert_eq!(results.iter().map(|n| n.rank).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6]);
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!(index.metadata(results[0].row).is_some());
    }
}
