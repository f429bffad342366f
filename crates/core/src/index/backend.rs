//! Backend selection for a registry entry

use crate::index::approximate::ApproximateIndex;
use crate::index::flat::{LoadedRange, VectorIndex};
use crate::quantize::LopqCode;
use crate::{MetadataRecord, Neighbor, Result};

/// Either an exact or an approximate index. Callers go through this enum so
/// the refresh and query paths do not care which one an id is configured for.
#[derive(Debug, Clone)]
pub enum Backend {
    Exact(VectorIndex),
    Approximate(ApproximateIndex),
}

impl Backend {
    pub fn append<V: AsRef<[f32]>>(
        &mut self,
        vectors: &[V],
        metadata: Vec<MetadataRecord>,
    ) -> Result<LoadedRange> {
        match self {
            Backend::Exact(index) => index.append(vectors, metadata),
            Backend::Approximate(index) => index.append(vectors, metadata),
        }
    }

    /// Work that can run before the write lock is taken. Approximate
    /// backends encode the batch; exact backends have nothing to do.
    pub fn encode_batch<V: AsRef<[f32]>>(
        &self,
        vectors: &[V],
        metadata_len: usize,
    ) -> Result<Option<Vec<LopqCode>>> {
        match self {
            Backend::Exact(_) => Ok(None),
            Backend::Approximate(index) => index.encode_batch(vectors, metadata_len).map(Some),
        }
    }

    /// Append a batch, reusing codes from [`encode_batch`](Self::encode_batch)
    /// when there are any
    pub fn append_prepared<V: AsRef<[f32]>>(
        &mut self,
        vectors: &[V],
        codes: Option<Vec<LopqCode>>,
        metadata: Vec<MetadataRecord>,
    ) -> Result<LoadedRange> {
        match (self, codes) {
            (Backend::Approximate(index), Some(codes)) => index.append_encoded(codes, metadata),
            (backend, _) => backend.append(vectors, metadata),
        }
    }

    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        match self {
            Backend::Exact(index) => index.nearest(query, k),
            Backend::Approximate(index) => index.nearest(query, k),
        }
    }

    pub fn metadata(&self, row: usize) -> Option<&MetadataRecord> {
        match self {
            Backend::Exact(index) => index.metadata(row),
            Backend::Approximate(index) => index.metadata(row),
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            Backend::Exact(index) => index.dim(),
            Backend::Approximate(index) => index.dim(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Backend::Exact(index) => index.len(),
            Backend::Approximate(index) => index.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether distances are true Euclidean distances
    pub fn is_exact(&self) -> bool {
        matches!(self, Backend::Exact(_))
    }
}

impl From<VectorIndex> for Backend {
    fn from(index: VectorIndex) -> Self {
        Backend::Exact(index)
    }
}

impl From<ApproximateIndex> for Backend {
    fn from(index: ApproximateIndex) -> Self {
        Backend::Approximate(index)
    }
}
