//! Trained quantization model
//!
//! A [`QuantizationModel`] maps an input vector into the quantized space in
//! three steps:
//!
//! ```text
//! x (D) --PCA--> p (k) --(p - mu) · R--> r (k) --LOPQ--> (c0, c1), fine[M]
//! ```
//!
//! `R` is the eigenvector matrix of the reduced corpus covariance with its
//! columns permuted so both coarse halves carry a similar share of variance.

use crate::quantize::allocation::eigenvalue_allocation;
use crate::quantize::lopq::{LopqCode, LopqQuantizer};
use crate::quantize::pca::PcaReduction;
use crate::quantize::searcher::LopqSearcher;
use crate::vector::linalg::{covariance, symmetric_eigen};
use crate::{Neighbor, Result, RetrievalError};
use serde::{Deserialize, Serialize};

/// Centering plus variance-balancing rotation applied after PCA
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalancedRotation {
    pub(crate) mean: Vec<f32>,
    pub(crate) permutation: Vec<usize>,
    /// Row-major `k × k`, column `j` is eigenvector `permutation[j]`
    pub(crate) matrix: Vec<f32>,
}

impl BalancedRotation {
    /// Fit on PCA-reduced vectors
    pub fn fit(reduced: &[Vec<f32>]) -> Result<Self> {
        let dim = reduced.first().map(|r| r.len()).unwrap_or(0);
        let (mean, cov) = covariance(reduced)?;
        let eig = symmetric_eigen(&cov, dim)?;
        let permutation = eigenvalue_allocation(2, &eig.values)?;

        let mut matrix = vec![0.0f32; dim * dim];
        for i in 0..dim {
            for (j, &col) in permutation.iter().enumerate() {
                matrix[i * dim + j] = eig.vector_component(i, col) as f32;
            }
        }

        Ok(Self {
            mean: mean.into_iter().map(|m| m as f32).collect(),
            permutation,
            matrix,
        })
    }

    /// Rebuild from persisted parts
    pub fn from_parts(mean: Vec<f32>, permutation: Vec<usize>, matrix: Vec<f32>) -> Result<Self> {
        let dim = mean.len();
        if permutation.len() != dim || matrix.len() != dim * dim {
            return Err(RetrievalError::StorageError(format!(
                "Rotation parts disagree: mean {}, permutation {}, matrix {}",
                dim,
                permutation.len(),
                matrix.len()
            )));
        }
        let mut seen = vec![false; dim];
        for &p in &permutation {
            if p >= dim || std::mem::replace(&mut seen[p], true) {
                return Err(RetrievalError::StorageError(
                    "Permutation is not a bijection".to_string(),
                ));
            }
        }
        Ok(Self {
            mean,
            permutation,
            matrix,
        })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    pub fn matrix(&self) -> &[f32] {
        &self.matrix
    }

    /// `(p - mean) · matrix`; `p` must be `dim` long
    pub fn apply(&self, p: &[f32]) -> Vec<f32> {
        let dim = self.dim();
        let mut out = vec![0.0f32; dim];
        for (i, (&x, &m)) in p.iter().zip(&self.mean).enumerate() {
            let centered = x - m;
            let row = &self.matrix[i * dim..(i + 1) * dim];
            for (o, &w) in out.iter_mut().zip(row) {
                *o += centered * w;
            }
        }
        out
    }
}

/// Result of [`QuantizationModel::apply`]
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub code: LopqCode,
    /// Present only when a result count was requested
    pub candidates: Option<Vec<Neighbor>>,
}

/// PCA projection, balanced rotation, LOPQ quantizer and corpus codes
#[derive(Debug, Clone)]
pub struct QuantizationModel {
    pub(crate) pca: PcaReduction,
    pub(crate) rotation: BalancedRotation,
    pub(crate) quantizer: LopqQuantizer,
    pub(crate) corpus_codes: Vec<LopqCode>,
    searcher: LopqSearcher,
}

impl QuantizationModel {
    /// Assemble a model, checking that the stages agree on dimensions.
    ///
    /// The corpus codes are indexed into a searcher so [`apply`](Self::apply)
    /// can answer queries against the training corpus.
    pub fn from_parts(
        pca: PcaReduction,
        rotation: BalancedRotation,
        quantizer: LopqQuantizer,
        corpus_codes: Vec<LopqCode>,
    ) -> Result<Self> {
        if pca.n_components() != rotation.dim() || rotation.dim() != quantizer.dim() {
            return Err(RetrievalError::StorageError(format!(
                "Model stages disagree: pca {} -> {}, rotation {}, quantizer {}",
                pca.input_dim(),
                pca.n_components(),
                rotation.dim(),
                quantizer.dim()
            )));
        }
        let fine_len = quantizer.params().m;
        if let Some(bad) = corpus_codes.iter().find(|c| c.fine.len() != fine_len) {
            return Err(RetrievalError::StorageError(format!(
                "Corpus code has {} fine codes, expected {}",
                bad.fine.len(),
                fine_len
            )));
        }

        let searcher = LopqSearcher::from_codes(&corpus_codes);
        Ok(Self {
            pca,
            rotation,
            quantizer,
            corpus_codes,
            searcher,
        })
    }

    /// Dimension of raw input vectors
    pub fn input_dim(&self) -> usize {
        self.pca.input_dim()
    }

    /// Dimension after PCA (the quantized space)
    pub fn reduced_dim(&self) -> usize {
        self.pca.n_components()
    }

    pub fn pca(&self) -> &PcaReduction {
        &self.pca
    }

    pub fn rotation(&self) -> &BalancedRotation {
        &self.rotation
    }

    pub fn quantizer(&self) -> &LopqQuantizer {
        &self.quantizer
    }

    /// Codes assigned to the training corpus, in corpus order
    pub fn corpus_codes(&self) -> &[LopqCode] {
        &self.corpus_codes
    }

    /// Searcher over the training corpus codes
    pub fn corpus_searcher(&self) -> &LopqSearcher {
        &self.searcher
    }

    /// Map a raw vector into the quantized space
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if `vector` is not `input_dim` long.
    pub fn reduce(&self, vector: &[f32]) -> Result<Vec<f32>> {
        let projected = self.pca.transform(vector)?;
        Ok(self.rotation.apply(&projected))
    }

    /// Reduce and encode a raw vector
    pub fn encode(&self, vector: &[f32]) -> Result<LopqCode> {
        self.quantizer.predict(&self.reduce(vector)?)
    }

    /// Encode `vector` and, when `count` is given, search the corpus for that
    /// many candidates.
    pub fn apply(&self, vector: &[f32], count: Option<usize>) -> Result<Applied> {
        self.apply_with(&self.searcher, vector, count)
    }

    /// Like [`apply`](Self::apply) but searching `searcher` instead of the
    /// corpus searcher.
    ///
    /// Candidate distances are quantizer scores. They order results from this
    /// model and are not comparable to exact Euclidean distances.
    pub fn apply_with(&self, searcher: &LopqSearcher, vector: &[f32], count: Option<usize>) -> Result<Applied> {
        let reduced = self.reduce(vector)?;
        let code = self.quantizer.predict(&reduced)?;
        let candidates = match count {
            Some(quota) => Some(searcher.search(&self.quantizer, &reduced, quota)?),
            None => None,
        };
        Ok(Applied { code, candidates })
    }
}
