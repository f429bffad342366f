//! Principal component analysis

use crate::vector::linalg::{covariance, symmetric_eigen};
use crate::vector::simd::dot_product_simd;
use crate::{Result, RetrievalError};
use serde::{Deserialize, Serialize};

/// Linear projection onto the top principal components of a corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaReduction {
    /// Corpus mean in the input space
    mean: Vec<f32>,
    /// `n_components` rows of length `input_dim`, by decreasing variance
    components: Vec<Vec<f32>>,
    /// Variance captured by each component
    explained_variance: Vec<f32>,
}

impl PcaReduction {
    /// Fit the projection on `data`, keeping `n_components` dimensions.
    ///
    /// # Errors
    ///
    /// `Training` for fewer than two rows or `n_components` outside
    /// `1..=input_dim`; `DimensionMismatch` for ragged input.
    pub fn fit<V: AsRef<[f32]>>(data: &[V], n_components: usize) -> Result<Self> {
        let input_dim = data.first().map(|v| v.as_ref().len()).unwrap_or(0);
        if n_components == 0 || n_components > input_dim {
            return Err(RetrievalError::Training(format!(
                "n_components must be in 1..={}, got {}",
                input_dim, n_components
            )));
        }

        let (mean, cov) = covariance(data)?;
        let eig = symmetric_eigen(&cov, input_dim)?;

        // Eigenvalues are ascending; walk from the top
        let mut components = Vec::with_capacity(n_components);
        let mut explained_variance = Vec::with_capacity(n_components);
        for col in (input_dim - n_components..input_dim).rev() {
            components.push(
                (0..input_dim)
                    .map(|row| eig.vector_component(row, col) as f32)
                    .collect(),
            );
            explained_variance.push(eig.values[col].max(0.0) as f32);
        }

        Ok(Self {
            mean: mean.into_iter().map(|m| m as f32).collect(),
            components,
            explained_variance,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.mean.len()
    }

    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    pub fn explained_variance(&self) -> &[f32] {
        &self.explained_variance
    }

    /// Project a vector into component space
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if `vector` is not `input_dim` long.
    pub fn transform(&self, vector: &[f32]) -> Result<Vec<f32>> {
        if vector.len() != self.input_dim() {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.input_dim(),
                actual: vector.len(),
            });
        }

        let centered: Vec<f32> = vector.iter().zip(&self.mean).map(|(x, m)| x - m).collect();
        Ok(self
            .components
            .iter()
            .map(|component| dot_product_simd(component, &centered))
            .collect())
    }
}
