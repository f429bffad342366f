//! Locally optimized product quantization (LOPQ)
//!
//! A vector of dimension `D` is split into two halves. Each half has:
//!
//! 1. a coarse quantizer of `V` centroids (so the pair of halves indexes
//!    `V × V` cells, an inverted multi-index),
//! 2. per coarse cell, a local mean and rotation fitted to the residuals that
//!    fall in that cell, with dimensions permuted by eigenvalue allocation,
//! 3. `M / 2` fine subquantizers of `sub_clusters` centroids over the rotated
//!    residual.
//!
//! ```text
//! x = [ x0 | x1 ]
//!        |    |
//!   coarse c0  coarse c1          -> coarse code (c0, c1)
//!        |    |
//!   R0[c0](x0 - C0[c0] - mu0[c0]) -> M/2 fine codes
//!   R1[c1](x1 - C1[c1] - mu1[c1]) -> M/2 fine codes
//! ```

use crate::quantize::allocation::eigenvalue_allocation;
use crate::quantize::kmeans::{kmeans, nearest_centroid};
use crate::vector::linalg::{covariance, symmetric_eigen};
use crate::vector::ops::l2_distance_squared_unchecked;
use crate::{Result, RetrievalError};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Largest fine codebook representable by a `u8` code
pub const MAX_SUB_CLUSTERS: usize = 256;

/// Code assigned to a vector: coarse cell pair plus fine subquantizer indices
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LopqCode {
    pub coarse: (u32, u32),
    pub fine: Vec<u8>,
}

/// Quantizer shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LopqParams {
    /// Coarse clusters per half
    pub v: usize,
    /// Total fine subquantizers (split evenly between halves)
    pub m: usize,
    /// Centroids per fine subquantizer
    pub sub_clusters: usize,
    /// Lloyd iterations for every k-means run
    pub kmeans_iterations: usize,
}

impl LopqParams {
    /// Validate against the dimension of the vectors to be quantized
    pub fn validate(&self, dim: usize) -> Result<()> {
        if dim == 0 || dim % 2 != 0 {
            return Err(RetrievalError::Training(format!(
                "Quantized dimension must be even and non-zero, got {}",
                dim
            )));
        }
        if self.v == 0 {
            return Err(RetrievalError::Training("V must be > 0".to_string()));
        }
        if self.m < 2 || self.m % 2 != 0 {
            return Err(RetrievalError::Training(format!(
                "M must be even and >= 2, got {}",
                self.m
            )));
        }
        if (dim / 2) % (self.m / 2) != 0 {
            return Err(RetrievalError::Training(format!(
                "Half dimension {} must be divisible by M/2 = {}",
                dim / 2,
                self.m / 2
            )));
        }
        if self.sub_clusters == 0 || self.sub_clusters > MAX_SUB_CLUSTERS {
            return Err(RetrievalError::Training(format!(
                "sub_clusters must be in 1..={}, got {}",
                MAX_SUB_CLUSTERS, self.sub_clusters
            )));
        }
        Ok(())
    }
}

/// Mean and rotation applied to residuals inside one coarse cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LocalRotation {
    mean: Vec<f32>,
    /// Row-major `d × d`; output dim `j` is `sum_i centered[i] * rotation[i * d + j]`
    rotation: Vec<f32>,
}

impl LocalRotation {
    fn identity(dim: usize, mean: Vec<f32>) -> Self {
        let mut rotation = vec![0.0; dim * dim];
        for i in 0..dim {
            rotation[i * dim + i] = 1.0;
        }
        Self { mean, rotation }
    }

    fn fit(residuals: &[Vec<f32>], dim: usize, segments: usize) -> Result<Self> {
        match residuals.len() {
            0 => return Ok(Self::identity(dim, vec![0.0; dim])),
            1 => return Ok(Self::identity(dim, residuals[0].clone())),
            _ => {}
        }

        let (mean, cov) = covariance(residuals)?;
        let eig = symmetric_eigen(&cov, dim)?;
        let permutation = eigenvalue_allocation(segments, &eig.values)?;

        let mut rotation = vec![0.0f32; dim * dim];
        for i in 0..dim {
            for (j, &col) in permutation.iter().enumerate() {
                rotation[i * dim + j] = eig.vector_component(i, col) as f32;
            }
        }

        Ok(Self {
            mean: mean.into_iter().map(|m| m as f32).collect(),
            rotation,
        })
    }

    fn apply(&self, residual: &[f32]) -> Vec<f32> {
        let dim = self.mean.len();
        let mut out = vec![0.0f32; dim];
        for (i, (&r, &m)) in residual.iter().zip(&self.mean).enumerate() {
            let centered = r - m;
            if centered == 0.0 {
                continue;
            }
            let row = &self.rotation[i * dim..(i + 1) * dim];
            for (o, &w) in out.iter_mut().zip(row) {
                *o += centered * w;
            }
        }
        out
    }
}

/// Coarse centroids, local rotations and fine codebooks for one half
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct HalfQuantizer {
    coarse: Vec<Vec<f32>>,
    rotations: Vec<LocalRotation>,
    /// `[segment][centroid][segment_dim]`
    codebooks: Vec<Vec<Vec<f32>>>,
}

impl HalfQuantizer {
    fn fit(data: &[Vec<f32>], params: &LopqParams, rng: &mut StdRng) -> Result<Self> {
        let dim = data[0].len();
        let segments = params.m / 2;
        let segment_dim = dim / segments;

        let coarse = kmeans(data, params.v, params.kmeans_iterations, rng)?;

        let assignments: Vec<usize> = data.iter().map(|x| nearest_centroid(&coarse, x).0).collect();
        let residuals: Vec<Vec<f32>> = data
            .iter()
            .zip(&assignments)
            .map(|(x, &c)| x.iter().zip(&coarse[c]).map(|(a, b)| a - b).collect())
            .collect();

        let mut rotations = Vec::with_capacity(coarse.len());
        for cell in 0..coarse.len() {
            let cell_residuals: Vec<Vec<f32>> = residuals
                .iter()
                .zip(&assignments)
                .filter(|(_, &c)| c == cell)
                .map(|(r, _)| r.clone())
                .collect();
            rotations.push(LocalRotation::fit(&cell_residuals, dim, segments)?);
        }

        let projected: Vec<Vec<f32>> = residuals
            .iter()
            .zip(&assignments)
            .map(|(r, &c)| rotations[c].apply(r))
            .collect();

        let mut codebooks = Vec::with_capacity(segments);
        for s in 0..segments {
            let start = s * segment_dim;
            let slices: Vec<&[f32]> = projected.iter().map(|y| &y[start..start + segment_dim]).collect();
            codebooks.push(kmeans(&slices, params.sub_clusters, params.kmeans_iterations, rng)?);
        }

        Ok(Self {
            coarse,
            rotations,
            codebooks,
        })
    }

    fn dim(&self) -> usize {
        self.coarse.first().map(|c| c.len()).unwrap_or(0)
    }

    fn segment_dim(&self) -> usize {
        self.dim() / self.codebooks.len()
    }

    fn coarse_distances(&self, x: &[f32]) -> Vec<f32> {
        self.coarse
            .iter()
            .map(|c| l2_distance_squared_unchecked(x, c))
            .collect()
    }

    /// Residual of `x` relative to `cell`, centered and rotated
    fn project(&self, x: &[f32], cell: usize) -> Vec<f32> {
        let residual: Vec<f32> = x.iter().zip(&self.coarse[cell]).map(|(a, b)| a - b).collect();
        self.rotations[cell].apply(&residual)
    }

    fn encode_fine(&self, projected: &[f32]) -> Vec<u8> {
        let sd = self.segment_dim();
        self.codebooks
            .iter()
            .enumerate()
            .map(|(s, codebook)| nearest_centroid(codebook, &projected[s * sd..(s + 1) * sd]).0 as u8)
            .collect()
    }

    /// Asymmetric squared distance between a projected query and fine codes
    fn fine_distance(&self, projected: &[f32], fine: &[u8]) -> f32 {
        let sd = self.segment_dim();
        self.codebooks
            .iter()
            .zip(fine)
            .enumerate()
            .map(|(s, (codebook, &code))| {
                l2_distance_squared_unchecked(&projected[s * sd..(s + 1) * sd], &codebook[code as usize])
            })
            .sum()
    }
}

/// Query residuals for one `(c0, c1)` cell, reused across that cell's entries
pub struct CellQuery {
    projected: [Vec<f32>; 2],
}

/// Trained LOPQ quantizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LopqQuantizer {
    params: LopqParams,
    dim: usize,
    halves: Vec<HalfQuantizer>,
}

impl LopqQuantizer {
    /// Fit coarse and fine quantizers on `data`
    ///
    /// # Errors
    ///
    /// `Training` for invalid parameters or empty data, `DimensionMismatch`
    /// for ragged input.
    pub fn fit(data: &[Vec<f32>], params: LopqParams, rng: &mut StdRng) -> Result<Self> {
        let dim = data
            .first()
            .map(|v| v.len())
            .ok_or_else(|| RetrievalError::Training("Empty training data".to_string()))?;
        params.validate(dim)?;
        if let Some(bad) = data.iter().find(|v| v.len() != dim) {
            return Err(RetrievalError::DimensionMismatch {
                expected: dim,
                actual: bad.len(),
            });
        }

        let half = dim / 2;
        let mut halves = Vec::with_capacity(2);
        for h in 0..2 {
            let part: Vec<Vec<f32>> = data.iter().map(|x| x[h * half..(h + 1) * half].to_vec()).collect();
            halves.push(HalfQuantizer::fit(&part, &params, rng)?);
            debug!(half = h, cells = halves[h].coarse.len(), "fitted LOPQ half");
        }

        Ok(Self { params, dim, halves })
    }

    pub fn params(&self) -> &LopqParams {
        &self.params
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of coarse centroids actually fitted per half
    pub fn coarse_clusters(&self, half: usize) -> usize {
        self.halves[half].coarse.len()
    }

    /// Assign a code to `x`
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if `x` is not `dim` long.
    pub fn predict(&self, x: &[f32]) -> Result<LopqCode> {
        self.check_dim(x)?;
        let half = self.dim / 2;

        let mut cells = [0usize; 2];
        let mut fine = Vec::with_capacity(self.params.m);
        for (h, quantizer) in self.halves.iter().enumerate() {
            let part = &x[h * half..(h + 1) * half];
            let (cell, _) = nearest_centroid(&quantizer.coarse, part);
            cells[h] = cell;
            fine.extend(quantizer.encode_fine(&quantizer.project(part, cell)));
        }

        Ok(LopqCode {
            coarse: (cells[0] as u32, cells[1] as u32),
            fine,
        })
    }

    /// Squared distances from each half of `x` to that half's coarse centroids
    pub fn coarse_distances(&self, x: &[f32]) -> Result<[Vec<f32>; 2]> {
        self.check_dim(x)?;
        let half = self.dim / 2;
        Ok([
            self.halves[0].coarse_distances(&x[..half]),
            self.halves[1].coarse_distances(&x[half..]),
        ])
    }

    /// Prepare the query for scoring entries of one coarse cell
    pub fn cell_query(&self, x: &[f32], coarse: (u32, u32)) -> CellQuery {
        let half = self.dim / 2;
        CellQuery {
            projected: [
                self.halves[0].project(&x[..half], coarse.0 as usize),
                self.halves[1].project(&x[half..], coarse.1 as usize),
            ],
        }
    }

    /// Approximate squared distance between the query and an encoded entry
    /// of the same cell. Only meaningful for ranking.
    pub fn fine_score(&self, query: &CellQuery, fine: &[u8]) -> f32 {
        let per_half = self.params.m / 2;
        self.halves[0].fine_distance(&query.projected[0], &fine[..per_half])
            + self.halves[1].fine_distance(&query.projected[1], &fine[per_half..])
    }

    /// Reconstruct an approximation of the vector behind `code`
    pub fn reconstruct(&self, code: &LopqCode) -> Vec<f32> {
        let per_half = self.params.m / 2;
        let cells = [code.coarse.0 as usize, code.coarse.1 as usize];
        let mut out = Vec::with_capacity(self.dim);

        for (h, quantizer) in self.halves.iter().enumerate() {
            let fine = &code.fine[h * per_half..(h + 1) * per_half];
            let projected: Vec<f32> = quantizer
                .codebooks
                .iter()
                .zip(fine)
                .flat_map(|(codebook, &c)| codebook[c as usize].iter().copied())
                .collect();

            // Rotation is orthonormal: undo it with the transpose
            let local = &quantizer.rotations[cells[h]];
            let d = local.mean.len();
            for i in 0..d {
                let row = &local.rotation[i * d..(i + 1) * d];
                let unrotated: f32 = row.iter().zip(&projected).map(|(w, y)| w * y).sum();
                out.push(unrotated + local.mean[i] + quantizer.coarse[cells[h]][i]);
            }
        }

        out
    }

    fn check_dim(&self, x: &[f32]) -> Result<()> {
        if x.len() != self.dim {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dim,
                actual: x.len(),
            });
        }
        Ok(())
    }
}
