//! Small dense linear algebra for model training
//!
//! Covariance estimation and a cyclic Jacobi solver for symmetric
//! eigen-decomposition. Everything is accumulated in f64; matrices are
//! row-major `Vec<f64>` of `n × n`.

use crate::{RetrievalError, Result};

const MAX_SWEEPS: usize = 100;
const CONVERGENCE: f64 = 1e-22;

/// Eigen-decomposition of a symmetric matrix
#[derive(Debug, Clone)]
pub struct SymmetricEigen {
    /// Matrix order
    pub n: usize,
    /// Eigenvalues in ascending order
    pub values: Vec<f64>,
    /// Row-major `n × n`; column `j` is the eigenvector of `values[j]`
    pub vectors: Vec<f64>,
}

impl SymmetricEigen {
    /// Component `row` of eigenvector `col`
    #[inline]
    pub fn vector_component(&self, row: usize, col: usize) -> f64 {
        self.vectors[row * self.n + col]
    }
}

/// Sample mean and covariance (n - 1 denominator) of a set of rows.
///
/// # Errors
///
/// `Training` when fewer than two rows are given, `DimensionMismatch` when
/// rows disagree in length.
pub fn covariance<V: AsRef<[f32]>>(rows: &[V]) -> Result<(Vec<f64>, Vec<f64>)> {
    if rows.len() < 2 {
        return Err(RetrievalError::Training(format!(
            "Covariance needs at least 2 samples, got {}",
            rows.len()
        )));
    }

    let dim = rows[0].as_ref().len();
    let n = rows.len() as f64;

    let mut mean = vec![0.0f64; dim];
    for row in rows {
        let row = row.as_ref();
        if row.len() != dim {
            return Err(RetrievalError::DimensionMismatch {
                expected: dim,
                actual: row.len(),
            });
        }
        for (m, &x) in mean.iter_mut().zip(row) {
            *m += x as f64;
        }
    }
    for m in &mut mean {
        *m /= n;
    }

    let mut cov = vec![0.0f64; dim * dim];
    let mut centered = vec![0.0f64; dim];
    for row in rows {
        for (c, (&x, &m)) in centered.iter_mut().zip(row.as_ref().iter().zip(&mean)) {
            *c = x as f64 - m;
        }
        // Upper triangle only, mirrored below
        for i in 0..dim {
            let ci = centered[i];
            if ci == 0.0 {
                continue;
            }
            for j in i..dim {
                cov[i * dim + j] += ci * centered[j];
            }
        }
    }
    for i in 0..dim {
        for j in i..dim {
            let value = cov[i * dim + j] / (n - 1.0);
            cov[i * dim + j] = value;
            cov[j * dim + i] = value;
        }
    }

    Ok((mean, cov))
}

/// Eigen-decomposition of a symmetric `n × n` matrix by cyclic Jacobi rotations.
///
/// # Errors
///
/// `Training` if the matrix is not square or contains non-finite values.
pub fn symmetric_eigen(matrix: &[f64], n: usize) -> Result<SymmetricEigen> {
    if matrix.len() != n * n {
        return Err(RetrievalError::Training(format!(
            "Expected {}x{} matrix, got {} values",
            n,
            n,
            matrix.len()
        )));
    }
    if matrix.iter().any(|x| !x.is_finite()) {
        return Err(RetrievalError::Training(
            "Matrix contains non-finite values".to_string(),
        ));
    }

    let mut a = matrix.to_vec();
    let mut v = vec![0.0f64; n * n];
    for i in 0..n {
        v[i * n + i] = 1.0;
    }

    let total: f64 = a.iter().map(|x| x * x).sum();

    for _ in 0..MAX_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|p| (p + 1..n).map(move |q| (p, q)))
            .map(|(p, q)| a[p * n + q] * a[p * n + q])
            .sum();
        if off <= CONVERGENCE * total.max(f64::MIN_POSITIVE) {
            break;
        }

        for p in 0..n {
            for q in p + 1..n {
                let apq = a[p * n + q];
                if apq == 0.0 {
                    continue;
                }
                let app = a[p * n + p];
                let aqq = a[q * n + q];

                let theta = (aqq - app) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                // A <- A J
                for k in 0..n {
                    let akp = a[k * n + p];
                    let akq = a[k * n + q];
                    a[k * n + p] = c * akp - s * akq;
                    a[k * n + q] = s * akp + c * akq;
                }
                // A <- J^T A
                for k in 0..n {
                    let apk = a[p * n + k];
                    let aqk = a[q * n + k];
                    a[p * n + k] = c * apk - s * aqk;
                    a[q * n + k] = s * apk + c * aqk;
                }
                // V <- V J
                for k in 0..n {
                    let vkp = v[k * n + p];
                    let vkq = v[k * n + q];
                    v[k * n + p] = c * vkp - s * vkq;
                    v[k * n + q] = s * vkp + c * vkq;
                }
            }
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| a[i * n + i].total_cmp(&a[j * n + j]));

    let values = order.iter().map(|&i| a[i * n + i]).collect();
    let mut vectors = vec![0.0f64; n * n];
    for (new_col, &old_col) in order.iter().enumerate() {
        for row in 0..n {
            vectors[row * n + new_col] = v[row * n + old_col];
        }
    }

    Ok(SymmetricEigen { n, values, vectors })
}
