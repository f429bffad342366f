//! Eigenvalue allocation
//!
//! Product quantizers encode each subspace independently, so a subspace that
//! receives most of the variance ends up with too little resolution. The
//! greedy allocation walks eigenvalues from largest to smallest and gives each
//! one to the non-full bucket with the smallest running product of
//! eigenvalues (summed in log space).

use crate::{Result, RetrievalError};

/// Permutation of `eigenvalues.len()` dimensions into `num_buckets` equal
/// buckets with balanced eigenvalue products.
///
/// The result lists bucket 0's dimensions, then bucket 1's, and so on.
///
/// # Errors
///
/// `Training` when the dimension count is not divisible by `num_buckets`.
///
/// # Examples
///
/// ```
/// use framesift_core::quantize::allocation::eigenvalue_allocation;
///
/// let perm = eigenvalue_allocation(2, &[1.0, 2.0, 3.0, 4.0]).unwrap();
/// // Largest (4.0, dim 3) opens bucket 0, next (3.0, dim 2) opens bucket 1
/// assert_eq!(perm[0], 3);
/// assert_eq!(perm[2], 2);
/// ```
pub fn eigenvalue_allocation(num_buckets: usize, eigenvalues: &[f64]) -> Result<Vec<usize>> {
    let dim = eigenvalues.len();
    if num_buckets == 0 || dim % num_buckets != 0 {
        return Err(RetrievalError::Training(format!(
            "Cannot split {} dimensions into {} equal buckets",
            dim, num_buckets
        )));
    }
    let per_bucket = dim / num_buckets;

    // Logs need strictly positive values
    let min = eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
    let shift = if min <= 0.0 { 1.0 - min } else { 0.0 };
    let log_eigs: Vec<f64> = eigenvalues.iter().map(|&e| (e + shift).abs().log2()).collect();

    let mut order: Vec<usize> = (0..dim).collect();
    order.sort_by(|&a, &b| eigenvalues[b].total_cmp(&eigenvalues[a]));

    let mut product = vec![0.0f64; num_buckets];
    let mut buckets: Vec<Vec<usize>> = vec![Vec::with_capacity(per_bucket); num_buckets];

    for idx in order {
        let bucket = (0..num_buckets)
            .filter(|&b| buckets[b].len() < per_bucket)
            .min_by(|&a, &b| product[a].total_cmp(&product[b]))
            .ok_or_else(|| RetrievalError::Training("All buckets full".to_string()))?;

        product[bucket] += log_eigs[idx];
        buckets[bucket].push(idx);
    }

    Ok(buckets.into_iter().flatten().collect())
}
