//! Scalar vector operations
//!
//! Checked entry points return `DimensionMismatch` instead of panicking; the
//! `_unchecked` helpers are for hot loops whose dimensions were validated once
//! up front.

use crate::{RetrievalError, Result};

/// Computes the Euclidean (L2) distance between two vectors.
///
/// # Errors
///
/// Returns `RetrievalError::DimensionMismatch` if the vectors have different dimensions.
///
/// # Examples
///
/// ```
/// use framesift_core::vector::ops::l2_distance;
///
/// let a = vec![0.0, 0.0];
/// let b = vec![3.0, 4.0];
/// let distance = l2_distance(&a, &b).unwrap();
/// assert!((distance - 5.0).abs() < 1e-6);
/// ```
#[inline]
pub fn l2_distance(a: &[f32], b: &[f32]) -> Result<f32> {
    Ok(l2_distance_squared(a, b)?.sqrt())
}

/// Computes the squared Euclidean distance between two vectors.
///
/// Cheaper than [`l2_distance`] and order-preserving, so ranking code uses it.
///
/// # Errors
///
/// Returns `RetrievalError::DimensionMismatch` if the vectors have different dimensions.
#[inline]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dims(a.len(), b.len())?;
    Ok(l2_distance_squared_unchecked(a, b))
}

/// Computes the dot product of two vectors.
///
/// # Errors
///
/// Returns `RetrievalError::DimensionMismatch` if the vectors have different dimensions.
///
/// # Examples
///
/// ```
/// use framesift_core::vector::ops::dot_product;
///
/// let a = vec![1.0, 2.0, 3.0];
/// let b = vec![4.0, 5.0, 6.0];
/// let product = dot_product(&a, &b).unwrap();
/// assert!((product - 32.0).abs() < 1e-6);
/// ```
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dims(a.len(), b.len())?;
    Ok(dot_product_unchecked(a, b))
}

#[inline]
pub(crate) fn l2_distance_squared_unchecked(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

#[inline]
fn dot_product_unchecked(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
fn check_dims(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(RetrievalError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-6;

    #[test]
    fn test_l2_distance_basic() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![4.0, 6.0, 3.0];
        assert!((l2_distance(&a, &b).unwrap() - 5.0).abs() < EPSILON);
        assert!((l2_distance_squared(&a, &b).unwrap() - 25.0).abs() < EPSILON);
    }

    #[test]
    fn test_l2_distance_identical() {
        let a = vec![0.5, -0.25, 8.0];
        assert_eq!(l2_distance(&a, &a).unwrap(), 0.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 2.0, 3.0];
        assert!(matches!(
            l2_distance(&a, &b),
            Err(RetrievalError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        assert!(dot_product(&a, &b).is_err());
    }
}
