//! Growable row-major matrix
//!
//! Rows are stored back to back in a single `Vec<f32>`. Appending relies on
//! `Vec`'s geometric growth, so adding a row costs amortized O(dim) rather than
//! a full copy of the matrix.

use serde::{Deserialize, Serialize};

/// Dense, append-only matrix of `rows × dim` f32 values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowMatrix {
    dim: usize,
    data: Vec<f32>,
}

impl RowMatrix {
    /// Create an empty matrix whose rows have `dim` columns
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    /// Create an empty matrix with room for `rows` rows
    pub fn with_capacity(dim: usize, rows: usize) -> Self {
        Self {
            dim,
            data: Vec::with_capacity(dim * rows),
        }
    }

    /// Build a matrix from row vectors. All rows must have length `dim`.
    pub fn from_rows<V: AsRef<[f32]>>(dim: usize, rows: &[V]) -> Self {
        let mut matrix = Self::with_capacity(dim, rows.len());
        matrix.extend_rows(rows);
        matrix
    }

    /// Number of columns
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of rows
    #[inline]
    pub fn rows(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow row `i`
    ///
    /// # Panics
    ///
    /// Panics if `i >= rows()`.
    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        let start = i * self.dim;
        &self.data[start..start + self.dim]
    }

    /// Iterate rows in order
    pub fn iter_rows(&self) -> impl ExactSizeIterator<Item = &[f32]> + '_ {
        // chunks_exact on an empty dim would panic
        self.data.chunks_exact(self.dim.max(1))
    }

    /// Append one row. Callers check the length; mismatches are a logic error.
    #[inline]
    pub fn push_row(&mut self, row: &[f32]) {
        debug_assert_eq!(row.len(), self.dim);
        self.data.extend_from_slice(row);
    }

    /// Append several rows, reserving once for the whole batch
    pub fn extend_rows<V: AsRef<[f32]>>(&mut self, rows: &[V]) {
        self.data.reserve(rows.len() * self.dim);
        for row in rows {
            self.push_row(row.as_ref());
        }
    }

    /// Raw row-major storage
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Allocated capacity, in rows
    pub fn capacity_rows(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.capacity() / self.dim
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_read_rows() {
        let mut m = RowMatrix::new(3);
        assert!(m.is_empty());
        m.push_row(&[1.0, 2.0, 3.0]);
        m.push_row(&[4.0, 5.0, 6.0]);

        assert_eq!(m.rows(), 2);
        assert_eq!(m.row(1), &[4.0, 5.0, 6.0]);
        assert_eq!(m.iter_rows().count(), 2);
    }

    #[test]
    fn test_extend_rows_reserves_geometrically() {
        let mut m = RowMatrix::new(4);
        let batch: Vec<Vec<f32>> = (0..10).map(|i| vec![i as f32; 4]).collect();

        for _ in 0..20 {
            m.extend_rows(&batch);
        }

        assert_eq!(m.rows(), 200);
        assert!(m.capacity_rows() >= 200);
        assert_eq!(m.row(199), &[9.0; 4]);
    }

    #[test]
    fn test_from_rows() {
        let m = RowMatrix::from_rows(2, &[vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(m.as_slice(), &[1.0, 0.0, 0.0, 1.0]);
    }
}
