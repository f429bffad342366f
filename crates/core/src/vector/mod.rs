//! Vector operations and numeric building blocks
//!
//! - [`ops`]: checked scalar distance and arithmetic helpers
//! - [`simd`]: `pulp`-dispatched kernels used by the brute-force scan
//! - [`matrix`]: growable row-major matrix backing the exact index
//! - [`linalg`]: covariance and symmetric eigen-decomposition for training
//!
//! # Usage
//!
//! ```
//! use framesift_core::vector::{l2_distance, RowMatrix};
//!
//! let mut rows = RowMatrix::new(2);
//! rows.push_row(&[0.0, 0.0]);
//! rows.push_row(&[3.0, 4.0]);
//!
//! let d = l2_distance(rows.row(0), rows.row(1)).unwrap();
//! assert!((d - 5.0).abs() < 1e-6);
//! ```

pub mod linalg;
pub mod matrix;
pub mod ops;
pub mod simd;

pub use matrix::RowMatrix;
pub use ops::{dot_product, l2_distance, l2_distance_squared};
pub use simd::{dot_product_simd, l2_distance_squared_simd};
