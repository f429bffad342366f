//! Vector index implementations
//!
//! - [`VectorIndex`]: exact brute-force search over an append-only row matrix
//! - [`ApproximateIndex`]: rows encoded through a trained
//!   [`QuantizationModel`](crate::quantize::QuantizationModel) and searched
//!   with the LOPQ inverted multi-index
//!
//! Both are wrapped by [`Backend`] so the registry can hold either one per
//! index identifier.

pub mod approximate;
pub mod backend;
pub mod flat;

pub use approximate::ApproximateIndex;
pub use backend::Backend;
pub use flat::{LoadedRange, VectorIndex};
