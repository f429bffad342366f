//! Approximate search through locally optimized product quantization
//!
//! Training ([`ModelTrainer`]) produces a [`QuantizationModel`]: a PCA
//! projection, a variance-balancing rotation and an [`LopqQuantizer`]. The
//! model encodes vectors into [`LopqCode`]s, which an [`LopqSearcher`] indexes
//! for multi-sequence search.

pub mod allocation;
pub mod kmeans;
pub mod lopq;
pub mod model;
pub mod pca;
pub mod searcher;
pub mod trainer;

pub use allocation::eigenvalue_allocation;
pub use lopq::{LopqCode, LopqParams, LopqQuantizer};
pub use model::{Applied, BalancedRotation, QuantizationModel};
pub use pca::PcaReduction;
pub use searcher::LopqSearcher;
pub use trainer::{ModelTrainer, RecallAt, TrainingReport};
