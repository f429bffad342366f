//! Configuration for training, retrievers and the retrieval service

use crate::{Result, RetrievalError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for [`ModelTrainer`](crate::quantize::ModelTrainer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// PCA output dimension. Must be even, and each half divisible by `m / 2`.
    pub n_components: usize,

    /// Coarse clusters per half. The inverted multi-index has `v * v` cells.
    pub v: usize,

    /// Fine subquantizers in total, half per coarse half
    pub m: usize,

    /// Centroids per fine subquantizer (at most 256)
    pub sub_clusters: usize,

    /// Lloyd iterations for each k-means run
    pub kmeans_iterations: usize,

    /// Share of the reduced corpus held out from quantizer fitting
    pub test_fraction: f32,

    /// Seed for the split shuffle and k-means initialization
    pub seed: u64,

    /// Measure recall on the held-out split after fitting
    pub evaluate_recall: bool,

    /// Largest cutoff reported by recall evaluation
    pub recall_depth: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            n_components: 64,
            v: 16,
            m: 8,
            sub_clusters: 256,
            kmeans_iterations: 25,
            test_fraction: 0.2,
            seed: 42,
            evaluate_recall: true,
            recall_depth: 100,
        }
    }
}

impl TrainerConfig {
    pub fn with_components(mut self, n_components: usize) -> Self {
        self.n_components = n_components;
        self
    }

    pub fn with_coarse_clusters(mut self, v: usize) -> Self {
        self.v = v;
        self
    }

    pub fn with_subquantizers(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn with_sub_clusters(mut self, sub_clusters: usize) -> Self {
        self.sub_clusters = sub_clusters;
        self
    }

    pub fn with_kmeans_iterations(mut self, iterations: usize) -> Self {
        self.kmeans_iterations = iterations;
        self
    }

    pub fn with_test_fraction(mut self, fraction: f32) -> Self {
        self.test_fraction = fraction;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Skip held-out recall measurement (faster training)
    pub fn without_recall(mut self) -> Self {
        self.evaluate_recall = false;
        self
    }

    pub fn with_recall_depth(mut self, depth: usize) -> Self {
        self.recall_depth = depth;
        self
    }
}

/// Which backend a retriever is built on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BackendKind {
    /// Brute-force search over the raw vectors
    #[default]
    Exact,
    /// LOPQ search through a model persisted at `model_dir`
    Approximate { model_dir: PathBuf },
}

/// Per-index retriever settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieverConfig {
    pub index_id: String,

    /// Algorithm name reported on every result
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    pub dimension: usize,

    #[serde(default)]
    pub backend: BackendKind,
}

fn default_algorithm() -> String {
    "exact".to_string()
}

impl RetrieverConfig {
    /// Exact retriever of the given dimension
    pub fn exact(index_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            index_id: index_id.into(),
            algorithm: default_algorithm(),
            dimension,
            backend: BackendKind::Exact,
        }
    }

    /// Approximate retriever backed by the model stored in `model_dir`
    pub fn approximate(index_id: impl Into<String>, dimension: usize, model_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_id: index_id.into(),
            algorithm: "lopq".to_string(),
            dimension,
            backend: BackendKind::Approximate {
                model_dir: model_dir.into(),
            },
        }
    }

    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = algorithm.into();
        self
    }
}

/// Service-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Dimension of exact indexes created for ids without a retriever entry
    pub default_dimension: usize,

    /// Algorithm name used for those default indexes
    pub default_algorithm: String,

    pub retrievers: Vec<RetrieverConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_dimension: 512,
            default_algorithm: default_algorithm(),
            retrievers: Vec::new(),
        }
    }
}

impl ServiceConfig {
    pub fn with_default_dimension(mut self, dimension: usize) -> Self {
        self.default_dimension = dimension;
        self
    }

    pub fn with_retriever(mut self, retriever: RetrieverConfig) -> Self {
        self.retrievers.push(retriever);
        self
    }

    /// Retriever settings registered for `index_id`
    pub fn retriever(&self, index_id: &str) -> Option<&RetrieverConfig> {
        self.retrievers.iter().find(|r| r.index_id == index_id)
    }

    /// Reject dimensions of zero
    pub fn validate(&self) -> Result<()> {
        if self.default_dimension == 0 {
            return Err(RetrievalError::InvalidConfig(
                "default_dimension must be non-zero".to_string(),
            ));
        }
        if let Some(r) = self.retrievers.iter().find(|r| r.dimension == 0) {
            return Err(RetrievalError::InvalidConfig(format!(
                "retriever {} has dimension 0",
                r.index_id
            )));
        }
        Ok(())
    }

    /// Read and validate a JSON configuration file
    ///
    /// # Errors
    ///
    /// `IoError` if the file cannot be read, `StorageError` if it is not valid
    /// configuration JSON, `InvalidConfig` if a dimension is zero.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            RetrievalError::StorageError(format!("Invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }
}
