//! Framesift - Core library
//!
//! Nearest-neighbour retrieval over feature vectors extracted from video
//! frames and detected regions.
//!
//! - [`index::VectorIndex`]: exact, append-only brute-force index
//! - [`quantize::QuantizationModel`]: PCA + locally optimized product quantization
//! - [`registry::RetrieverRegistry`]: per-process cache of live indexes
//! - [`refresh::RefreshCoordinator`]: merges new source partitions on demand
//! - [`service::RetrievalService`]: query entry point tying the above together

pub mod config;
pub mod index;
pub mod partition;
pub mod quantize;
pub mod query;
pub mod refresh;
pub mod registry;
pub mod service;
pub mod storage;
pub mod vector;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Result type for retrieval operations
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Metadata attached 1:1 to a stored vector (video/frame/detection identifiers).
pub type MetadataRecord = BTreeMap<String, serde_json::Value>;

/// Error types for retrieval operations
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Shape mismatch: {vectors} vectors but {metadata} metadata records")]
    ShapeMismatch { vectors: usize, metadata: usize },

    #[error("Batch is empty")]
    EmptyBatch,

    #[error("Index is empty")]
    EmptyIndex,

    #[error("Failed to load partition {partition}: {reason}")]
    PartitionLoadFailure { partition: u64, reason: String },

    #[error("Model artifacts incomplete, missing: {}", missing.join(", "))]
    ModelArtifactIncomplete { missing: Vec<String> },

    #[error("Refresh already in progress for index {0}")]
    ConcurrentRefreshConflict(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Partition source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("Compression error: {0}")]
    CompressionError(#[from] storage::compression::CompressionError),
}

/// Coarse classification of a failure, as seen by a query caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Nothing has been indexed yet
    NoData,
    /// The query itself is malformed
    MalformedQuery,
    /// Backing data or model could not be used
    Unavailable,
}

impl RetrievalError {
    /// Classify the error for the caller's benefit
    pub fn class(&self) -> ErrorClass {
        match self {
            RetrievalError::EmptyIndex => ErrorClass::NoData,
            RetrievalError::DimensionMismatch { .. }
            | RetrievalError::ShapeMismatch { .. }
            | RetrievalError::EmptyBatch
            | RetrievalError::InvalidQuery(_) => ErrorClass::MalformedQuery,
            _ => ErrorClass::Unavailable,
        }
    }
}

/// A neighbour found by a backend: row offset plus distance or score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Row offset in the owning index
    pub row: usize,
    /// Euclidean distance (exact) or quantizer score (approximate)
    pub distance: f32,
    /// 1-based rank in the result list
    pub rank: usize,
}

// Re-export commonly used items
pub use config::{BackendKind, RetrieverConfig, ServiceConfig, TrainerConfig};
pub use index::{ApproximateIndex, Backend, LoadedRange, VectorIndex};
pub use partition::{MemoryPartitionSource, Partition, PartitionInfo, PartitionSource};
pub use quantize::{ModelTrainer, QuantizationModel, TrainingReport};
pub use query::{QueryRequest, QueryResponse, QueryResult, QueryStatus, ResultKind};
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use registry::{RetrieverEntry, RetrieverRegistry};
pub use service::RetrievalService;
pub use storage::ModelStore;
pub use vector::{l2_distance, l2_distance_squared};
