//! Sources of feature partitions
//!
//! A partition is one batch of vectors produced by an indexing run (typically
//! one video under one feature extractor) together with its metadata. The
//! retrieval core only reads partitions; how they are stored is up to the
//! [`PartitionSource`] implementation.

use crate::{MetadataRecord, Result, RetrievalError};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Listing entry for one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionInfo {
    pub id: u64,
    pub vector_count: usize,
}

/// Vectors of one partition with one metadata record per vector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub vectors: Vec<Vec<f32>>,
    pub metadata: Vec<MetadataRecord>,
}

impl Partition {
    pub fn new(vectors: Vec<Vec<f32>>, metadata: Vec<MetadataRecord>) -> Self {
        Self { vectors, metadata }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Where the refresh path discovers and loads partitions
pub trait PartitionSource: Send + Sync {
    /// Authoritative number of partitions for `index_id`, compared against
    /// the cached count to decide whether a refresh is needed
    fn partition_count(&self, index_id: &str) -> Result<u64>;

    /// Every partition currently known for `index_id`
    fn partitions(&self, index_id: &str) -> Result<Vec<PartitionInfo>>;

    /// Load one partition's vectors and metadata
    fn load(&self, index_id: &str, partition: u64) -> Result<Partition>;
}

/// In-process [`PartitionSource`]
#[derive(Debug, Default)]
pub struct MemoryPartitionSource {
    partitions: RwLock<HashMap<String, BTreeMap<u64, Partition>>>,
    failing: RwLock<HashSet<(String, u64)>>,
    loads: AtomicUsize,
}

impl MemoryPartitionSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a partition
    pub fn insert(&self, index_id: &str, id: u64, partition: Partition) {
        self.partitions
            .write()
            .entry(index_id.to_string())
            .or_default()
            .insert(id, partition);
    }

    pub fn remove(&self, index_id: &str, id: u64) -> Option<Partition> {
        self.partitions.write().get_mut(index_id)?.remove(&id)
    }

    /// Make every future `load` of this partition fail
    pub fn fail_loads(&self, index_id: &str, id: u64) {
        self.failing.write().insert((index_id.to_string(), id));
    }

    /// Total `load` calls served, failed ones included
    pub fn load_calls(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl PartitionSource for MemoryPartitionSource {
    fn partition_count(&self, index_id: &str) -> Result<u64> {
        Ok(self
            .partitions
            .read()
            .get(index_id)
            .map(|p| p.len() as u64)
            .unwrap_or(0))
    }

    fn partitions(&self, index_id: &str) -> Result<Vec<PartitionInfo>> {
        Ok(self
            .partitions
            .read()
            .get(index_id)
            .map(|parts| {
                parts
                    .iter()
                    .map(|(&id, p)| PartitionInfo {
                        id,
                        vector_count: p.len(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn load(&self, index_id: &str, partition: u64) -> Result<Partition> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failing.read().contains(&(index_id.to_string(), partition)) {
            return Err(RetrievalError::PartitionLoadFailure {
                partition,
                reason: "injected failure".to_string(),
            });
        }
        self.partitions
            .read()
            .get(index_id)
            .and_then(|parts| parts.get(&partition))
            .cloned()
            .ok_or_else(|| RetrievalError::PartitionLoadFailure {
                partition,
                reason: format!("partition not found in {}", index_id),
            })
    }
}
