//! Registry of live retrievers
//!
//! One [`RetrieverEntry`] exists per index identifier for the lifetime of the
//! registry. Entries are shared through `Arc` so queries and refreshes on the
//! same id see one backend.
//!
//! Locking inside an entry:
//!
//! - `backend` is a `RwLock`: queries share the read side, every appended
//!   batch takes the write side once, so readers observe whole batches only
//! - `refresh` is a `Mutex` held for the whole refresh, so at most one refresh
//!   per id runs at a time

use crate::config::{BackendKind, RetrieverConfig, ServiceConfig};
use crate::index::{ApproximateIndex, Backend, LoadedRange, VectorIndex};
use crate::quantize::QuantizationModel;
use crate::storage::ModelStore;
use crate::{Neighbor, Result, RetrievalError};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Bookkeeping owned by the refresh path
#[derive(Debug, Default)]
pub struct RefreshState {
    /// Authoritative partition count seen at the last completed refresh;
    /// `None` until the first one
    pub(crate) last_seen_count: Option<u64>,
    /// Rows occupied by every merged partition
    pub(crate) loaded: BTreeMap<u64, LoadedRange>,
    /// Partitions whose load failed; skipped by later refreshes
    pub(crate) failed: BTreeSet<u64>,
}

/// One live index and its refresh state
#[derive(Debug)]
pub struct RetrieverEntry {
    index_id: String,
    algorithm: String,
    backend: RwLock<Backend>,
    refresh: Mutex<RefreshState>,
}

impl RetrieverEntry {
    pub fn new(index_id: impl Into<String>, algorithm: impl Into<String>, backend: Backend) -> Self {
        Self {
            index_id: index_id.into(),
            algorithm: algorithm.into(),
            backend: RwLock::new(backend),
            refresh: Mutex::new(RefreshState::default()),
        }
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    /// Algorithm name reported on results
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Shared read access to the backend
    pub fn backend(&self) -> RwLockReadGuard<'_, Backend> {
        self.backend.read()
    }

    pub(crate) fn backend_lock(&self) -> &RwLock<Backend> {
        &self.backend
    }

    pub(crate) fn try_lock_refresh(&self) -> Option<MutexGuard<'_, RefreshState>> {
        self.refresh.try_lock()
    }

    pub(crate) fn lock_refresh(&self) -> MutexGuard<'_, RefreshState> {
        self.refresh.lock()
    }

    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.backend.read().nearest(query, k)
    }

    /// Number of rows currently searchable
    pub fn len(&self) -> usize {
        self.backend.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count recorded by the last refresh. Waits for an in-flight refresh.
    pub fn last_seen_count(&self) -> Option<u64> {
        self.refresh.lock().last_seen_count
    }

    /// Merged partitions and their row ranges, by partition id
    pub fn loaded_ranges(&self) -> Vec<(u64, LoadedRange)> {
        self.refresh.lock().loaded.iter().map(|(&id, &r)| (id, r)).collect()
    }

    /// Partitions that failed to load and will not be attempted again
    pub fn failed_partitions(&self) -> Vec<u64> {
        self.refresh.lock().failed.iter().copied().collect()
    }
}

/// Cache of retrievers keyed by index id
#[derive(Debug, Default)]
pub struct RetrieverRegistry {
    config: ServiceConfig,
    entries: RwLock<HashMap<String, Arc<RetrieverEntry>>>,
    models: Mutex<HashMap<PathBuf, Arc<QuantizationModel>>>,
}

impl RetrieverRegistry {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            models: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The entry for `index_id`, created on first use.
    ///
    /// Repeated calls return the same entry. Ids with a [`RetrieverConfig`]
    /// get the configured backend; others get an exact index of the default
    /// dimension.
    ///
    /// # Errors
    ///
    /// Model loading errors for approximate retrievers.
    pub fn get_or_create(&self, index_id: &str) -> Result<Arc<RetrieverEntry>> {
        if let Some(entry) = self.entries.read().get(index_id) {
            return Ok(Arc::clone(entry));
        }

        let entry = self.build_entry(index_id)?;
        Ok(self.insert(entry))
    }

    /// Register a prebuilt entry. If the id is already present the existing
    /// entry wins and is returned.
    pub fn insert(&self, entry: RetrieverEntry) -> Arc<RetrieverEntry> {
        let mut entries = self.entries.write();
        Arc::clone(
            entries
                .entry(entry.index_id().to_string())
                .or_insert_with(|| Arc::new(entry)),
        )
    }

    pub fn get(&self, index_id: &str) -> Option<Arc<RetrieverEntry>> {
        self.entries.read().get(index_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn build_entry(&self, index_id: &str) -> Result<RetrieverEntry> {
        let dimension = self
            .config
            .retriever(index_id)
            .map_or(self.config.default_dimension, |r| r.dimension);
        if dimension == 0 {
            return Err(RetrievalError::InvalidConfig(format!(
                "retriever {} has dimension 0",
                index_id
            )));
        }

        let entry = match self.config.retriever(index_id) {
            Some(RetrieverConfig {
                algorithm,
                dimension,
                backend: BackendKind::Exact,
                ..
            }) => RetrieverEntry::new(index_id, algorithm.as_str(), Backend::Exact(VectorIndex::new(*dimension))),
            Some(RetrieverConfig {
                algorithm,
                dimension,
                backend: BackendKind::Approximate { model_dir },
                ..
            }) => {
                let model = self.model(model_dir)?;
                if model.input_dim() != *dimension {
                    return Err(RetrievalError::DimensionMismatch {
                        expected: *dimension,
                        actual: model.input_dim(),
                    });
                }
                RetrieverEntry::new(
                    index_id,
                    algorithm.as_str(),
                    Backend::Approximate(ApproximateIndex::new(model)),
                )
            }
            None => RetrieverEntry::new(
                index_id,
                self.config.default_algorithm.as_str(),
                Backend::Exact(VectorIndex::new(self.config.default_dimension)),
            ),
        };

        info!(
            index_id,
            algorithm = entry.algorithm(),
            exact = entry.backend().is_exact(),
            dim = entry.backend().dim(),
            "created retriever"
        );
        Ok(entry)
    }

    /// Models are read-only, so retrievers sharing a directory share one copy
    fn model(&self, dir: &Path) -> Result<Arc<QuantizationModel>> {
        let mut models = self.models.lock();
        if let Some(model) = models.get(dir) {
            return Ok(Arc::clone(model));
        }
        let model = Arc::new(ModelStore::new(dir)?.load()?);
        models.insert(dir.to_path_buf(), Arc::clone(&model));
        Ok(model)
    }
}
