//! Query entry point
//!
//! ```text
//! QueryRequest ─► decode vector ─► registry.get_or_create(index_id)
//!                                       │
//!                 source.partition_count ─► refresh_entry (merge new partitions)
//!                                       │
//!                              backend.nearest ─► QueryResult per neighbour
//! ```

use crate::partition::PartitionSource;
use crate::query::{QueryRequest, QueryResponse, QueryResult, QueryStatus};
use crate::refresh::RefreshCoordinator;
use crate::registry::RetrieverRegistry;
use crate::{Result, RetrievalError};
use std::sync::Arc;
use tracing::debug;

/// Answers queries against the retrievers of one registry
pub struct RetrievalService {
    registry: Arc<RetrieverRegistry>,
    coordinator: RefreshCoordinator,
}

impl RetrievalService {
    pub fn new(registry: Arc<RetrieverRegistry>, source: Arc<dyn PartitionSource>) -> Self {
        Self {
            registry,
            coordinator: RefreshCoordinator::new(source),
        }
    }

    pub fn registry(&self) -> &Arc<RetrieverRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Refresh the target index if stale, then return its nearest neighbours
    ///
    /// An index with no vectors yields an empty response with
    /// [`QueryStatus::NoData`] rather than an error.
    ///
    /// # Errors
    ///
    /// `InvalidQuery` or `DimensionMismatch` for a malformed query,
    /// `SourceUnavailable` if the partition source cannot be consulted, and
    /// model errors when creating an approximate retriever.
    pub fn retrieve(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let vector = request.decode()?;
        let entry = self.registry.get_or_create(&request.index_id)?;

        let source = self.coordinator.source();
        let count = source
            .partition_count(&request.index_id)
            .map_err(|e| RetrievalError::SourceUnavailable(e.to_string()))?;
        self.coordinator.refresh_entry(&entry, count)?;

        let algorithm = request.algorithm.as_deref().unwrap_or_else(|| entry.algorithm());

        // Neighbours and their metadata come from one read guard
        let backend = entry.backend();
        let neighbors = match backend.nearest(&vector, request.count) {
            Ok(neighbors) => neighbors,
            Err(RetrievalError::EmptyIndex) => {
                debug!(index_id = %request.index_id, "query against empty index");
                return Ok(QueryResponse::no_data(&request.index_id));
            }
            Err(e) => return Err(e),
        };

        let results = neighbors
            .iter()
            .filter_map(|n| backend.metadata(n.row).map(|m| QueryResult::new(n, m, algorithm)))
            .collect();

        Ok(QueryResponse {
            index_id: request.index_id.clone(),
            status: QueryStatus::Ok,
            results,
        })
    }
}
