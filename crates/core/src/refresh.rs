//! Bringing retrievers up to date with their partition source
//!
//! Staleness is decided by comparing the authoritative partition count with
//! the count seen at the last refresh. A refresh merges every listed partition
//! that has not been merged into the entry yet. Equal counts mean no work, even
//! if partitions were added and removed in between. A partition that fails to
//! load is remembered and not attempted again.

use crate::index::LoadedRange;
use crate::partition::{PartitionInfo, PartitionSource};
use crate::registry::{RetrieverEntry, RetrieverRegistry};
use crate::{Result, RetrievalError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a refresh call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// False when the cached count matched and nothing was fetched
    pub refreshed: bool,
    /// Partitions merged by this call with their row ranges
    pub merged: Vec<(u64, LoadedRange)>,
    /// Partitions skipped because they hold no vectors
    pub skipped_empty: Vec<u64>,
    /// Partitions that failed to load or append; never retried
    pub failed: Vec<u64>,
}

/// Runs refreshes against one partition source
pub struct RefreshCoordinator {
    source: Arc<dyn PartitionSource>,
}

impl RefreshCoordinator {
    pub fn new(source: Arc<dyn PartitionSource>) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &Arc<dyn PartitionSource> {
        &self.source
    }

    /// Refresh the registry's entry for `index_id` if `authoritative_count`
    /// differs from the last count it saw
    pub fn refresh_if_stale(
        &self,
        registry: &RetrieverRegistry,
        index_id: &str,
        authoritative_count: u64,
    ) -> Result<RefreshOutcome> {
        let entry = registry.get_or_create(index_id)?;
        self.refresh_entry(&entry, authoritative_count)
    }

    /// Ask the source for the current count, then refresh if stale
    pub fn refresh(&self, entry: &RetrieverEntry) -> Result<RefreshOutcome> {
        let count = self.source.partition_count(entry.index_id())?;
        self.refresh_entry(entry, count)
    }

    /// Refresh `entry` if `authoritative_count` differs from its cached count.
    ///
    /// Refreshes of one entry never overlap. A caller arriving while another
    /// refresh runs waits for it and then re-checks, which normally finds the
    /// entry current.
    ///
    /// Partition failures are logged and skipped for good; only a failure to
    /// list partitions aborts the refresh, leaving the cached count untouched.
    pub fn refresh_entry(&self, entry: &RetrieverEntry, authoritative_count: u64) -> Result<RefreshOutcome> {
        let index_id = entry.index_id();
        let mut state = match entry.try_lock_refresh() {
            Some(state) => state,
            None => {
                let conflict = RetrievalError::ConcurrentRefreshConflict(index_id.to_string());
                debug!(index_id, %conflict, "waiting for in-flight refresh");
                entry.lock_refresh()
            }
        };

        if state.last_seen_count == Some(authoritative_count) {
            debug!(index_id, count = authoritative_count, "index current");
            return Ok(RefreshOutcome::default());
        }

        info!(
            index_id,
            previous = ?state.last_seen_count,
            current = authoritative_count,
            "index stale, refreshing"
        );

        let listing = self.source.partitions(index_id)?;
        let mut outcome = RefreshOutcome {
            refreshed: true,
            ..RefreshOutcome::default()
        };

        for info in listing {
            if state.loaded.contains_key(&info.id) || state.failed.contains(&info.id) {
                continue;
            }
            if info.vector_count == 0 {
                outcome.skipped_empty.push(info.id);
                continue;
            }

            match self.merge(entry, info) {
                Ok(Some(range)) => {
                    state.loaded.insert(info.id, range);
                    outcome.merged.push((info.id, range));
                }
                Ok(None) => outcome.skipped_empty.push(info.id),
                Err(e) => {
                    warn!(index_id, partition = info.id, error = %e, "failed to load partition, skipping");
                    state.failed.insert(info.id);
                    outcome.failed.push(info.id);
                }
            }
        }

        state.last_seen_count = Some(authoritative_count);
        info!(
            index_id,
            merged = outcome.merged.len(),
            failed = outcome.failed.len(),
            rows = entry.len(),
            "refresh finished"
        );
        Ok(outcome)
    }

    /// Load one partition and append it under a single write guard
    fn merge(&self, entry: &RetrieverEntry, info: PartitionInfo) -> Result<Option<LoadedRange>> {
        let index_id = entry.index_id();
        let partition = self.source.load(index_id, info.id)?;
        if partition.is_empty() && partition.metadata.is_empty() {
            return Ok(None);
        }

        let rows = partition.vectors.len();
        let dim = partition.vectors.first().map(|v| v.len()).unwrap_or(0);
        info!(index_id, partition = info.id, rows, dim, "merging partition");

        let load_failure = |e: RetrievalError| RetrievalError::PartitionLoadFailure {
            partition: info.id,
            reason: e.to_string(),
        };

        // Encoding runs under the read lock so queries keep flowing; refreshes
        // are serialized, so the backend cannot change before the write below
        let codes = entry
            .backend()
            .encode_batch(&partition.vectors, partition.metadata.len())
            .map_err(load_failure)?;
        let range = entry
            .backend_lock()
            .write()
            .append_prepared(&partition.vectors, codes, partition.metadata)
            .map_err(load_failure)?;

        info!(
            index_id,
            partition = info.id,
            start = range.start,
            end = range.end,
            "merged partition"
        );
        Ok(Some(range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::partition::{MemoryPartitionSource, Partition};
    use crate::MetadataRecord;

    fn partition(n: usize, offset: f32) -> Partition {
        Partition::new(
            (0..n).map(|i| vec![offset + i as f32, 0.0]).collect(),
            vec![MetadataRecord::new(); n],
        )
    }

    fn setup() -> (Arc<MemoryPartitionSource>, RefreshCoordinator, RetrieverRegistry) {
        let source = Arc::new(MemoryPartitionSource::new());
        let coordinator = RefreshCoordinator::new(source.clone());
        let registry = RetrieverRegistry::new(ServiceConfig::default().with_default_dimension(2));
        (source, coordinator, registry)
    }

    #[test]
    fn test_first_refresh_merges_everything() {
        let (source, coordinator, registry) = setup();
        source.insert("faces", 1, partition(3, 0.0));
        source.insert("faces", 2, partition(2, 10.0));

        let outcome = coordinator.refresh_if_stale(&registry, "faces", 2).unwrap();
        assert!(outcome.refreshed);
        assert_eq!(
            outcome.merged,
            vec![
                (1, LoadedRange { start: 0, end: 2 }),
                (2, LoadedRange { start: 3, end: 4 }),
            ]
        );

        let entry = registry.get("faces").unwrap();
        assert_eq!(entry.len(), 5);
        assert_eq!(entry.last_seen_count(), Some(2));
    }

    #[test]
    fn test_unchanged_count_is_noop() {
        let (source, coordinator, registry) = setup();
        source.insert("faces", 1, partition(3, 0.0));
        coordinator.refresh_if_stale(&registry, "faces", 5).unwrap();
        let loads = source.load_calls();

        let outcome = coordinator.refresh_if_stale(&registry, "faces", 5).unwrap();
        assert!(!outcome.refreshed);
        assert_eq!(source.load_calls(), loads);
    }

    #[test]
    fn test_zero_count_on_first_check_still_refreshes() {
        let (_, coordinator, registry) = setup();
        let outcome = coordinator.refresh_if_stale(&registry, "faces", 0).unwrap();
        assert!(outcome.refreshed);
        let outcome = coordinator.refresh_if_stale(&registry, "faces", 0).unwrap();
        assert!(!outcome.refreshed);
    }

    #[test]
    fn test_new_partition_merged_once() {
        let (source, coordinator, registry) = setup();
        source.insert("faces", 1, partition(3, 0.0));
        coordinator.refresh_if_stale(&registry, "faces", 1).unwrap();

        source.insert("faces", 2, partition(4, 5.0));
        let outcome = coordinator.refresh_if_stale(&registry, "faces", 2).unwrap();
        assert_eq!(outcome.merged, vec![(2, LoadedRange { start: 3, end: 6 })]);

        let ranges = registry.get("faces").unwrap().loaded_ranges();
        assert_eq!(ranges.len(), 2);
        assert!(!ranges[0].1.overlaps(&ranges[1].1));
    }

    #[test]
    fn test_empty_partitions_skipped() {
        let (source, coordinator, registry) = setup();
        source.insert("faces", 1, partition(0, 0.0));
        source.insert("faces", 2, partition(2, 0.0));

        let outcome = coordinator.refresh_if_stale(&registry, "faces", 2).unwrap();
        assert_eq!(outcome.skipped_empty, vec![1]);
        assert_eq!(outcome.merged.len(), 1);
        // Skipped without a load call
        assert_eq!(source.load_calls(), 1);
    }

    #[test]
    fn test_failures_are_skipped_not_fatal() {
        let (source, coordinator, registry) = setup();
        source.insert("faces", 1, partition(2, 0.0));
        source.insert("faces", 2, partition(2, 5.0));
        source.insert(
            "faces",
            3,
            Partition::new(vec![vec![0.0, 0.0]; 3], vec![MetadataRecord::new(); 2]),
        );
        source.fail_loads("faces", 2);

        let outcome = coordinator.refresh_if_stale(&registry, "faces", 3).unwrap();
        assert_eq!(outcome.merged, vec![(1, LoadedRange { start: 0, end: 1 })]);
        assert_eq!(outcome.failed, vec![2, 3]);

        let entry = registry.get("faces").unwrap();
        assert_eq!(entry.len(), 2);
        assert_eq!(entry.last_seen_count(), Some(3));
    }

    #[test]
    fn test_failed_partition_not_retried() {
        let (source, coordinator, registry) = setup();
        source.insert("faces", 1, partition(2, 0.0));
        source.insert(
            "faces",
            2,
            Partition::new(vec![vec![0.0, 0.0]; 3], vec![MetadataRecord::new(); 2]),
        );

        let first = coordinator.refresh_if_stale(&registry, "faces", 2).unwrap();
        assert_eq!(first.failed, vec![2]);
        let loads = source.load_calls();

        source.insert("faces", 3, partition(1, 9.0));
        let second = coordinator.refresh_if_stale(&registry, "faces", 3).unwrap();
        assert!(second.refreshed);
        assert!(second.failed.is_empty());
        assert_eq!(second.merged, vec![(3, LoadedRange { start: 2, end: 2 })]);
        // Only partition 3 was loaded
        assert_eq!(source.load_calls(), loads + 1);

        let entry = registry.get("faces").unwrap();
        assert_eq!(entry.failed_partitions(), vec![2]);
        assert!(entry.loaded_ranges().iter().all(|(id, _)| *id != 2));
    }

    #[test]
    fn test_wrong_dimension_partition_leaves_index_unchanged() {
        let (source, coordinator, registry) = setup();
        source.insert(
            "faces",
            1,
            Partition::new(vec![vec![0.0; 3]; 2], vec![MetadataRecord::new(); 2]),
        );
        let outcome = coordinator.refresh_if_stale(&registry, "faces", 1).unwrap();
        assert_eq!(outcome.failed, vec![1]);
        assert!(registry.get("faces").unwrap().is_empty());
    }

    #[test]
    fn test_refresh_uses_source_count() {
        let (source, coordinator, registry) = setup();
        source.insert("faces", 1, partition(1, 0.0));
        let entry = registry.get_or_create("faces").unwrap();

        assert!(coordinator.refresh(&entry).unwrap().refreshed);
        assert!(!coordinator.refresh(&entry).unwrap().refreshed);
        assert_eq!(entry.last_seen_count(), Some(1));
    }
}
