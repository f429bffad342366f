//! Property-based tests for index and refresh invariants
//!
//! - Appends advance `findex` by exactly the batch size with contiguous ranges
//! - Rejected batches leave the index untouched
//! - `nearest` is sorted, clamped, ranked from 1 and deterministic on ties
//! - Refresh with an unchanged count never loads a partition
//! - Encoding through a trained model is stable

use framesift_core::config::{ServiceConfig, TrainerConfig};
use framesift_core::index::VectorIndex;
use framesift_core::partition::{MemoryPartitionSource, Partition};
use framesift_core::quantize::ModelTrainer;
use framesift_core::refresh::RefreshCoordinator;
use framesift_core::registry::RetrieverRegistry;
use framesift_core::MetadataRecord;
use proptest::prelude::*;
use std::sync::Arc;

const DIM: usize = 4;

prop_compose! {
    fn arb_vector()(v in prop::collection::vec(-10.0f32..10.0, DIM)) -> Vec<f32> {
        v
    }
}

prop_compose! {
    fn arb_batch(max: usize)(rows in prop::collection::vec(arb_vector(), 1..max)) -> Vec<Vec<f32>> {
        rows
    }
}

fn meta(n: usize) -> Vec<MetadataRecord> {
    vec![MetadataRecord::new(); n]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn append_advances_findex_by_batch(batches in prop::collection::vec(arb_batch(12), 1..6)) {
        let mut index = VectorIndex::new(DIM);
        let mut expected_start = 0;
        for batch in &batches {
            let range = index.append(batch, meta(batch.len())).unwrap();
            prop_assert_eq!(range.start, expected_start);
            prop_assert_eq!(range.len(), batch.len());
            expected_start += batch.len();
            prop_assert_eq!(index.findex(), expected_start);
        }
    }

    #[test]
    fn mismatched_batch_is_rejected_whole(
        seed in arb_batch(8),
        batch in arb_batch(8),
        extra in 1usize..4,
    ) {
        let mut index = VectorIndex::new(DIM);
        index.append(&seed, meta(seed.len())).unwrap();
        let before = index.findex();

        prop_assert!(index.append(&batch, meta(batch.len() + extra)).is_err());
        prop_assert_eq!(index.findex(), before);
    }

    #[test]
    fn nearest_sorted_clamped_ranked(
        rows in arb_batch(40),
        query in arb_vector(),
        k in 0usize..60,
    ) {
        let mut index = VectorIndex::new(DIM);
        index.append(&rows, meta(rows.len())).unwrap();

        let results = index.nearest(&query, k).unwrap();
        prop_assert_eq!(results.len(), k.min(rows.len()));
        for (i, n) in results.iter().enumerate() {
            prop_assert_eq!(n.rank, i + 1);
        }
        for w in results.windows(2) {
            prop_assert!(
                w[0].distance < w[1].distance
                    || (w[0].distance == w[1].distance && w[0].row < w[1].row)
            );
        }
        // Deterministic
        prop_assert_eq!(index.nearest(&query, k).unwrap(), results);
    }

    #[test]
    fn nearest_first_result_is_true_minimum(rows in arb_batch(30), query in arb_vector()) {
        let mut index = VectorIndex::new(DIM);
        index.append(&rows, meta(rows.len())).unwrap();

        let best = index.nearest(&query, 1).unwrap()[0];
        let brute = rows
            .iter()
            .map(|r| r.iter().zip(&query).map(|(a, b)| (a - b) * (a - b)).sum::<f32>().sqrt())
            .fold(f32::INFINITY, f32::min);
        prop_assert!((best.distance - brute).abs() <= 1e-3 * brute.max(1.0));
    }

    #[test]
    fn unchanged_count_never_loads(partitions in prop::collection::vec(arb_batch(6), 1..6)) {
        let source = Arc::new(MemoryPartitionSource::new());
        for (id, rows) in partitions.iter().enumerate() {
            source.insert("p", id as u64, Partition::new(rows.clone(), meta(rows.len())));
        }
        let registry = RetrieverRegistry::new(ServiceConfig::default().with_default_dimension(DIM));
        let coordinator = RefreshCoordinator::new(source.clone());
        let count = partitions.len() as u64;

        coordinator.refresh_if_stale(&registry, "p", count).unwrap();
        let loads = source.load_calls();
        let rows = registry.get("p").unwrap().len();

        let again = coordinator.refresh_if_stale(&registry, "p", count).unwrap();
        prop_assert!(!again.refreshed);
        prop_assert_eq!(source.load_calls(), loads);
        prop_assert_eq!(registry.get("p").unwrap().len(), rows);
        prop_assert_eq!(rows, partitions.iter().map(|p| p.len()).sum::<usize>());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn encoding_is_stable(seed in 0u64..1000, probe in prop::collection::vec(-3.0f32..3.0, 8)) {
        let corpus: Vec<Vec<f32>> = (0..40u64)
            .map(|i| (0..8u64).map(|d| (((i + seed) * 31 + d * 17) % 13) as f32 - 6.0).collect())
            .collect();
        let config = TrainerConfig::default()
            .with_components(4)
            .with_coarse_clusters(2)
            .with_subquantizers(2)
            .with_sub_clusters(8)
            .with_kmeans_iterations(5)
            .with_seed(seed)
            .without_recall();
        let model = ModelTrainer::new(config).fit(&corpus).unwrap();

        let code = model.encode(&probe).unwrap();
        prop_assert_eq!(model.encode(&probe).unwrap(), code.clone());
        prop_assert_eq!(model.apply(&probe, None).unwrap().code, code);
    }
}
