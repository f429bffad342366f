//! Benchmarks for exact and quantized nearest-neighbour search
//!
//! Compares the brute-force scan against LOPQ multi-index search at several
//! corpus sizes, plus the cost of encoding a single query.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use framesift_core::config::TrainerConfig;
use framesift_core::index::{ApproximateIndex, VectorIndex};
use framesift_core::quantize::ModelTrainer;
use framesift_core::vector::{l2_distance_squared, l2_distance_squared_simd};
use framesift_core::MetadataRecord;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

const DIM: usize = 128;

fn random_vectors(n: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn bench_distance(c: &mut Criterion) {
    let mut group = c.benchmark_group("l2_distance_squared");
    let v = random_vectors(2, 1);

    group.throughput(Throughput::Elements(DIM as u64));
    group.bench_function("scalar", |b| {
        b.iter(|| black_box(l2_distance_squared(black_box(&v[0]), black_box(&v[1])).unwrap()))
    });
    group.bench_function("simd", |b| {
        b.iter(|| black_box(l2_distance_squared_simd(black_box(&v[0]), black_box(&v[1]))))
    });
    group.finish();
}

fn bench_exact_nearest(c: &mut Criterion) {
    let mut group = c.benchmark_group("exact_nearest");
    let query = random_vectors(1, 99).remove(0);

    for size in [1_000, 10_000, 50_000] {
        let vectors = random_vectors(size, 2);
        let mut index = VectorIndex::new(DIM);
        index
            .append(&vectors, vec![MetadataRecord::new(); size])
            .expect("append");

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(index.nearest(black_box(&query), 10).unwrap()))
        });
    }
    group.finish();
}

fn bench_approximate_nearest(c: &mut Criterion) {
    let mut group = c.benchmark_group("approximate_nearest");
    group.sample_size(20);

    let training = random_vectors(2_000, 3);
    let config = TrainerConfig::default()
        .with_components(32)
        .with_coarse_clusters(16)
        .with_subquantizers(8)
        .with_sub_clusters(64)
        .with_kmeans_iterations(10)
        .without_recall();
    let model = Arc::new(ModelTrainer::new(config).fit(&training).expect("train"));
    let query = random_vectors(1, 99).remove(0);

    group.bench_function("encode", |b| {
        b.iter(|| black_box(model.encode(black_box(&query)).unwrap()))
    });

    for size in [1_000, 10_000, 50_000] {
        let vectors = random_vectors(size, 4);
        let mut index = ApproximateIndex::new(Arc::clone(&model));
        index
            .append(&vectors, vec![MetadataRecord::new(); size])
            .expect("append");

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(index.nearest(black_box(&query), 10).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_distance, bench_exact_nearest, bench_approximate_nearest);
criterion_main!(benches);
